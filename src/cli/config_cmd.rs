//! Config CLI subcommands: show, defaults, validate.
//!
//! These read configuration directly from the environment (and the file
//! named by `GG_SANDBOX_CONFIG`); no engine is started.

use super::exit;
use crate::config::{self, EffectiveConfig, EngineLimits, EnvConfig};
use crate::health::ResourceThresholds;
use crate::sandbox::DEFAULT_REGISTRY;

/// Print effective config as key-value pairs to stdout.
pub fn run_show(config: &EnvConfig) -> i32 {
    print!("{}", render(&config.effective_config()));
    exit::SUCCESS
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() -> i32 {
    print!("{}", render(&defaults()));
    exit::SUCCESS
}

/// Load configuration and report misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found, 2 if it cannot load.
pub fn run_validate() -> i32 {
    let env = match config::load() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return exit::USAGE;
        }
    };
    let warnings = validate(&env.effective_config());
    for warning in &warnings {
        eprintln!("WARNING: {}", warning);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        exit::SUCCESS
    } else {
        exit::FAILURE
    }
}

fn defaults() -> EffectiveConfig {
    let limits = EngineLimits::default();
    let thresholds = ResourceThresholds::default();
    EffectiveConfig {
        sandbox_root: config::default_sandbox_root().display().to_string(),
        runtime: "node".to_string(),
        package_manager: "npm".to_string(),
        registry: DEFAULT_REGISTRY.to_string(),
        max_concurrent_executions: limits.max_concurrent_executions,
        execution_timeout_ms: limits.execution_timeout_ms,
        max_memory_mb: limits.max_memory_mb,
        max_output_bytes: limits.max_output_bytes,
        block_dangerous_packages: limits.block_dangerous_packages,
        strict_package_policy: limits.strict_package_policy,
        install_timeout_ms: limits.install_timeout_ms,
        max_code_bytes: limits.max_code_bytes,
        memory_threshold_percent: thresholds.memory_percent,
        cpu_threshold_percent: thresholds.cpu_percent,
        disk_threshold_percent: thresholds.disk_percent,
        shutdown_timeout_secs: 30,
        log_level: "info".to_string(),
    }
}

/// Settings that load fine but are probably a mistake.
fn validate(cfg: &EffectiveConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if !cfg.block_dangerous_packages {
        warnings.push(
            "GG_SANDBOX_BLOCK_DANGEROUS_PACKAGES is off; deny-listed packages will be installed"
                .to_string(),
        );
    }
    if !cfg.registry.starts_with("https://") {
        warnings.push(format!("GG_SANDBOX_REGISTRY ({}) is not https", cfg.registry));
    }
    if cfg.install_timeout_ms < cfg.execution_timeout_ms {
        warnings.push(format!(
            "GG_SANDBOX_INSTALL_TIMEOUT_MS ({}) < GG_SANDBOX_EXEC_TIMEOUT_MS ({})",
            cfg.install_timeout_ms, cfg.execution_timeout_ms
        ));
    }
    if cfg.max_output_bytes > 64 * 1024 * 1024 {
        warnings.push(format!(
            "GG_SANDBOX_MAX_OUTPUT_BYTES ({}) allows very large captures",
            cfg.max_output_bytes
        ));
    }
    warnings
}

fn render(cfg: &EffectiveConfig) -> String {
    [
        format!("GG_SANDBOX_ROOT={}", cfg.sandbox_root),
        format!("GG_SANDBOX_RUNTIME={}", cfg.runtime),
        format!("GG_SANDBOX_PACKAGE_MANAGER={}", cfg.package_manager),
        format!("GG_SANDBOX_REGISTRY={}", cfg.registry),
        format!("GG_SANDBOX_MAX_CONCURRENT={}", cfg.max_concurrent_executions),
        format!("GG_SANDBOX_EXEC_TIMEOUT_MS={}", cfg.execution_timeout_ms),
        format!("GG_SANDBOX_MAX_MEMORY_MB={}", cfg.max_memory_mb),
        format!("GG_SANDBOX_MAX_OUTPUT_BYTES={}", cfg.max_output_bytes),
        format!("GG_SANDBOX_BLOCK_DANGEROUS_PACKAGES={}", cfg.block_dangerous_packages),
        format!("GG_SANDBOX_STRICT_PACKAGES={}", cfg.strict_package_policy),
        format!("GG_SANDBOX_INSTALL_TIMEOUT_MS={}", cfg.install_timeout_ms),
        format!("GG_SANDBOX_MAX_CODE_BYTES={}", cfg.max_code_bytes),
        format!("GG_SANDBOX_MEMORY_THRESHOLD={}", cfg.memory_threshold_percent),
        format!("GG_SANDBOX_CPU_THRESHOLD={}", cfg.cpu_threshold_percent),
        format!("GG_SANDBOX_DISK_THRESHOLD={}", cfg.disk_threshold_percent),
        format!("GG_SANDBOX_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs),
        format!("GG_SANDBOX_LOG_LEVEL={}", cfg.log_level),
    ]
    .iter()
    .map(|line| format!("{}\n", line))
    .collect()
}

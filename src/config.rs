//! Engine configuration loading from environment variables and TOML.
//!
//! Values come from `GG_SANDBOX_*` environment variables, optionally layered
//! over a TOML file named by `GG_SANDBOX_CONFIG`. Invalid values fall back to
//! defaults (then floors and clamps apply) without crashing; only an
//! explicitly named file that cannot be read or parsed is an error.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GG_SANDBOX_CONFIG` | unset | Optional TOML file layered under env vars |
//! | `GG_SANDBOX_ROOT` | `<tmp>/gg-sandbox` | Parent directory for session sandboxes |
//! | `GG_SANDBOX_RUNTIME` | `node` | Script runtime program |
//! | `GG_SANDBOX_PACKAGE_MANAGER` | `npm` | Package manager program |
//! | `GG_SANDBOX_REGISTRY` | `https://registry.npmjs.org/` | Single trusted package registry |
//! | `GG_SANDBOX_MAX_CONCURRENT` | 3 | Max concurrently admitted sessions |
//! | `GG_SANDBOX_EXEC_TIMEOUT_MS` | 30000 | Child wall-clock timeout |
//! | `GG_SANDBOX_MAX_MEMORY_MB` | 512 | Runtime heap ceiling |
//! | `GG_SANDBOX_MAX_OUTPUT_BYTES` | 1048576 | Stdout cap before kill |
//! | `GG_SANDBOX_BLOCK_DANGEROUS_PACKAGES` | true | Filter deny-listed packages |
//! | `GG_SANDBOX_STRICT_PACKAGES` | false | Reject instead of filter |
//! | `GG_SANDBOX_INSTALL_TIMEOUT_MS` | 60000 | Package install timeout |
//! | `GG_SANDBOX_MAX_CODE_BYTES` | 102400 | Scanner payload ceiling |
//! | `GG_SANDBOX_MEMORY_THRESHOLD` | 98 | Host memory % refusing admission |
//! | `GG_SANDBOX_CPU_THRESHOLD` | 98 | Host CPU load % refusing admission |
//! | `GG_SANDBOX_DISK_THRESHOLD` | 98 | Host disk % refusing admission |
//! | `GG_SANDBOX_SHUTDOWN_TIMEOUT` | 30 | Drain timeout on shutdown (secs) |
//! | `GG_SANDBOX_LOG_LEVEL` | info | Log filter |
//! | `GG_SANDBOX_LOG_FORMAT` | json | `json` or `pretty` |
//! | `GG_SANDBOX_LOG_FILE` | unset | JSON log file instead of stderr |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineConfig;
use crate::exec::{ResourceLimits, ScriptRuntime};
use crate::health::ResourceThresholds;
use crate::sandbox::installer::{PackageManager, PackagePolicy};
use crate::sandbox::{SandboxConfig, DEFAULT_REGISTRY};
use crate::security::ScannerConfig;
use crate::telemetry::{LogConfig, LogFormat};

/// Per-session limits. This is the payload a [`ConfigSource`] hands out;
/// each admitted session takes a snapshot and keeps it for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    pub max_concurrent_executions: usize,
    pub execution_timeout_ms: u64,
    pub max_memory_mb: u64,
    pub max_output_bytes: usize,
    pub block_dangerous_packages: bool,
    /// Reject the whole request instead of filtering disallowed packages.
    pub strict_package_policy: bool,
    pub install_timeout_ms: u64,
    pub max_code_bytes: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 3,
            execution_timeout_ms: 30_000,
            max_memory_mb: 512,
            max_output_bytes: 1024 * 1024,
            block_dangerous_packages: true,
            strict_package_policy: false,
            install_timeout_ms: 60_000,
            max_code_bytes: 100 * 1024,
        }
    }
}

impl EngineLimits {
    /// Apply floors and clamps so no limit disables itself.
    pub fn sanitized(mut self) -> Self {
        self.max_concurrent_executions = self.max_concurrent_executions.clamp(1, 1024);
        self.execution_timeout_ms = self.execution_timeout_ms.max(100);
        self.max_memory_mb = self.max_memory_mb.max(16);
        self.max_output_bytes = self.max_output_bytes.max(1024);
        self.install_timeout_ms = self.install_timeout_ms.max(1000);
        self.max_code_bytes = self.max_code_bytes.max(1);
        self
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_millis(self.install_timeout_ms)
    }

    /// Limits handed to the execution supervisor.
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            timeout: self.execution_timeout(),
            max_memory_mb: self.max_memory_mb,
            max_output_bytes: self.max_output_bytes,
        }
    }

    pub fn package_policy(&self) -> PackagePolicy {
        PackagePolicy {
            block_dangerous: self.block_dangerous_packages,
            strict: self.strict_package_policy,
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            max_code_bytes: self.max_code_bytes,
        }
    }
}

/// Supplies limits to the engine. Consulted once per admitted session, so
/// changes apply to the next session, never to running ones.
pub trait ConfigSource: Send + Sync {
    fn execution_limits(&self) -> EngineLimits;
}

impl ConfigSource for EngineLimits {
    fn execution_limits(&self) -> EngineLimits {
        self.clone()
    }
}

/// Limits that can be replaced at runtime.
#[derive(Debug, Clone, Default)]
pub struct SharedLimits {
    inner: Arc<RwLock<EngineLimits>>,
}

impl SharedLimits {
    pub fn new(limits: EngineLimits) -> Self {
        Self {
            inner: Arc::new(RwLock::new(limits)),
        }
    }

    /// Replace the limits used for subsequently admitted sessions.
    pub fn update(&self, limits: EngineLimits) {
        *self.inner.write() = limits.sanitized();
    }

    pub fn get(&self) -> EngineLimits {
        self.inner.read().clone()
    }
}

impl ConfigSource for SharedLimits {
    fn execution_limits(&self) -> EngineLimits {
        self.get()
    }
}

/// Re-reads the environment on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn execution_limits(&self) -> EngineLimits {
        load_limits(EngineLimits::default())
    }
}

/// Errors loading an explicitly named config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// On-disk TOML layout. Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub limits: EngineLimits,
    pub thresholds: ThresholdSection,
    pub sandbox: SandboxSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdSection {
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub disk_percent: f64,
}

impl Default for ThresholdSection {
    fn default() -> Self {
        let t = ResourceThresholds::default();
        Self {
            memory_percent: t.memory_percent,
            cpu_percent: t.cpu_percent,
            disk_percent: t.disk_percent,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub root: Option<PathBuf>,
    pub runtime: Option<String>,
    pub package_manager: Option<String>,
    pub registry: Option<String>,
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<PathBuf>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub sandbox_root: PathBuf,
    pub runtime_program: String,
    pub package_manager_program: String,
    pub registry: String,
    pub limits: EngineLimits,
    pub thresholds: ResourceThresholds,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
}

/// Serializable summary of effective values.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub sandbox_root: String,
    pub runtime: String,
    pub package_manager: String,
    pub registry: String,
    pub max_concurrent_executions: usize,
    pub execution_timeout_ms: u64,
    pub max_memory_mb: u64,
    pub max_output_bytes: usize,
    pub block_dangerous_packages: bool,
    pub strict_package_policy: bool,
    pub install_timeout_ms: u64,
    pub max_code_bytes: usize,
    pub memory_threshold_percent: f64,
    pub cpu_threshold_percent: f64,
    pub disk_threshold_percent: f64,
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    env_var(key)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    env_var(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Parse a percentage env var, returning `default` on missing or invalid.
fn parse_percent(key: &str, default: f64) -> f64 {
    env_var(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Parse a boolean env var (`1/0`, `true/false`, `yes/no`, `on/off`).
fn parse_bool(key: &str, default: bool) -> bool {
    match env_var(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Overlay env vars on `base` limits.
fn load_limits(base: EngineLimits) -> EngineLimits {
    EngineLimits {
        max_concurrent_executions: parse_usize(
            "GG_SANDBOX_MAX_CONCURRENT",
            base.max_concurrent_executions,
        ),
        execution_timeout_ms: parse_u64("GG_SANDBOX_EXEC_TIMEOUT_MS", base.execution_timeout_ms),
        max_memory_mb: parse_u64("GG_SANDBOX_MAX_MEMORY_MB", base.max_memory_mb),
        max_output_bytes: parse_usize("GG_SANDBOX_MAX_OUTPUT_BYTES", base.max_output_bytes),
        block_dangerous_packages: parse_bool(
            "GG_SANDBOX_BLOCK_DANGEROUS_PACKAGES",
            base.block_dangerous_packages,
        ),
        strict_package_policy: parse_bool("GG_SANDBOX_STRICT_PACKAGES", base.strict_package_policy),
        install_timeout_ms: parse_u64("GG_SANDBOX_INSTALL_TIMEOUT_MS", base.install_timeout_ms),
        max_code_bytes: parse_usize("GG_SANDBOX_MAX_CODE_BYTES", base.max_code_bytes),
    }
    .sanitized()
}

fn load_thresholds(base: &ThresholdSection) -> ResourceThresholds {
    ResourceThresholds {
        memory_percent: parse_percent("GG_SANDBOX_MEMORY_THRESHOLD", base.memory_percent),
        cpu_percent: parse_percent("GG_SANDBOX_CPU_THRESHOLD", base.cpu_percent),
        disk_percent: parse_percent("GG_SANDBOX_DISK_THRESHOLD", base.disk_percent),
    }
    .sanitized()
}

fn load_log_config(base: &LoggingSection) -> LogConfig {
    let level = env_var("GG_SANDBOX_LOG_LEVEL")
        .or_else(|| base.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let format = env_var("GG_SANDBOX_LOG_FORMAT")
        .or_else(|| base.format.clone())
        .and_then(|f| LogFormat::parse(&f))
        .unwrap_or_default();
    let output_path = env_var("GG_SANDBOX_LOG_FILE")
        .map(PathBuf::from)
        .or_else(|| base.file.clone());
    LogConfig {
        format,
        level,
        output_path,
    }
}

/// Default parent directory for sandboxes.
pub fn default_sandbox_root() -> PathBuf {
    std::env::temp_dir().join("gg-sandbox")
}

/// Read and parse a TOML config file.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_file_config(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse TOML text into a [`FileConfig`].
pub fn parse_file_config(text: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(text)
}

/// Resolve configuration from a file layer (if any) plus the environment.
pub fn resolve(file: FileConfig) -> EnvConfig {
    let sandbox = &file.sandbox;
    let shutdown_secs = parse_u64(
        "GG_SANDBOX_SHUTDOWN_TIMEOUT",
        sandbox.shutdown_timeout_secs.unwrap_or(30),
    )
    .max(1);

    EnvConfig {
        sandbox_root: env_var("GG_SANDBOX_ROOT")
            .map(PathBuf::from)
            .or_else(|| sandbox.root.clone())
            .unwrap_or_else(default_sandbox_root),
        runtime_program: env_var("GG_SANDBOX_RUNTIME")
            .or_else(|| sandbox.runtime.clone())
            .unwrap_or_else(|| "node".to_string()),
        package_manager_program: env_var("GG_SANDBOX_PACKAGE_MANAGER")
            .or_else(|| sandbox.package_manager.clone())
            .unwrap_or_else(|| "npm".to_string()),
        registry: env_var("GG_SANDBOX_REGISTRY")
            .or_else(|| sandbox.registry.clone())
            .unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
        limits: load_limits(file.limits.clone()),
        thresholds: load_thresholds(&file.thresholds),
        shutdown_timeout: Duration::from_secs(shutdown_secs),
        log: load_log_config(&file.logging),
    }
}

/// Load all configuration.
pub fn load() -> Result<EnvConfig, ConfigError> {
    let file = match env_var("GG_SANDBOX_CONFIG") {
        Some(path) => load_file(Path::new(&path))?,
        None => FileConfig::default(),
    };
    Ok(resolve(file))
}

impl EnvConfig {
    /// Build the engine configuration these values describe.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sandbox: SandboxConfig {
                root: self.sandbox_root.clone(),
                registry: self.registry.clone(),
            },
            runtime: ScriptRuntime::node(&self.runtime_program),
            package_manager: PackageManager::npm(&self.package_manager_program, &self.registry),
            thresholds: self.thresholds,
            limits: self.limits.clone(),
            ..EngineConfig::default()
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            sandbox_root: self.sandbox_root.display().to_string(),
            runtime: self.runtime_program.clone(),
            package_manager: self.package_manager_program.clone(),
            registry: self.registry.clone(),
            max_concurrent_executions: self.limits.max_concurrent_executions,
            execution_timeout_ms: self.limits.execution_timeout_ms,
            max_memory_mb: self.limits.max_memory_mb,
            max_output_bytes: self.limits.max_output_bytes,
            block_dangerous_packages: self.limits.block_dangerous_packages,
            strict_package_policy: self.limits.strict_package_policy,
            install_timeout_ms: self.limits.install_timeout_ms,
            max_code_bytes: self.limits.max_code_bytes,
            memory_threshold_percent: self.thresholds.memory_percent,
            cpu_threshold_percent: self.thresholds.cpu_percent,
            disk_threshold_percent: self.thresholds.disk_percent,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            log_level: self.log.level.clone(),
        }
    }
}

//! Dependency installer.
//!
//! Requested packages are first checked against a deny-list of modules that
//! grant host, network-server or process-spawning capability, and against
//! the npm name grammar. Disallowed entries are filtered out (or, in strict
//! mode, fail the request). What remains is added to the sandbox manifest
//! and installed by the package manager under a hard timeout.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::manifest;
use crate::exec::process;

/// Longest accepted package name (npm's own limit).
const MAX_NAME_LEN: usize = 214;

/// Bytes of package-manager stderr kept for error reports.
const STDERR_TAIL_BYTES: usize = 16 * 1024;

/// Modules that must never be installed into a sandbox.
const DENY_LIST: &[&str] = &[
    // Node built-ins, in case a registry shadow exists.
    "fs",
    "fs-extra",
    "graceful-fs",
    "child_process",
    "cluster",
    "worker_threads",
    "net",
    "http",
    "https",
    "http2",
    "dgram",
    "dns",
    "tls",
    "os",
    "process",
    "vm",
    "v8",
    "inspector",
    "module",
    "repl",
    // Process spawning.
    "shelljs",
    "execa",
    "cross-spawn",
    "node-pty",
    "node-cmd",
    "sudo-prompt",
    // Network servers and remote access.
    "express",
    "koa",
    "fastify",
    "@hapi/hapi",
    "ws",
    "socket.io",
    "ssh2",
    "ftp",
    // Browser and app automation.
    "puppeteer",
    "playwright",
    "electron",
];

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*$")
            .expect("package name pattern must compile")
    })
}

fn range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9^~<>=*][A-Za-z0-9.^~<>=*|+ -]{0,63}$")
            .expect("version range pattern must compile")
    })
}

/// Why a requested package was not installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    DangerousPackage,
    InvalidPackageName,
}

impl FilterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DangerousPackage => "dangerous_package",
            Self::InvalidPackageName => "invalid_package_name",
        }
    }
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated `name[@range]` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSpec {
    pub name: String,
    pub range: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilteredPackage {
    pub package: String,
    pub reason: FilterReason,
}

/// Packages to install plus those dropped by policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallPlan {
    pub accepted: Vec<PackageSpec>,
    pub filtered: Vec<FilteredPackage>,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Package {package:?} rejected: {reason}")]
    PackageRejected {
        package: String,
        reason: FilterReason,
    },

    #[error("Failed to update sandbox manifest: {0}")]
    Manifest(#[source] std::io::Error),

    #[error("Failed to spawn package manager {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Package manager failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Package install timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Package install cancelled")]
    Cancelled,

    #[error("Failed waiting on package manager: {0}")]
    Wait(#[source] std::io::Error),
}

/// Split `name[@range]`, honouring a leading scope `@`.
fn split_spec(spec: &str) -> (&str, Option<&str>) {
    let search_from = usize::from(spec.starts_with('@'));
    match spec[search_from..].find('@') {
        Some(i) => {
            let at = search_from + i;
            (&spec[..at], Some(&spec[at + 1..]))
        }
        None => (spec, None),
    }
}

/// Parse and validate one request.
pub fn parse_package(spec: &str) -> Option<PackageSpec> {
    let spec = spec.trim();
    let (name, range) = split_spec(spec);
    if name.is_empty() || name.len() > MAX_NAME_LEN || !name_regex().is_match(name) {
        return None;
    }
    let range = match range {
        None => "latest".to_string(),
        Some(r) if range_regex().is_match(r) => r.to_string(),
        Some(_) => return None,
    };
    Some(PackageSpec {
        name: name.to_string(),
        range,
    })
}

/// True when `name` (or its `node:` form) is deny-listed.
pub fn is_dangerous(name: &str) -> bool {
    let bare = name.strip_prefix("node:").unwrap_or(name);
    DENY_LIST.contains(&bare)
}

/// Package filtering policy, taken per session from the engine limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackagePolicy {
    pub block_dangerous: bool,
    /// Fail the request instead of dropping disallowed packages.
    pub strict: bool,
}

impl Default for PackagePolicy {
    fn default() -> Self {
        Self {
            block_dangerous: true,
            strict: false,
        }
    }
}

impl PackagePolicy {
    /// Decide what to install. Only fails in strict mode.
    pub fn plan(&self, packages: &[String]) -> Result<InstallPlan, InstallError> {
        let mut plan = InstallPlan::default();
        for raw in packages {
            let reason = match parse_package(raw) {
                None => Some(FilterReason::InvalidPackageName),
                Some(spec) if self.block_dangerous && is_dangerous(&spec.name) => {
                    Some(FilterReason::DangerousPackage)
                }
                Some(spec) => {
                    if !plan.accepted.iter().any(|p| p.name == spec.name) {
                        plan.accepted.push(spec);
                    }
                    None
                }
            };
            if let Some(reason) = reason {
                if self.strict {
                    return Err(InstallError::PackageRejected {
                        package: raw.clone(),
                        reason,
                    });
                }
                plan.filtered.push(FilteredPackage {
                    package: raw.clone(),
                    reason,
                });
            }
        }
        Ok(plan)
    }
}

/// Package manager invocation. Runs from the sandbox directory and installs
/// whatever the manifest declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManager {
    pub program: String,
    pub args: Vec<String>,
}

impl PackageManager {
    /// npm pinned to `registry`, with audit, funding, lockfile and lifecycle
    /// scripts disabled.
    pub fn npm(program: impl Into<String>, registry: &str) -> Self {
        Self {
            program: program.into(),
            args: [
                "install",
                "--no-audit",
                "--no-fund",
                "--ignore-scripts",
                "--no-package-lock",
                "--registry",
                registry,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for PackageManager {
    fn default() -> Self {
        Self::npm("npm", super::DEFAULT_REGISTRY)
    }
}

/// Installs accepted packages into a sandbox.
#[derive(Debug, Clone, Default)]
pub struct DependencyInstaller {
    manager: PackageManager,
}

impl DependencyInstaller {
    pub fn new(manager: PackageManager) -> Self {
        Self { manager }
    }

    /// Add `packages` to the manifest in `sandbox` and run the package
    /// manager. A no-op for an empty list.
    pub async fn install(
        &self,
        sandbox: &Path,
        packages: &[PackageSpec],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        if packages.is_empty() {
            return Ok(());
        }

        let deps: Vec<(String, String)> = packages
            .iter()
            .map(|p| (p.name.clone(), p.range.clone()))
            .collect();
        manifest::add_dependencies(sandbox, &deps)
            .await
            .map_err(InstallError::Manifest)?;

        let mut child = process::sandboxed_command(&self.manager.program, sandbox, process::PROXY_ENV)
            .args(&self.manager.args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| InstallError::Spawn {
                program: self.manager.program.clone(),
                source,
            })?;

        let pid = child.id();
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| crate::exec::spawn_capped_reader(stderr, STDERR_TAIL_BYTES));

        tracing::info!(count = packages.len(), "Installing packages");

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                process::kill_and_reap(&mut child).await;
                return Err(InstallError::Cancelled);
            }
            _ = tokio::time::sleep(timeout) => {
                process::kill_and_reap(&mut child).await;
                return Err(InstallError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            status = child.wait() => status.map_err(InstallError::Wait)?,
        };
        // Lifecycle helpers the manager left running in its group.
        process::kill_group(pid);

        if status.success() {
            return Ok(());
        }
        let stderr = match stderr_task {
            Some(task) => crate::exec::join_capped_reader(task).await.unwrap_or_default(),
            None => String::new(),
        };
        Err(InstallError::Failed {
            code: status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}

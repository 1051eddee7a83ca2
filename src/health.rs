//! Host resource monitor used as an admission gate.
//!
//! Samples memory, CPU load and disk usage and compares them against
//! configured thresholds. A sample that cannot be taken counts as a
//! violation: the gate fails closed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Admission thresholds, in percent. A reading strictly above a threshold
/// is a violation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceThresholds {
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub disk_percent: f64,
}

const DEFAULT_THRESHOLD: f64 = 98.0;

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            memory_percent: DEFAULT_THRESHOLD,
            cpu_percent: DEFAULT_THRESHOLD,
            disk_percent: DEFAULT_THRESHOLD,
        }
    }
}

impl ResourceThresholds {
    /// Clamp every threshold into (0, 100]; non-positive values revert to
    /// the default.
    pub fn sanitized(self) -> Self {
        fn clamp(v: f64) -> f64 {
            if v.is_finite() && v > 0.0 {
                v.min(100.0)
            } else {
                DEFAULT_THRESHOLD
            }
        }
        Self {
            memory_percent: clamp(self.memory_percent),
            cpu_percent: clamp(self.cpu_percent),
            disk_percent: clamp(self.disk_percent),
        }
    }
}

/// One host sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostHealth {
    pub memory_used_percent: f64,
    /// One-minute load average normalized by CPU count, as a percentage.
    pub cpu_load_percent: f64,
    pub disk_used_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceViolation {
    MemoryCritical,
    CpuHigh,
    DiskCritical,
    SamplingFailed(String),
}

impl ResourceViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryCritical => "memory_critical",
            Self::CpuHigh => "cpu_high",
            Self::DiskCritical => "disk_critical",
            Self::SamplingFailed(_) => "sampling_failed",
        }
    }
}

impl std::fmt::Display for ResourceViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SamplingFailed(reason) => write!(f, "sampling_failed: {}", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Verdict of a resource check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitReport {
    pub safe: bool,
    pub violations: Vec<ResourceViolation>,
    /// The sample the verdict was computed from, when one was taken.
    pub health: Option<HostHealth>,
}

impl LimitReport {
    fn sampling_failed(reason: String) -> Self {
        Self {
            safe: false,
            violations: vec![ResourceViolation::SamplingFailed(reason)],
            health: None,
        }
    }

    /// Violation names, for logs and refusals.
    pub fn violation_names(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

/// Host health contract consulted before provisioning.
#[async_trait]
pub trait SystemHealth: Send + Sync {
    async fn check_resource_limits(&self) -> LimitReport;
}

/// Compare a sample against thresholds.
pub fn evaluate(health: HostHealth, thresholds: &ResourceThresholds) -> LimitReport {
    let mut violations = Vec::new();
    if health.memory_used_percent > thresholds.memory_percent {
        violations.push(ResourceViolation::MemoryCritical);
    }
    if health.cpu_load_percent > thresholds.cpu_percent {
        violations.push(ResourceViolation::CpuHigh);
    }
    if health.disk_used_percent > thresholds.disk_percent {
        violations.push(ResourceViolation::DiskCritical);
    }
    LimitReport {
        safe: violations.is_empty(),
        violations,
        health: Some(health),
    }
}

/// Samples the local host.
#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    thresholds: ResourceThresholds,
    disk_path: PathBuf,
}

impl ResourceMonitor {
    /// `disk_path` is the filesystem whose usage is checked, normally the
    /// sandbox root.
    pub fn new(thresholds: ResourceThresholds, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            thresholds: thresholds.sanitized(),
            disk_path: disk_path.into(),
        }
    }

    pub fn thresholds(&self) -> &ResourceThresholds {
        &self.thresholds
    }

    /// Take one blocking sample.
    pub fn sample(&self) -> Result<HostHealth, String> {
        Ok(HostHealth {
            memory_used_percent: sample_memory()?,
            cpu_load_percent: sample_cpu()?,
            disk_used_percent: sample_disk(&self.disk_path)?,
        })
    }
}

#[async_trait]
impl SystemHealth for ResourceMonitor {
    async fn check_resource_limits(&self) -> LimitReport {
        let monitor = self.clone();
        match tokio::task::spawn_blocking(move || monitor.sample()).await {
            Ok(Ok(health)) => evaluate(health, &self.thresholds),
            Ok(Err(reason)) => LimitReport::sampling_failed(reason),
            Err(join) => LimitReport::sampling_failed(format!("sampler task failed: {}", join)),
        }
    }
}

/// Always reports a healthy host. For hosts that gate admission elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl SystemHealth for AlwaysHealthy {
    async fn check_resource_limits(&self) -> LimitReport {
        LimitReport {
            safe: true,
            violations: Vec::new(),
            health: None,
        }
    }
}

/// Memory in use as a percentage, from `/proc/meminfo` text.
pub fn parse_meminfo(text: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        text.lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l[name.len()..].split_whitespace().next())
            .and_then(|v| v.parse().ok())
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f64 * 100.0 / total as f64)
}

/// One-minute load average from `/proc/loadavg`, normalized to a
/// percentage of `cpus`.
pub fn parse_loadavg(text: &str, cpus: usize) -> Option<f64> {
    let load: f64 = text.split_whitespace().next()?.parse().ok()?;
    if !load.is_finite() || cpus == 0 {
        return None;
    }
    Some(load * 100.0 / cpus as f64)
}

#[cfg(target_os = "linux")]
fn sample_memory() -> Result<f64, String> {
    let text = std::fs::read_to_string("/proc/meminfo")
        .map_err(|e| format!("read /proc/meminfo: {}", e))?;
    parse_meminfo(&text).ok_or_else(|| "unrecognized /proc/meminfo format".to_string())
}

#[cfg(target_os = "linux")]
fn sample_cpu() -> Result<f64, String> {
    let text = std::fs::read_to_string("/proc/loadavg")
        .map_err(|e| format!("read /proc/loadavg: {}", e))?;
    parse_loadavg(&text, num_cpus::get()).ok_or_else(|| "unrecognized /proc/loadavg format".to_string())
}

#[cfg(not(target_os = "linux"))]
fn sample_memory() -> Result<f64, String> {
    Err("memory sampling is not supported on this platform".to_string())
}

#[cfg(not(target_os = "linux"))]
fn sample_cpu() -> Result<f64, String> {
    Err("cpu sampling is not supported on this platform".to_string())
}

fn sample_disk(path: &Path) -> Result<f64, String> {
    // The sandbox root may not exist yet; measure the nearest existing ancestor.
    let probe = path
        .ancestors()
        .find(|p| p.exists())
        .ok_or_else(|| format!("no existing ancestor of {}", path.display()))?;
    let total = fs2::total_space(probe).map_err(|e| format!("disk total: {}", e))?;
    let available = fs2::available_space(probe).map_err(|e| format!("disk available: {}", e))?;
    if total == 0 {
        return Err("filesystem reports zero capacity".to_string());
    }
    Ok(total.saturating_sub(available) as f64 * 100.0 / total as f64)
}

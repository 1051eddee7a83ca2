//! Execution engine: the orchestrator over scanner, gate, sandbox,
//! installer and supervisor.
//!
//! One session runs strictly in order:
//!
//! ```text
//! admit -> resource check -> scan -> provision -> install -> execute -> cleanup
//! ```
//!
//! Admission happens before anything is acquired; the scan runs before a
//! directory exists, so rejected code never touches the filesystem. Once a
//! sandbox is provisioned it is torn down on every path, and teardown
//! errors are logged rather than returned.

mod error;

pub use error::{AdmissionRefusal, EngineError, ErrorCategory};

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tracing::Instrument;

use crate::config::{ConfigSource, EngineLimits};
use crate::exec::{ExecutionFailure, ExecutionResult, ExecutionSupervisor, ScriptRuntime};
use crate::health::{ResourceMonitor, ResourceThresholds, SystemHealth};
use crate::registry::{
    is_valid_session_id, SessionInfo, SessionMetadata, SessionPermit, SessionRegistry,
    SessionState,
};
use crate::sandbox::installer::{
    DependencyInstaller, FilterReason, InstallError, InstallPlan, PackageManager,
};
use crate::sandbox::{ProvisionedSandbox, SandboxConfig, SandboxProvisioner};
use crate::security::{
    AuditEvent, AuditSink, NullAuditSink, RiskScanner, ScanResult, ScannerConfig, Severity,
};
use crate::shutdown::{ShutdownCoordinator, ShutdownResult};
use crate::telemetry::{
    log_security_event, metrics, SecurityEvent, SessionSpan, SpanExt,
};

/// Static engine wiring. Per-session limits come from the
/// [`ConfigSource`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sandbox: SandboxConfig,
    pub runtime: ScriptRuntime,
    pub package_manager: PackageManager,
    pub thresholds: ResourceThresholds,
    /// Initial limits, used unless another config source is installed.
    pub limits: EngineLimits,
    /// Upper bound on one host resource check.
    pub health_check_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            runtime: ScriptRuntime::default(),
            package_manager: PackageManager::default(),
            thresholds: ResourceThresholds::default(),
            limits: EngineLimits::default(),
            health_check_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of [`ExecutionEngine::cleanup_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of [`ExecutionEngine::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// All sessions finished on their own within the timeout.
    pub drained: bool,
    /// Sessions force-cleaned after the timeout.
    pub forced: usize,
    pub cleanup_failures: usize,
}

/// The sandboxed code-execution engine.
pub struct ExecutionEngine {
    registry: SessionRegistry,
    provisioner: SandboxProvisioner,
    installer: DependencyInstaller,
    supervisor: ExecutionSupervisor,
    health: Arc<dyn SystemHealth>,
    audit: Arc<dyn AuditSink>,
    config_source: Arc<dyn ConfigSource>,
    shutdown: ShutdownCoordinator,
    health_check_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let registry = SessionRegistry::new();
        let health = ResourceMonitor::new(config.thresholds, config.sandbox.root.clone());
        Self {
            shutdown: ShutdownCoordinator::new(registry.clone()),
            registry,
            provisioner: SandboxProvisioner::new(config.sandbox),
            installer: DependencyInstaller::new(config.package_manager),
            supervisor: ExecutionSupervisor::new(config.runtime),
            health: Arc::new(health),
            audit: Arc::new(NullAuditSink),
            config_source: Arc::new(config.limits.sanitized()),
            health_check_timeout: config.health_check_timeout,
        }
    }

    /// Replace the host resource check.
    pub fn with_health(mut self, health: Arc<dyn SystemHealth>) -> Self {
        self.health = health;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replace where per-session limits come from.
    pub fn with_config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config_source = source;
        self
    }

    /// Scan code without running it. No side effects.
    pub fn scan_code(&self, code: &str) -> ScanResult {
        let limits = self.config_source.execution_limits();
        RiskScanner::new(limits.scanner_config()).scan(code)
    }

    /// Run `code` through the full pipeline.
    ///
    /// `session_id` is generated when absent. The sandbox is removed before
    /// this returns, whatever the outcome.
    pub async fn create_session(
        &self,
        session_id: Option<String>,
        packages: Vec<String>,
        code: &str,
    ) -> Result<ExecutionResult, EngineError> {
        let id = match session_id {
            Some(id) if is_valid_session_id(&id) => id,
            Some(id) => {
                let shown: String = id.chars().take(64).collect();
                self.emit(
                    SecurityEvent::InvalidSessionId,
                    "-",
                    "session id rejected",
                    &[("session_id", shown.as_str())],
                )
                .await;
                return Err(EngineError::InvalidSessionId(id));
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let limits = self.config_source.execution_limits().sanitized();
        let span = SessionSpan::new(&id, code, packages.len());
        let started = Instant::now();

        let result = self
            .run_session(&id, packages, code, &limits)
            .instrument(span.clone())
            .await;

        span.record("duration_ms", started.elapsed().as_millis() as u64);
        span.record_result(&result);
        metrics::record_session_outcome(match &result {
            Ok(r) if r.success => "completed",
            Ok(_) => "failed",
            Err(EngineError::ScanRejected { .. }) => "rejected",
            Err(EngineError::AdmissionRefused(_)) => "refused",
            Err(_) => "error",
        });
        result
    }

    async fn run_session(
        &self,
        id: &str,
        packages: Vec<String>,
        code: &str,
        limits: &EngineLimits,
    ) -> Result<ExecutionResult, EngineError> {
        let permit = self.admit(id, &packages, code, limits).await?;

        permit.transition(SessionState::Scanning);
        let scan = self.screen(id, code, limits.scanner_config()).await;
        if !scan.safe {
            permit.transition(SessionState::Rejected);
            return Err(EngineError::ScanRejected { scan });
        }

        let plan = match limits.package_policy().plan(&packages) {
            Ok(plan) => plan,
            Err(err) => {
                self.report_package_rejection(id, &err).await;
                permit.transition(SessionState::Rejected);
                return Err(err.into());
            }
        };
        self.report_filtered(id, &plan).await;

        // A force cleanup may already have released this session; nothing
        // may be acquired on its behalf after that.
        if permit.is_cancelled() {
            tracing::info!(session_id = %id, "Session cancelled before provisioning");
            return Ok(cancelled_result());
        }

        permit.transition(SessionState::Provisioning);
        let sandbox = match self.provisioner.provision(id).await {
            Ok(sandbox) => sandbox,
            Err(err) => {
                permit.transition(SessionState::Failed);
                return Err(err.into());
            }
        };
        permit.set_sandbox_path(Some(sandbox.path().to_path_buf()));
        if permit.is_cancelled() {
            // Cleanup ran while the directory was being created and could
            // not see its path.
            self.finish(permit, sandbox).await;
            return Ok(cancelled_result());
        }

        let outcome = self.install_and_run(id, &permit, &sandbox, &plan, code, limits).await;
        permit.transition(match &outcome {
            Ok(result) if result.success => SessionState::Completed,
            _ => SessionState::Failed,
        });

        self.finish(permit, sandbox).await;
        outcome
    }

    /// Concurrency gate then host resource check. A refusal leaves nothing
    /// registered.
    async fn admit(
        &self,
        id: &str,
        packages: &[String],
        code: &str,
        limits: &EngineLimits,
    ) -> Result<SessionPermit, EngineError> {
        let metadata = SessionMetadata {
            requested_packages: packages.to_vec(),
            code_size: code.len(),
        };
        let permit = match self
            .registry
            .admit(id, metadata, limits.max_concurrent_executions)
        {
            Ok(permit) => permit,
            Err(refusal) => {
                if let AdmissionRefusal::AtCapacity { active, max } = &refusal {
                    metrics::record_admission("at_capacity");
                    let (active, max) = (active.to_string(), max.to_string());
                    self.emit(
                        SecurityEvent::ConcurrencyLimitHit,
                        id,
                        "admission refused at concurrency limit",
                        &[("active", active.as_str()), ("max", max.as_str())],
                    )
                    .await;
                } else {
                    metrics::record_admission("refused");
                }
                return Err(refusal.into());
            }
        };

        let report = match tokio::time::timeout(
            self.health_check_timeout,
            self.health.check_resource_limits(),
        )
        .await
        {
            Ok(report) => report,
            Err(_) => {
                return Err(self
                    .refuse_resources(id, vec!["sampling_failed: health check timed out".to_string()])
                    .await)
            }
        };
        if !report.safe {
            return Err(self.refuse_resources(id, report.violation_names()).await);
        }

        metrics::record_admission("admitted");
        tracing::info!(session_id = %id, "Session admitted");
        Ok(permit)
    }

    async fn refuse_resources(&self, id: &str, violations: Vec<String>) -> EngineError {
        metrics::record_admission("resources");
        let joined = violations.join(",");
        self.emit(
            SecurityEvent::ResourceLimitHit,
            id,
            "admission refused by host resource check",
            &[("violations", joined.as_str())],
        )
        .await;
        AdmissionRefusal::ResourcesUnavailable { violations }.into()
    }

    /// Scan and report dangerous findings.
    async fn screen(&self, id: &str, code: &str, config: ScannerConfig) -> ScanResult {
        let scan = RiskScanner::new(config).scan(code);

        let flagged: Vec<&str> = scan
            .issues_at_least(Severity::High)
            .map(|i| i.kind.as_str())
            .collect();
        if !flagged.is_empty() {
            let kinds = flagged.join(",");
            let level = scan.risk_level.as_str();
            self.emit(
                SecurityEvent::DangerousPatternDetected,
                id,
                "dangerous patterns in submitted code",
                &[("kinds", kinds.as_str()), ("risk_level", level)],
            )
            .await;
        }
        if !scan.safe {
            let summary = scan.summary();
            self.emit(
                SecurityEvent::ScanRejected,
                id,
                "code rejected before provisioning",
                &[("summary", summary.as_str())],
            )
            .await;
        }
        scan
    }

    async fn report_package_rejection(&self, id: &str, err: &InstallError) {
        if let InstallError::PackageRejected { package, reason } = err {
            let event = match reason {
                FilterReason::DangerousPackage => SecurityEvent::DangerousPackageRejected,
                FilterReason::InvalidPackageName => SecurityEvent::InvalidPackageName,
            };
            self.emit(
                event,
                id,
                "request rejected by strict package policy",
                &[("package", package.as_str()), ("reason", reason.as_str())],
            )
            .await;
        }
    }

    async fn report_filtered(&self, id: &str, plan: &InstallPlan) {
        if plan.filtered.is_empty() {
            return;
        }
        metrics::record_packages_filtered(plan.filtered.len());
        for filtered in &plan.filtered {
            let event = match filtered.reason {
                FilterReason::DangerousPackage => SecurityEvent::DangerousPackageFiltered,
                FilterReason::InvalidPackageName => SecurityEvent::InvalidPackageName,
            };
            self.emit(
                event,
                id,
                "package removed from install set",
                &[
                    ("package", filtered.package.as_str()),
                    ("reason", filtered.reason.as_str()),
                ],
            )
            .await;
        }
    }

    async fn install_and_run(
        &self,
        id: &str,
        permit: &SessionPermit,
        sandbox: &ProvisionedSandbox,
        plan: &InstallPlan,
        code: &str,
        limits: &EngineLimits,
    ) -> Result<ExecutionResult, EngineError> {
        let cancel = permit.cancel_token();
        if cancel.is_cancelled() {
            return Ok(cancelled_result());
        }

        if !plan.accepted.is_empty() {
            permit.transition(SessionState::Installing);
            self.installer
                .install(sandbox.path(), &plan.accepted, limits.install_timeout(), &cancel)
                .await?;
        }

        if cancel.is_cancelled() {
            return Ok(cancelled_result());
        }

        permit.transition(SessionState::Running);
        let result = self
            .supervisor
            .run(sandbox.path(), code, &limits.resource_limits(), &cancel)
            .await?;
        metrics::record_execution_duration(result.duration_ms);

        match &result.failure {
            Some(ExecutionFailure::Timeout { timeout_ms }) => {
                let timeout = timeout_ms.to_string();
                let elapsed = result.duration_ms.to_string();
                self.emit(
                    SecurityEvent::ExecutionTimeout,
                    id,
                    "child killed at deadline",
                    &[("timeout_ms", timeout.as_str()), ("duration_ms", elapsed.as_str())],
                )
                .await;
            }
            Some(ExecutionFailure::OutputLimitExceeded { limit_bytes }) => {
                let limit = limit_bytes.to_string();
                self.emit(
                    SecurityEvent::OutputLimitExceeded,
                    id,
                    "child killed for output overflow",
                    &[("limit_bytes", limit.as_str())],
                )
                .await;
            }
            _ => {}
        }

        Ok(result)
    }

    /// Tear down and release. Never fails the request.
    async fn finish(&self, permit: SessionPermit, sandbox: ProvisionedSandbox) {
        permit.transition(SessionState::CleaningUp);
        if let Err(e) = sandbox.teardown().await {
            metrics::record_cleanup_failure();
            tracing::error!(session_id = %permit.id(), error = %e, "Sandbox cleanup failed");
        }
        permit.set_sandbox_path(None);
        permit.transition(SessionState::Terminated);
        permit.release();
    }

    /// Force-clean a session: cancel its work, remove its sandbox and free
    /// its slot. Idempotent; an unknown id reports success.
    pub async fn cleanup_session(&self, session_id: &str) -> CleanupReport {
        let path = self.registry.sandbox_path(session_id);
        let known = self.registry.cancel(session_id);

        let mut error = None;
        if let Some(path) = path {
            if let Err(e) = self.provisioner.teardown_path(&path).await {
                metrics::record_cleanup_failure();
                tracing::warn!(session_id, error = %e, "Force cleanup could not remove sandbox");
                error = Some(e.to_string());
            }
        }
        self.registry.release(session_id);

        if known {
            let outcome = if error.is_none() { "removed" } else { "failed" };
            self.emit(
                SecurityEvent::SessionForceCleaned,
                session_id,
                "session force-cleaned",
                &[("sandbox", outcome)],
            )
            .await;
        }

        CleanupReport {
            success: error.is_none(),
            error,
        }
    }

    /// Stop admitting, wait up to `timeout` for sessions to finish, then
    /// force-clean the rest.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        tracing::info!(active = self.registry.active_count(), "Engine shutting down");
        let drained = matches!(
            self.shutdown.initiate(timeout).await,
            ShutdownResult::Complete
        );

        let remaining = self.registry.session_ids();
        let forced = remaining.len();
        let reports = join_all(remaining.iter().map(|id| self.cleanup_session(id))).await;
        let cleanup_failures = reports.iter().filter(|r| !r.success).count();

        ShutdownReport {
            drained,
            forced,
            cleanup_failures,
        }
    }

    /// Snapshots of registered sessions.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.snapshot()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionInfo> {
        self.registry.get(session_id)
    }

    /// Sessions currently holding a concurrency slot.
    pub fn active_sessions(&self) -> usize {
        self.registry.active_count()
    }

    pub fn is_accepting(&self) -> bool {
        self.shutdown.is_accepting()
    }

    /// Write a security log line and forward an audit event.
    async fn emit(
        &self,
        event: SecurityEvent,
        session_id: &str,
        message: &str,
        details: &[(&str, &str)],
    ) {
        let mut log_details = Vec::with_capacity(details.len() + 1);
        log_details.push(("session_id", session_id));
        log_details.extend_from_slice(details);
        log_security_event(event, message, &log_details);

        let mut audit = AuditEvent::new(
            event.severity().to_audit(),
            event.category(),
            event.as_str(),
            message,
        )
        .with_session(session_id);
        for (key, value) in details {
            audit = audit.with_detail(*key, *value);
        }
        self.audit.log_security_event(audit).await;
    }
}

fn cancelled_result() -> ExecutionResult {
    ExecutionResult {
        success: false,
        output: String::new(),
        errors: None,
        exit_code: None,
        duration_ms: 0,
        failure: Some(ExecutionFailure::Cancelled),
    }
}

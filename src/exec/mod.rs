//! Execution supervisor.
//!
//! Runs submitted code as one child process inside a sandbox directory,
//! under a wall-clock deadline, a runtime memory ceiling and an incremental
//! stdout cap. The child is waited on exactly once on every path.
//!
//! ```text
//! Spawned -> Running -> Completed
//!                    -> TimedOut -> Killed
//!                    -> OutputExceeded -> Killed
//!                    -> Cancelled -> Killed
//!         -> SpawnError
//! ```

mod output;
pub(crate) mod process;

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use output::{drain_capped, CappedBuffer, CHUNK_SIZE};

/// How the submitted code is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRuntime {
    pub program: String,
    /// File the code is written to, relative to the sandbox.
    pub entry_file: String,
    /// Memory ceiling flag; `{mb}` is replaced with the limit.
    pub memory_flag: Option<String>,
}

impl ScriptRuntime {
    /// Node.js with a V8 heap ceiling.
    pub fn node(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            entry_file: "index.js".to_string(),
            memory_flag: Some("--max-old-space-size={mb}".to_string()),
        }
    }

    /// POSIX shell. No memory flag.
    pub fn shell() -> Self {
        Self {
            program: "sh".to_string(),
            entry_file: "main.sh".to_string(),
            memory_flag: None,
        }
    }

    /// Arguments for one run under `limits`.
    pub fn args(&self, limits: &ResourceLimits) -> Vec<String> {
        let mut args = Vec::with_capacity(2);
        if let Some(flag) = &self.memory_flag {
            args.push(flag.replace("{mb}", &limits.max_memory_mb.to_string()));
        }
        args.push(self.entry_file.clone());
        args
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::node("node")
    }
}

/// Limits for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub timeout: Duration,
    pub max_memory_mb: u64,
    pub max_output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_memory_mb: 512,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionFailure {
    /// Killed at the wall-clock deadline.
    #[serde(rename = "execution_timeout")]
    Timeout { timeout_ms: u64 },
    /// Killed the moment stdout passed the cap.
    OutputLimitExceeded { limit_bytes: usize },
    NonZeroExit { code: i32 },
    /// Terminated by a signal the supervisor did not send.
    AbnormalExit { signal: Option<i32> },
    /// Killed because the session was force-cleaned.
    Cancelled,
}

impl ExecutionFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "execution_timeout",
            Self::OutputLimitExceeded { .. } => "output_limit_exceeded",
            Self::NonZeroExit { .. } => "non_zero_exit",
            Self::AbnormalExit { .. } => "abnormal_exit",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { timeout_ms } => write!(f, "timed out after {}ms", timeout_ms),
            Self::OutputLimitExceeded { limit_bytes } => {
                write!(f, "output exceeded {} bytes", limit_bytes)
            }
            Self::NonZeroExit { code } => write!(f, "exited with code {}", code),
            Self::AbnormalExit { signal: Some(sig) } => write!(f, "terminated by signal {}", sig),
            Self::AbnormalExit { signal: None } => f.write_str("terminated abnormally"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome of one run. Partial output is kept on every failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Captured stdout, at most `max_output_bytes` bytes.
    pub output: String,
    /// Captured stderr, `None` when empty.
    pub errors: Option<String>,
    /// `None` when the process was killed.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub failure: Option<ExecutionFailure>,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to write entry file {path}: {source}")]
    WriteEntry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Child process pipe unavailable")]
    MissingPipe,

    #[error("Failed waiting on child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// How long stdout may stay open once the child itself has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

enum Stop {
    Exited(ExitStatus),
    TimedOut,
    OutputExceeded,
    Cancelled,
}

/// Spawns and supervises the child for one session.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSupervisor {
    runtime: ScriptRuntime,
}

impl ExecutionSupervisor {
    pub fn new(runtime: ScriptRuntime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    /// Write `code` into the sandbox and run it under `limits`.
    ///
    /// Errors are reserved for failures to start or observe the child;
    /// everything the child itself does ends up in the [`ExecutionResult`].
    pub async fn run(
        &self,
        sandbox: &Path,
        code: &str,
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SupervisorError> {
        let entry = sandbox.join(&self.runtime.entry_file);
        tokio::fs::write(&entry, code)
            .await
            .map_err(|source| SupervisorError::WriteEntry {
                path: entry.clone(),
                source,
            })?;

        let started = Instant::now();
        let mut child = process::sandboxed_command(&self.runtime.program, sandbox, &[])
            .args(self.runtime.args(limits))
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: self.runtime.program.clone(),
                source,
            })?;

        let pid = child.id();
        let (Some(mut stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            process::kill_and_reap(&mut child).await;
            return Err(SupervisorError::MissingPipe);
        };
        let stderr_task = spawn_capped_reader(stderr, limits.max_output_bytes);

        let mut out = CappedBuffer::new(limits.max_output_bytes);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut stdout_open = true;
        let mut exited: Option<ExitStatus> = None;
        let deadline = tokio::time::sleep(limits.timeout);
        tokio::pin!(deadline);
        let drain = tokio::time::sleep(limits.timeout);
        tokio::pin!(drain);

        let stop = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Stop::Cancelled,
                _ = &mut deadline, if exited.is_none() => break Stop::TimedOut,
                read = stdout.read(&mut chunk), if stdout_open => match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => {
                        if out.push(&chunk[..n]) {
                            break Stop::OutputExceeded;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdout read failed");
                        stdout_open = false;
                    }
                },
                status = child.wait(), if exited.is_none() => match status {
                    Ok(status) => {
                        exited = Some(status);
                        drain.as_mut().reset(tokio::time::Instant::now() + DRAIN_GRACE);
                    }
                    Err(e) => {
                        process::kill_group(pid);
                        process::kill_and_reap(&mut child).await;
                        return Err(SupervisorError::Wait(e));
                    }
                },
                // The child is gone but something in its group still holds
                // stdout open.
                _ = &mut drain, if exited.is_some() => {
                    tracing::debug!(?pid, "stdout still open after child exit");
                    stdout_open = false;
                }
            }
            if let (false, Some(status)) = (stdout_open, exited) {
                break Stop::Exited(status);
            }
        };

        // Nothing started by the child may outlive the run.
        process::kill_group(pid);
        let (exit_code, failure) = match stop {
            Stop::Exited(status) => match status.code() {
                Some(0) => (Some(0), None),
                Some(code) => (Some(code), Some(ExecutionFailure::NonZeroExit { code })),
                None => (
                    None,
                    Some(ExecutionFailure::AbnormalExit {
                        signal: process::termination_signal(&status),
                    }),
                ),
            },
            killed => {
                process::kill_and_reap(&mut child).await;
                let failure = match killed {
                    Stop::TimedOut => ExecutionFailure::Timeout {
                        timeout_ms: limits.timeout.as_millis() as u64,
                    },
                    Stop::OutputExceeded => ExecutionFailure::OutputLimitExceeded {
                        limit_bytes: limits.max_output_bytes,
                    },
                    _ => ExecutionFailure::Cancelled,
                };
                (None, Some(failure))
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        drop(stdout);

        let errors = join_capped_reader(stderr_task).await;

        tracing::debug!(
            duration_ms,
            exit_code,
            failure = failure.as_ref().map(|f| f.as_str()),
            stdout_bytes = out.len(),
            "Child finished"
        );

        Ok(ExecutionResult {
            success: failure.is_none(),
            output: out.into_string(),
            errors,
            exit_code,
            duration_ms,
            failure,
        })
    }
}

/// Drain a child pipe in the background, keeping the first `cap` bytes.
pub(crate) fn spawn_capped_reader<R>(reader: R, cap: usize) -> CappedReader
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(drain_capped(reader, cap))
}

pub(crate) type CappedReader = tokio::task::JoinHandle<std::io::Result<CappedBuffer>>;

/// Collect a background reader's text, waiting at most the reap grace
/// period. `None` when nothing was captured.
pub(crate) async fn join_capped_reader(task: CappedReader) -> Option<String> {
    let abort = task.abort_handle();
    match tokio::time::timeout(process::REAP_GRACE, task).await {
        Ok(Ok(Ok(buffer))) => {
            let text = buffer.into_string();
            (!text.is_empty()).then_some(text)
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(error = %e, "pipe read failed");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "pipe reader task failed");
            None
        }
        Err(_) => {
            abort.abort();
            None
        }
    }
}

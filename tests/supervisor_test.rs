//! Tests for the execution supervisor, using the shell runtime.

#![cfg(unix)]

use std::time::{Duration, Instant};

use gg_sandbox::exec::{ExecutionFailure, ExecutionSupervisor, ResourceLimits, ScriptRuntime};
use tokio_util::sync::CancellationToken;

fn limits(timeout_ms: u64, max_output_bytes: usize) -> ResourceLimits {
    ResourceLimits {
        timeout: Duration::from_millis(timeout_ms),
        max_memory_mb: 64,
        max_output_bytes,
    }
}

async fn run(code: &str, limits: &ResourceLimits) -> gg_sandbox::ExecutionResult {
    let dir = tempfile::tempdir().unwrap();
    ExecutionSupervisor::new(ScriptRuntime::shell())
        .run(dir.path(), code, limits, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_success_captures_both_streams() {
    let result = run("echo out; echo err >&2", &limits(5000, 1024)).await;
    assert!(result.success);
    assert_eq!(result.output, "out\n");
    assert_eq!(result.errors.as_deref(), Some("err\n"));
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
async fn test_empty_stderr_is_none() {
    let result = run("printf done", &limits(5000, 1024)).await;
    assert_eq!(result.output, "done");
    assert!(result.errors.is_none());
}

#[tokio::test]
async fn test_timeout_within_tolerance() {
    let result = run("while :; do :; done", &limits(1000, 1024)).await;
    assert!(!result.success);
    assert_eq!(result.failure, Some(ExecutionFailure::Timeout { timeout_ms: 1000 }));
    assert_eq!(result.exit_code, None);
    assert!(
        (800..=1200).contains(&result.duration_ms),
        "duration {}ms",
        result.duration_ms
    );
}

#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let result = run("echo before; sleep 10", &limits(300, 1024)).await;
    assert_eq!(result.failure, Some(ExecutionFailure::Timeout { timeout_ms: 300 }));
    assert_eq!(result.output, "before\n");
}

#[tokio::test]
async fn test_timeout_kills_grandchildren() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let code = "(sleep 1; touch marker) & wait";

    let started = Instant::now();
    let result = ExecutionSupervisor::new(ScriptRuntime::shell())
        .run(dir.path(), code, &limits(200, 1024), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(result.failure, Some(ExecutionFailure::Timeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "background child survived the group kill");
}

#[tokio::test]
async fn test_exit_seen_while_background_child_holds_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let code = "echo hi\n(sleep 1; touch marker) &\nexit 0\n";

    let result = ExecutionSupervisor::new(ScriptRuntime::shell())
        .run(dir.path(), code, &limits(5000, 1024), &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.failure);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.output, "hi\n");
    assert!(result.duration_ms < 1000, "duration {}ms", result.duration_ms);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "background child outlived the run");
}

#[tokio::test]
async fn test_non_zero_exit_seen_while_background_child_holds_stdout() {
    let result = run("sleep 5 &\nexit 7\n", &limits(5000, 1024)).await;
    assert_eq!(result.exit_code, Some(7));
    assert_eq!(result.failure, Some(ExecutionFailure::NonZeroExit { code: 7 }));
    assert!(result.duration_ms < 1000, "duration {}ms", result.duration_ms);
}

#[tokio::test]
async fn test_output_cap_stops_flood() {
    let cap = 8 * 1024;
    let result = run("yes hello", &limits(10_000, cap)).await;
    assert!(!result.success);
    assert_eq!(
        result.failure,
        Some(ExecutionFailure::OutputLimitExceeded { limit_bytes: cap })
    );
    assert!(result.output.len() <= cap);
    assert!(result.duration_ms < 5000);
}

#[tokio::test]
async fn test_output_at_cap_is_fine() {
    let result = run("printf 'abcd'", &limits(5000, 4)).await;
    assert!(result.success, "{:?}", result.failure);
    assert_eq!(result.output, "abcd");
}

#[tokio::test]
async fn test_non_zero_exit() {
    let result = run("exit 42", &limits(5000, 1024)).await;
    assert!(!result.success);
    assert_eq!(result.exit_code, Some(42));
    assert_eq!(result.failure, Some(ExecutionFailure::NonZeroExit { code: 42 }));
}

#[tokio::test]
async fn test_self_signal_is_abnormal_exit() {
    let result = run("kill -9 $$", &limits(5000, 1024)).await;
    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    assert_eq!(
        result.failure,
        Some(ExecutionFailure::AbnormalExit { signal: Some(9) })
    );
}

#[tokio::test]
async fn test_cancel_stops_child() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = ExecutionSupervisor::new(ScriptRuntime::shell())
        .run(dir.path(), "sleep 30", &limits(60_000, 1024), &cancel)
        .await
        .unwrap();
    assert_eq!(result.failure, Some(ExecutionFailure::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_environment_is_scoped_to_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    let result = ExecutionSupervisor::new(ScriptRuntime::shell())
        .run(
            dir.path(),
            "echo \"$HOME\"; pwd",
            &limits(5000, 4096),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let lines: Vec<&str> = result.output.lines().collect();
    let canonical = dir.path().canonicalize().unwrap();
    assert_eq!(lines[0], dir.path().to_str().unwrap());
    assert_eq!(std::path::Path::new(lines[1]).canonicalize().unwrap(), canonical);
}

#[tokio::test]
async fn test_missing_runtime_is_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = ScriptRuntime {
        program: "gg-sandbox-no-such-runtime".to_string(),
        ..ScriptRuntime::shell()
    };
    let err = ExecutionSupervisor::new(runtime)
        .run(dir.path(), "echo hi", &limits(1000, 1024), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("gg-sandbox-no-such-runtime"));
}

#[test]
fn test_node_runtime_args() {
    let args = ScriptRuntime::node("node").args(&limits(1000, 1024));
    assert_eq!(args, vec!["--max-old-space-size=64", "index.js"]);
    let args = ScriptRuntime::shell().args(&limits(1000, 1024));
    assert_eq!(args, vec!["main.sh"]);
}

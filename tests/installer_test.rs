//! Tests for package filtering and the dependency installer.

use std::time::{Duration, Instant};

use gg_sandbox::sandbox::installer::{
    is_dangerous, parse_package, DependencyInstaller, FilterReason, InstallError, PackageManager,
    PackagePolicy, PackageSpec,
};
use gg_sandbox::sandbox::manifest::Manifest;
use gg_sandbox::sandbox::{SandboxConfig, SandboxProvisioner};
use tokio_util::sync::CancellationToken;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn spec(name: &str) -> PackageSpec {
    parse_package(name).unwrap()
}

#[test]
fn test_deny_list_covers_builtins_and_spawners() {
    for name in ["fs", "node:fs", "child_process", "net", "shelljs", "execa", "express", "ws"] {
        assert!(is_dangerous(name), "{} not deny-listed", name);
    }
    for name in ["lodash", "dayjs", "fs-utils-lite", "@types/node"] {
        assert!(!is_dangerous(name), "{} wrongly deny-listed", name);
    }
}

#[test]
fn test_plan_filters_dangerous_and_invalid() {
    let policy = PackagePolicy::default();
    let plan = policy
        .plan(&strings(&["lodash@^4.17.0", "fs", "../escape", "dayjs", "lodash"]))
        .unwrap();

    let accepted: Vec<&str> = plan.accepted.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(accepted, vec!["lodash", "dayjs"]);
    assert_eq!(plan.accepted[0].range, "^4.17.0");

    assert_eq!(plan.filtered.len(), 2);
    assert_eq!(plan.filtered[0].package, "fs");
    assert_eq!(plan.filtered[0].reason, FilterReason::DangerousPackage);
    assert_eq!(plan.filtered[1].package, "../escape");
    assert_eq!(plan.filtered[1].reason, FilterReason::InvalidPackageName);
}

#[test]
fn test_plan_without_blocking_keeps_deny_listed() {
    let policy = PackagePolicy {
        block_dangerous: false,
        strict: false,
    };
    let plan = policy.plan(&strings(&["express"])).unwrap();
    assert_eq!(plan.accepted.len(), 1);
    assert!(plan.filtered.is_empty());
}

#[test]
fn test_strict_plan_rejects() {
    let policy = PackagePolicy {
        block_dangerous: true,
        strict: true,
    };
    let err = policy.plan(&strings(&["lodash", "child_process"])).unwrap_err();
    match err {
        InstallError::PackageRejected { package, reason } => {
            assert_eq!(package, "child_process");
            assert_eq!(reason, FilterReason::DangerousPackage);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_install_is_noop() {
    let installer = DependencyInstaller::new(PackageManager {
        program: "definitely-not-a-real-binary".to_string(),
        args: Vec::new(),
    });
    let dir = tempfile::tempdir().unwrap();
    installer
        .install(dir.path(), &[], Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap();
}

#[cfg(unix)]
mod process {
    use super::*;

    async fn sandbox(root: &std::path::Path) -> gg_sandbox::sandbox::ProvisionedSandbox {
        SandboxProvisioner::new(SandboxConfig {
            root: root.to_path_buf(),
            ..Default::default()
        })
        .provision("install")
        .await
        .unwrap()
    }

    fn manager(program: &str, args: &[&str]) -> DependencyInstaller {
        DependencyInstaller::new(PackageManager {
            program: program.to_string(),
            args: strings(args),
        })
    }

    #[tokio::test]
    async fn test_install_success_updates_manifest() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path()).await;

        manager("sh", &["-c", "test -f package.json"])
            .install(
                sandbox.path(),
                &[spec("lodash@^4"), spec("dayjs")],
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let manifest = Manifest::read(sandbox.path()).await.unwrap();
        assert_eq!(manifest.dependencies.get("lodash").map(String::as_str), Some("^4"));
        assert_eq!(manifest.dependencies.get("dayjs").map(String::as_str), Some("latest"));
        sandbox.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_install_failure_carries_exit_code() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path()).await;

        let err = manager("sh", &["-c", "exit 3"])
            .install(
                sandbox.path(),
                &[spec("lodash")],
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Failed { code: Some(3), .. }));
        sandbox.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_install_timeout_kills_manager() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path()).await;

        let started = Instant::now();
        let err = manager("sleep", &["5"])
            .install(
                sandbox.path(),
                &[spec("lodash")],
                Duration::from_millis(200),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Timeout { timeout_ms: 200 }));
        assert!(started.elapsed() < Duration::from_secs(3));
        sandbox.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_install_cancelled() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path()).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = manager("sleep", &["5"])
            .install(sandbox.path(), &[spec("lodash")], Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Cancelled));
        sandbox.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_manager_is_spawn_error() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path()).await;

        let err = manager("gg-sandbox-no-such-manager", &[])
            .install(
                sandbox.path(),
                &[spec("lodash")],
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Spawn { .. }));
        sandbox.teardown().await.unwrap();
    }
}

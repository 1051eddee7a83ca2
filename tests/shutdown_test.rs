//! Tests for graceful shutdown coordination.

use std::time::Duration;

use gg_sandbox::engine::AdmissionRefusal;
use gg_sandbox::registry::{SessionMetadata, SessionRegistry};
use gg_sandbox::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};

#[tokio::test]
async fn test_initial_state_is_running() {
    let coordinator = ShutdownCoordinator::new(SessionRegistry::new());
    assert_eq!(coordinator.state(), ShutdownState::Running);
    assert!(coordinator.is_accepting());
}

#[tokio::test]
async fn test_empty_registry_drains_immediately() {
    let coordinator = ShutdownCoordinator::new(SessionRegistry::new());
    let result = coordinator.initiate(Duration::from_secs(5)).await;
    assert_eq!(result, ShutdownResult::Complete);
    assert_eq!(coordinator.state(), ShutdownState::Stopped);
    assert!(!coordinator.is_accepting());
}

#[tokio::test]
async fn test_drain_waits_for_release() {
    let registry = SessionRegistry::new();
    let permit = registry.admit("busy", SessionMetadata::default(), 2).unwrap();
    let coordinator = ShutdownCoordinator::new(registry.clone());

    let handle = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.initiate(Duration::from_secs(5)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.state(), ShutdownState::Draining);
    assert_eq!(
        registry.admit("late", SessionMetadata::default(), 2).unwrap_err(),
        AdmissionRefusal::ShuttingDown
    );

    permit.release();
    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, ShutdownResult::Complete);
}

#[tokio::test]
async fn test_drain_timeout_reports_remaining() {
    let registry = SessionRegistry::new();
    let _a = registry.admit("a", SessionMetadata::default(), 3).unwrap();
    let _b = registry.admit("b", SessionMetadata::default(), 3).unwrap();
    let coordinator = ShutdownCoordinator::new(registry);

    let result = coordinator.initiate(Duration::from_millis(100)).await;
    assert_eq!(result, ShutdownResult::Timeout { remaining: 2 });
    assert_eq!(coordinator.state(), ShutdownState::Stopped);
}

#[tokio::test]
async fn test_drain_survives_several_releases() {
    let registry = SessionRegistry::new();
    let permits: Vec<_> = (0..3)
        .map(|i| {
            registry
                .admit(&format!("s{}", i), SessionMetadata::default(), 3)
                .unwrap()
        })
        .collect();
    let coordinator = ShutdownCoordinator::new(registry);

    let handle = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.initiate(Duration::from_secs(5)).await })
    };

    for permit in permits {
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(permit);
    }
    assert_eq!(handle.await.unwrap(), ShutdownResult::Complete);
}

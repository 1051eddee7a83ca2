//! Graceful shutdown coordination.
//!
//! Stops admission, then waits for registered sessions to drain before the
//! host force-cleans whatever is left.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::registry::SessionRegistry;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Result of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: usize },
}

/// Drains a session registry.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    state: Arc<RwLock<ShutdownState>>,
    registry: SessionRegistry,
}

impl ShutdownCoordinator {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            state: Arc::new(RwLock::new(ShutdownState::Running)),
            registry,
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.read()
    }

    /// Check if accepting new sessions.
    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Stop admission and wait up to `timeout` for sessions to finish.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        *self.state.write() = ShutdownState::Draining;
        self.registry.close();

        let result = self.wait_for_drain(timeout).await;

        *self.state.write() = ShutdownState::Stopped;
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register for the wakeup before reading the count so a release
            // in between is not missed.
            let changed = self.registry.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let count = self.registry.active_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }

            tokio::select! {
                _ = &mut changed => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    let remaining = self.registry.active_count();
                    if remaining == 0 {
                        return ShutdownResult::Complete;
                    }
                    return ShutdownResult::Timeout { remaining };
                }
            }
        }
    }
}

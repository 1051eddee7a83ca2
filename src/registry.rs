//! Concurrency gate and session registry.
//!
//! The registry is the single source of truth for which sessions exist and
//! is the only shared mutable state in the engine. One mutex guards the map
//! and the admission count together, so check-and-insert is atomic.
//!
//! A concurrency slot is held from admission until the session's
//! [`SessionPermit`] is released or dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::engine::AdmissionRefusal;
use crate::telemetry::metrics;

/// Longest accepted caller-supplied session id.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Session ids become directory names, so only `[A-Za-z0-9_-]` is allowed.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Admitted,
    Scanning,
    Rejected,
    Provisioning,
    Installing,
    Running,
    Completed,
    Failed,
    CleaningUp,
    Terminated,
}

impl SessionState {
    /// States in which the session owns a sandbox and may own a child.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Installing | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Completed | Self::Failed | Self::Terminated
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::Scanning => "scanning",
            Self::Rejected => "rejected",
            Self::Provisioning => "provisioning",
            Self::Installing => "installing",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::CleaningUp => "cleaning_up",
            Self::Terminated => "terminated",
        }
    }
}

/// Request metadata recorded at admission.
#[derive(Debug, Clone, Default)]
pub struct SessionMetadata {
    pub requested_packages: Vec<String>,
    pub code_size: usize,
}

#[derive(Debug)]
struct SessionRecord {
    state: SessionState,
    metadata: SessionMetadata,
    started_at: DateTime<Utc>,
    sandbox_path: Option<PathBuf>,
    generation: u64,
    cancel: CancellationToken,
}

/// Serializable snapshot of a registered session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub state: SessionState,
    pub requested_packages: Vec<String>,
    pub code_size: usize,
    pub started_at: DateTime<Utc>,
    pub sandbox_path: Option<PathBuf>,
}

impl SessionInfo {
    fn from_record(id: &str, record: &SessionRecord) -> Self {
        Self {
            id: id.to_string(),
            state: record.state,
            requested_packages: record.metadata.requested_packages.clone(),
            code_size: record.metadata.code_size,
            started_at: record.started_at,
            sandbox_path: record.sandbox_path.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<String, SessionRecord>,
    next_generation: u64,
    closed: bool,
}

/// Shared session registry. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    changed: Arc<Notify>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a session if fewer than `max` are registered.
    ///
    /// Every registered session counts against `max`, whatever its state,
    /// not only those reported by [`live_count`](Self::live_count). A
    /// session that is still Admitted or Scanning already holds its slot, so
    /// a burst of `max + 1` concurrent admissions refuses exactly one and
    /// provisioning can never exceed `max`.
    ///
    /// Refusal leaves the registry untouched.
    pub fn admit(
        &self,
        id: &str,
        metadata: SessionMetadata,
        max: usize,
    ) -> Result<SessionPermit, AdmissionRefusal> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Err(AdmissionRefusal::ShuttingDown);
        }
        if inner.sessions.contains_key(id) {
            return Err(AdmissionRefusal::DuplicateSession(id.to_string()));
        }
        let active = inner.sessions.len();
        if active >= max {
            return Err(AdmissionRefusal::AtCapacity { active, max });
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let cancel = CancellationToken::new();
        inner.sessions.insert(
            id.to_string(),
            SessionRecord {
                state: SessionState::Admitted,
                metadata,
                started_at: Utc::now(),
                sandbox_path: None,
                generation,
                cancel: cancel.clone(),
            },
        );
        metrics::record_active_sessions(inner.sessions.len());

        Ok(SessionPermit {
            id: id.to_string(),
            generation,
            cancel,
            registry: self.clone(),
            released: false,
        })
    }

    /// Remove a session, freeing its slot. Safe to call any number of times;
    /// returns whether a record was removed.
    pub fn release(&self, id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.sessions.remove(id).is_some();
            if removed {
                metrics::record_active_sessions(inner.sessions.len());
            }
            removed
        };
        if removed {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Remove only if the record still belongs to `generation`, so a stale
    /// permit cannot release a newer session that reused the id.
    fn release_generation(&self, id: &str, generation: u64) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            match inner.sessions.get(id) {
                Some(record) if record.generation == generation => {
                    inner.sessions.remove(id);
                    metrics::record_active_sessions(inner.sessions.len());
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.changed.notify_waiters();
        }
        removed
    }

    fn update(&self, id: &str, generation: u64, f: impl FnOnce(&mut SessionRecord)) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.sessions.get_mut(id) {
            if record.generation == generation {
                f(record);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        let inner = self.inner.lock();
        inner.sessions.get(id).map(|r| SessionInfo::from_record(id, r))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().sessions.contains_key(id)
    }

    /// Sessions holding a concurrency slot.
    pub fn active_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Sessions in Provisioning, Installing or Running. Reporting only;
    /// admission counts every registered session.
    pub fn live_count(&self) -> usize {
        self.inner
            .lock()
            .sessions
            .values()
            .filter(|r| r.state.is_live())
            .count()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.inner.lock().sessions.keys().cloned().collect()
    }

    /// Snapshots of every registered session, oldest first.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let inner = self.inner.lock();
        let mut infos: Vec<SessionInfo> = inner
            .sessions
            .iter()
            .map(|(id, r)| SessionInfo::from_record(id, r))
            .collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// Cancel a session's in-flight work. Returns false if unknown.
    pub fn cancel(&self, id: &str) -> bool {
        let inner = self.inner.lock();
        match inner.sessions.get(id) {
            Some(record) => {
                record.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Sandbox path recorded for a session, if any.
    pub fn sandbox_path(&self, id: &str) -> Option<PathBuf> {
        self.inner
            .lock()
            .sessions
            .get(id)
            .and_then(|r| r.sandbox_path.clone())
    }

    /// Refuse all further admissions.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Resolves after the next release.
    pub(crate) fn changed(&self) -> tokio::sync::futures::Notified<'_> {
        self.changed.notified()
    }
}

/// Proof of admission. Dropping it releases the slot if the orchestrator
/// has not already done so.
#[derive(Debug)]
pub struct SessionPermit {
    id: String,
    generation: u64,
    cancel: CancellationToken,
    registry: SessionRegistry,
    released: bool,
}

impl SessionPermit {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transition(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id, state = state.as_str(), "Session transition");
        self.registry
            .update(&self.id, self.generation, |r| r.state = state);
    }

    pub fn set_sandbox_path(&self, path: Option<PathBuf>) {
        self.registry
            .update(&self.id, self.generation, |r| r.sandbox_path = path);
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Release the slot now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release_generation(&self.id, self.generation);
        }
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SessionMetadata {
        SessionMetadata {
            requested_packages: vec!["lodash".to_string()],
            code_size: 17,
        }
    }

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("abc-123_XYZ"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../etc"));
        assert!(!is_valid_session_id("a b"));
        assert!(!is_valid_session_id(&"a".repeat(MAX_SESSION_ID_LEN + 1)));
        assert!(is_valid_session_id(&"a".repeat(MAX_SESSION_ID_LEN)));
    }

    #[test]
    fn test_admit_until_capacity() {
        let registry = SessionRegistry::new();
        let a = registry.admit("a", meta(), 2).unwrap();
        let _b = registry.admit("b", meta(), 2).unwrap();
        assert_eq!(
            registry.admit("c", meta(), 2).unwrap_err(),
            AdmissionRefusal::AtCapacity { active: 2, max: 2 }
        );
        drop(a);
        assert!(registry.admit("c", meta(), 2).is_ok());
    }

    #[test]
    fn test_duplicate_refused() {
        let registry = SessionRegistry::new();
        let _a = registry.admit("a", meta(), 5).unwrap();
        assert_eq!(
            registry.admit("a", meta(), 5).unwrap_err(),
            AdmissionRefusal::DuplicateSession("a".to_string())
        );
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = SessionRegistry::new();
        let permit = registry.admit("a", meta(), 1).unwrap();
        assert!(registry.release("a"));
        assert!(!registry.release("a"));
        drop(permit);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_stale_permit_does_not_release_newer_session() {
        let registry = SessionRegistry::new();
        let old = registry.admit("a", meta(), 2).unwrap();
        registry.release("a");
        let _new = registry.admit("a", meta(), 2).unwrap();
        drop(old);
        assert!(registry.contains("a"));
    }

    #[test]
    fn test_live_count_tracks_states() {
        let registry = SessionRegistry::new();
        let a = registry.admit("a", meta(), 3).unwrap();
        let b = registry.admit("b", meta(), 3).unwrap();
        assert_eq!(registry.live_count(), 0);
        a.transition(SessionState::Provisioning);
        b.transition(SessionState::Running);
        assert_eq!(registry.live_count(), 2);
        b.transition(SessionState::Completed);
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_snapshot_and_cancel() {
        let registry = SessionRegistry::new();
        let permit = registry.admit("a", meta(), 1).unwrap();
        permit.set_sandbox_path(Some(PathBuf::from("/tmp/x")));
        let info = registry.get("a").unwrap();
        assert_eq!(info.state, SessionState::Admitted);
        assert_eq!(info.code_size, 17);
        assert_eq!(info.sandbox_path, Some(PathBuf::from("/tmp/x")));
        assert!(registry.cancel("a"));
        assert!(permit.is_cancelled());
        assert!(!registry.cancel("missing"));
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_closed_registry_refuses() {
        let registry = SessionRegistry::new();
        registry.close();
        assert_eq!(
            registry.admit("a", meta(), 1).unwrap_err(),
            AdmissionRefusal::ShuttingDown
        );
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionState::CleaningUp).unwrap(),
            "\"cleaning_up\""
        );
    }
}

//! Session Registry
//!
//! Single source of truth mapping [`SessionKey`] to its live [`Session`] and
//! caller count. `acquire` and `release` each run under one write lock with
//! no await inside the critical section, so membership and counts always
//! change together and no caller can observe a half-applied update.

use crate::config::CoordinatorConfig;
use crate::errors::{Result, SessionError};
use crate::session::{Session, SessionDeps};
use crate::types::{InitData, SessionKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Snapshot of registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Sessions currently registered
    pub active_sessions: usize,
    /// Sum of caller counts across live sessions
    pub total_callers: usize,
    /// Sessions created since startup
    pub sessions_created: u64,
    /// Sessions torn down since startup
    pub sessions_destroyed: u64,
}

/// What a `release` did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other callers remain attached
    Remaining(usize),
    /// The last caller left and the session was stopped
    Destroyed,
}

struct SessionEntry {
    session: Arc<Session>,
    caller_count: usize,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionKey, SessionEntry>,
    sessions_created: u64,
    sessions_destroyed: u64,
}

/// Reference-counted map of live sessions
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    deps: SessionDeps,
    config: Arc<CoordinatorConfig>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps, config: Arc<CoordinatorConfig>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            deps,
            config,
        }
    }

    /// Join the session for `init`'s key, creating and initializing it if
    /// this is the first caller
    pub async fn acquire(&self, init: &InitData) -> Arc<Session> {
        let key = init.session_key();
        let mut inner = self.inner.write().await;

        if let Some(entry) = inner.sessions.get_mut(&key) {
            entry.caller_count += 1;
            debug!(session_key = %key, callers = entry.caller_count, "Joined existing session");
            return Arc::clone(&entry.session);
        }

        let session = Session::start(init.clone(), self.deps.clone(), Arc::clone(&self.config));
        inner.sessions.insert(
            key.clone(),
            SessionEntry {
                session: Arc::clone(&session),
                caller_count: 1,
            },
        );
        inner.sessions_created += 1;
        info!(session_key = %key, instance = %session.instance_id(), "Registered new session");
        session
    }

    /// Drop one caller from `key`; the session stops when none remain.
    ///
    /// Releasing a key with no outstanding callers is a bookkeeping defect
    /// and returns [`SessionError::InternalConsistency`].
    pub async fn release(&self, key: &SessionKey) -> Result<ReleaseOutcome> {
        let removed = {
            let mut inner = self.inner.write().await;

            let Some(entry) = inner.sessions.get_mut(key) else {
                error!(session_key = %key, "Release for a session with no callers");
                return Err(SessionError::internal(format!(
                    "release called for {} with no outstanding callers",
                    key
                )));
            };

            if entry.caller_count > 1 {
                entry.caller_count -= 1;
                debug!(session_key = %key, callers = entry.caller_count, "Caller left session");
                return Ok(ReleaseOutcome::Remaining(entry.caller_count));
            }

            inner.sessions_destroyed += 1;
            inner.sessions.remove(key)
        };

        if let Some(entry) = removed {
            entry.session.close();
            info!(session_key = %key, "Last caller left; session removed");
        }
        Ok(ReleaseOutcome::Destroyed)
    }

    /// Look up a live session without joining it
    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        let inner = self.inner.read().await;
        inner.sessions.get(key).map(|entry| Arc::clone(&entry.session))
    }

    /// Whether a live session exists for `key`
    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.inner.read().await.sessions.contains_key(key)
    }

    /// Outstanding acquisitions for `key`; 0 when no session exists
    pub async fn caller_count(&self, key: &SessionKey) -> usize {
        let inner = self.inner.read().await;
        inner.sessions.get(key).map(|entry| entry.caller_count).unwrap_or(0)
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Keys of every live session, in no particular order
    pub async fn keys(&self) -> Vec<SessionKey> {
        self.inner.read().await.sessions.keys().cloned().collect()
    }

    /// Current counters
    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        RegistryStats {
            active_sessions: inner.sessions.len(),
            total_callers: inner.sessions.values().map(|entry| entry.caller_count).sum(),
            sessions_created: inner.sessions_created,
            sessions_destroyed: inner.sessions_destroyed,
        }
    }

    /// Stop and remove every session regardless of caller counts
    pub async fn clear(&self) -> usize {
        let drained: Vec<SessionEntry> = {
            let mut inner = self.inner.write().await;
            let drained: Vec<_> = inner.sessions.drain().map(|(_, entry)| entry).collect();
            inner.sessions_destroyed += drained.len() as u64;
            drained
        };

        for entry in &drained {
            entry.session.close();
        }
        if !drained.is_empty() {
            info!("Cleared {} sessions from registry", drained.len());
        }
        drained.len()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{RemoteConnector, RemoteLink, StorageEngine, StorageError};
    use crate::leader::LocalLockService;
    use async_trait::async_trait;
    use chrono::Utc;

    struct Unreachable;

    #[async_trait]
    impl RemoteConnector for Unreachable {
        async fn connect(&self, server_url: &str) -> Result<Box<dyn RemoteLink>> {
            Err(SessionError::link(format!("{} unreachable", server_url)))
        }
    }

    #[async_trait]
    impl StorageEngine for Unreachable {
        async fn open(&self, _name: &str) -> std::result::Result<(), StorageError> {
            Err(StorageError::Unavailable("no storage in tests".into()))
        }
    }

    fn registry() -> (SessionRegistry, Arc<LocalLockService>) {
        let locks = Arc::new(LocalLockService::new());
        let deps = SessionDeps::new(Arc::new(Unreachable), Arc::new(Unreachable), locks.clone());
        (
            SessionRegistry::new(deps, Arc::new(CoordinatorConfig::default())),
            locks,
        )
    }

    fn init() -> InitData {
        InitData::new("wss://x", "d")
    }

    #[tokio::test]
    async fn test_acquire_shares_one_session() {
        let (registry, _) = registry();

        let first = registry.acquire(&init()).await;
        let second = registry.acquire(&init()).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.created_at() <= Utc::now());
        assert_eq!(registry.caller_count(&init().session_key()).await, 2);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_release_counts_down_then_destroys() {
        let (registry, _) = registry();
        let key = init().session_key();
        let session = registry.acquire(&init()).await;
        registry.acquire(&init()).await;

        assert_eq!(registry.release(&key).await.unwrap(), ReleaseOutcome::Remaining(1));
        assert!(!session.is_closed());
        assert_eq!(registry.release(&key).await.unwrap(), ReleaseOutcome::Destroyed);
        assert!(session.is_closed());
        assert!(!registry.contains(&key).await);
    }

    #[tokio::test]
    async fn test_release_without_callers_is_internal_fault() {
        let (registry, _) = registry();
        let key = init().session_key();

        let err = registry.release(&key).await.unwrap_err();
        assert!(err.is_fatal());

        registry.acquire(&init()).await;
        registry.release(&key).await.unwrap();
        assert!(matches!(
            registry.release(&key).await,
            Err(SessionError::InternalConsistency { .. })
        ));
    }

    #[tokio::test]
    async fn test_reacquire_after_teardown_creates_new_instance() {
        let (registry, _) = registry();
        let key = init().session_key();

        let old = registry.acquire(&init()).await;
        registry.release(&key).await.unwrap();
        let new = registry.acquire(&init()).await;

        assert_ne!(old.instance_id(), new.instance_id());
        assert!(old.is_closed());
        assert!(!new.is_closed());
    }

    #[tokio::test]
    async fn test_teardown_releases_leader_lock() {
        let (registry, locks) = registry();
        let key = init().session_key();
        let session = registry.acquire(&init()).await;

        let mut state = session.watch_state();
        state
            .wait_for(|s| s.leadership == crate::state_machine::LeadershipState::Leader)
            .await
            .unwrap();
        assert!(locks.is_held(&key.leader_lock_name()));

        registry.release(&key).await.unwrap();
        assert!(!locks.is_held(&key.leader_lock_name()));
    }

    #[tokio::test]
    async fn test_stats() {
        let (registry, _) = registry();
        let other = InitData::new("wss://x", "other");

        registry.acquire(&init()).await;
        registry.acquire(&init()).await;
        registry.acquire(&other).await;
        registry.release(&other.session_key()).await.unwrap();

        let stats = registry.stats().await;
        assert_eq!(
            stats,
            RegistryStats {
                active_sessions: 1,
                total_callers: 2,
                sessions_created: 2,
                sessions_destroyed: 1,
            }
        );

        assert_eq!(registry.clear().await, 1);
        assert_eq!(registry.stats().await.sessions_destroyed, 2);
    }
}

//! Leader election
//!
//! The platform's mutual-exclusion primitive is abstracted as a
//! [`LockService`]: `acquire(name)` resolves once the named lock is granted
//! and yields a [`LockGuard`] that holds the lock until released.
//!
//! [`LeaderElection`] adapts that into a one-shot notification for a single
//! session:
//!
//! - the lock name is scoped to the session key, so different sessions never
//!   contend
//! - exactly one request is issued per session lifetime
//! - the grant is posted to the session's event queue as
//!   [`MachineEvent::LeaderLockAcquired`] from a separate task, never from
//!   inside the lock service's call stack
//! - the guard is kept for the whole session and dropped by
//!   [`LeaderElection::release`] on teardown

use crate::errors::{Result, SessionError};
use crate::state_machine::MachineEvent;
use crate::types::SessionKey;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Held lock; the lock is released when the guard is dropped
pub struct LockGuard {
    name: String,
    _token: Box<dyn Any + Send + Sync>,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, token: impl Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            _token: Box::new(token),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

/// Platform mutual-exclusion primitive
#[async_trait]
pub trait LockService: Send + Sync + 'static {
    /// Wait until the named lock is granted
    async fn acquire(&self, name: &str) -> Result<LockGuard>;
}

type LockTable = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// In-process lock service backed by one `tokio::sync::Mutex` per name.
///
/// Share one instance between several coordinators to model several isolated
/// contexts competing for the same lock. A name's mutex is dropped from the
/// table once no guard holds it and no caller waits on it. The per-name
/// request counters are instrumentation and are kept for the life of the
/// service.
#[derive(Default)]
pub struct LocalLockService {
    locks: Arc<LockTable>,
    requests: DashMap<String, usize>,
}

/// Token behind a [`LockGuard`] issued by [`LocalLockService`]
struct LocalGrant {
    name: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
}

impl Drop for LocalGrant {
    fn drop(&mut self) {
        // Unlock first so the table entry is the only owner left when idle
        self.guard.take();
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl LocalLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `acquire` calls issued for `name`
    pub fn request_count(&self, name: &str) -> usize {
        self.requests.get(name).map(|c| *c).unwrap_or(0)
    }

    /// Names with a live guard or a waiting caller
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Whether some guard for `name` is currently alive
    pub fn is_held(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

#[async_trait]
impl LockService for LocalLockService {
    async fn acquire(&self, name: &str) -> Result<LockGuard> {
        *self.requests.entry(name.to_string()).or_insert(0) += 1;
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;
        debug!("Granted lock {}", name);
        let grant = LocalGrant {
            name: name.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        };
        Ok(LockGuard::new(name, grant))
    }
}

#[derive(Default)]
struct GrantSlot {
    guard: Option<LockGuard>,
    released: bool,
}

/// Per-session adapter around a [`LockService`]
pub struct LeaderElection {
    service: Arc<dyn LockService>,
    lock_name: String,
    slot: Arc<Mutex<GrantSlot>>,
    request: Option<JoinHandle<()>>,
}

impl LeaderElection {
    pub fn new(service: Arc<dyn LockService>, key: &SessionKey) -> Self {
        Self {
            service,
            lock_name: key.leader_lock_name(),
            slot: Arc::new(Mutex::new(GrantSlot::default())),
            request: None,
        }
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Whether the lock has been granted and not yet released
    pub fn is_held(&self) -> bool {
        self.slot.lock().guard.is_some()
    }

    /// Issue the session's single lock request.
    ///
    /// The grant is delivered later on `events`. A second call fails.
    pub fn request(&mut self, events: mpsc::UnboundedSender<MachineEvent>) -> Result<()> {
        if self.request.is_some() {
            return Err(SessionError::leader_election(format!(
                "lock {} already requested for this session",
                self.lock_name
            )));
        }
        if self.slot.lock().released {
            return Err(SessionError::leader_election(format!(
                "lock {} requested after release",
                self.lock_name
            )));
        }

        let service = Arc::clone(&self.service);
        let slot = Arc::clone(&self.slot);
        let name = self.lock_name.clone();

        debug!("Requesting leader lock {}", name);
        self.request = Some(tokio::spawn(async move {
            match service.acquire(&name).await {
                Ok(guard) => {
                    {
                        let mut slot = slot.lock();
                        if slot.released {
                            debug!("Lock {} granted after release; dropping it", name);
                            return;
                        }
                        slot.guard = Some(guard);
                    }
                    info!("Leader lock {} acquired", name);
                    if events.send(MachineEvent::LeaderLockAcquired).is_err() {
                        debug!("Session for lock {} is gone", name);
                    }
                }
                Err(e) => {
                    warn!("Leader lock {} unavailable: {}", name, e);
                }
            }
        }));
        Ok(())
    }

    /// Drop the guard (or the pending request). Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(request) = self.request.take() {
            request.abort();
        }
        let guard = {
            let mut slot = self.slot.lock();
            slot.released = true;
            slot.guard.take()
        };
        if let Some(guard) = guard {
            info!("Releasing leader lock {}", guard.name());
        }
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        self.release();
    }
}

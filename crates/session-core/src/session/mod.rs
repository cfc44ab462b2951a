//! Live sessions
//!
//! A [`Session`] is the shared handle the registry hands to every caller
//! attached to one [`SessionKey`]. Behind it runs a single runtime task that
//! owns the [`SessionStateMachine`](crate::state_machine::SessionStateMachine),
//! serializes every event through it, and executes the resulting effects
//! against the external collaborators in [`SessionDeps`].
//!
//! Callers interact with a session through three channels:
//!
//! - [`Session::send_event`] feeds the state machine
//! - [`Session::subscribe`] receives session-wide [`CoordinatorMessage`]s
//! - [`Session::watch_state`] observes the [`CompositeState`]

mod runtime;

use crate::adapters::{RemoteConnector, StorageEngine};
use crate::config::CoordinatorConfig;
use crate::errors::{Result, SessionError};
use crate::leader::{LeaderElection, LockService};
use crate::protocol::CoordinatorMessage;
use crate::state_machine::{CompositeState, MachineEvent};
use crate::types::{InitData, SessionInstanceId, SessionKey};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use runtime::SessionRuntime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tabsync_infra_common::logging::LogContext;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument, Level};

/// External collaborators every session talks to
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: Arc<dyn RemoteConnector>,
    pub storage: Arc<dyn StorageEngine>,
    pub locks: Arc<dyn LockService>,
}

impl SessionDeps {
    pub fn new(
        connector: Arc<dyn RemoteConnector>,
        storage: Arc<dyn StorageEngine>,
        locks: Arc<dyn LockService>,
    ) -> Self {
        Self {
            connector,
            storage,
            locks,
        }
    }
}

impl std::fmt::Debug for SessionDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDeps").finish_non_exhaustive()
    }
}

/// One logical sync session shared by every caller with the same key
pub struct Session {
    key: SessionKey,
    instance_id: SessionInstanceId,
    created_at: DateTime<Utc>,
    events: mpsc::UnboundedSender<MachineEvent>,
    notices: broadcast::Sender<CoordinatorMessage>,
    state: watch::Receiver<CompositeState>,
    election: Arc<Mutex<LeaderElection>>,
    shutdown: CancellationToken,
    runtime: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Session {
    /// Create the session, start its runtime and drive the `Init` transition
    pub(crate) fn start(
        init: InitData,
        deps: SessionDeps,
        config: Arc<CoordinatorConfig>,
    ) -> Arc<Self> {
        let key = init.session_key();
        let instance_id = SessionInstanceId::new();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(config.event_queue_capacity);
        let (state_tx, state) = watch::channel(CompositeState::INITIAL);
        let election = Arc::new(Mutex::new(LeaderElection::new(deps.locks.clone(), &key)));
        let shutdown = CancellationToken::new();

        let runtime = SessionRuntime::new(
            key.clone(),
            deps,
            config,
            events.clone(),
            events_rx,
            notices.clone(),
            state_tx,
            election.clone(),
            shutdown.clone(),
        );
        let span = LogContext::with_operation("session", "runtime")
            .with_field("session_key", key.to_string())
            .with_field("instance", instance_id.to_string())
            .span(Level::DEBUG);
        let task = tokio::spawn(runtime.run().instrument(span));

        // Queued before any caller can reach the sender, so Init is always first
        let _ = events.send(MachineEvent::Init(init));

        info!(session_key = %key, instance = %instance_id, "Session created");

        Arc::new(Self {
            key,
            instance_id,
            created_at: Utc::now(),
            events,
            notices,
            state,
            election,
            shutdown,
            runtime: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Origin and database name this session serves
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Unique per instance; a session recreated for the same key gets a new id
    pub fn instance_id(&self) -> SessionInstanceId {
        self.instance_id
    }

    /// When the first caller attached
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Snapshot of the composite state
    pub fn state(&self) -> CompositeState {
        *self.state.borrow()
    }

    /// Receiver that observes every composite state change
    pub fn watch_state(&self) -> watch::Receiver<CompositeState> {
        self.state.clone()
    }

    /// Messages broadcast to all attached callers
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorMessage> {
        self.notices.subscribe()
    }

    /// Whether the leader lock is currently held by this instance
    pub fn holds_leader_lock(&self) -> bool {
        self.election.lock().is_held()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue an event for the state machine
    pub fn send_event(&self, event: MachineEvent) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::internal(format!(
                "event {} sent to closed session {}",
                event, self.key
            )));
        }
        self.events
            .send(event)
            .map_err(|_| SessionError::internal(format!("session {} runtime has stopped", self.key)))
    }

    /// Stop the session: drop the leader lock now, stop the runtime and let
    /// the link close. Returns `false` if the session was already closed.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.election.lock().release();
        self.shutdown.cancel();

        let lifetime_ms = (Utc::now() - self.created_at).num_milliseconds();
        info!(
            session_key = %self.key,
            instance = %self.instance_id,
            lifetime_ms,
            "Session destroyed"
        );
        true
    }

    /// Wait for the runtime task to finish after [`Session::close`]
    pub async fn stopped(&self) {
        let task = self.runtime.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(session_key = %self.key, "Session runtime ended abnormally: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("instance_id", &self.instance_id)
            .field("created_at", &self.created_at)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

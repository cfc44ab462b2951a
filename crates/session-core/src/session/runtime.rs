//! Session runtime task
//!
//! Owns the state machine and is the only place events are processed, so
//! every region sees events in one order. Effects run as detached tasks whose
//! results come back as ordinary events; nothing here awaits an external
//! collaborator inline.

use super::SessionDeps;
use crate::adapters::{spawn_link_driver, LinkHandle, LinkReport, RemoteLink};
use crate::config::CoordinatorConfig;
use crate::errors::{Result, SessionError};
use crate::leader::LeaderElection;
use crate::protocol::{CoordinatorMessage, RemoteMessage};
use crate::state_machine::{CompositeState, Effect, MachineEvent, SessionStateMachine};
use crate::types::SessionKey;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one link-open attempt
struct LinkOpened {
    generation: u64,
    result: Result<Box<dyn RemoteLink>>,
}

pub(super) struct SessionRuntime {
    key: SessionKey,
    deps: SessionDeps,
    config: Arc<CoordinatorConfig>,
    machine: SessionStateMachine,

    events_tx: mpsc::UnboundedSender<MachineEvent>,
    events_rx: mpsc::UnboundedReceiver<MachineEvent>,
    reports_tx: mpsc::UnboundedSender<LinkReport>,
    reports_rx: mpsc::UnboundedReceiver<LinkReport>,
    opened_tx: mpsc::UnboundedSender<LinkOpened>,
    opened_rx: mpsc::UnboundedReceiver<LinkOpened>,

    notices: broadcast::Sender<CoordinatorMessage>,
    state_tx: watch::Sender<CompositeState>,
    election: Arc<Mutex<LeaderElection>>,
    shutdown: CancellationToken,

    link: Option<LinkHandle>,
    link_generation: u64,
    link_attempts: u32,
    storage_attempts: u32,
    tasks: JoinSet<()>,
}

impl SessionRuntime {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        key: SessionKey,
        deps: SessionDeps,
        config: Arc<CoordinatorConfig>,
        events_tx: mpsc::UnboundedSender<MachineEvent>,
        events_rx: mpsc::UnboundedReceiver<MachineEvent>,
        notices: broadcast::Sender<CoordinatorMessage>,
        state_tx: watch::Sender<CompositeState>,
        election: Arc<Mutex<LeaderElection>>,
        shutdown: CancellationToken,
    ) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            key,
            deps,
            config,
            machine: SessionStateMachine::new(),
            events_tx,
            events_rx,
            reports_tx,
            reports_rx,
            opened_tx,
            opened_rx,
            notices,
            state_tx,
            election,
            shutdown,
            link: None,
            link_generation: 0,
            link_attempts: 0,
            storage_attempts: 0,
            tasks: JoinSet::new(),
        }
    }

    pub(super) async fn run(mut self) {
        debug!(session_key = %self.key, "Session runtime started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(event) = self.events_rx.recv() => self.dispatch(event),

                Some(report) = self.reports_rx.recv() => self.on_link_report(report),

                Some(opened) = self.opened_rx.recv() => self.on_link_opened(opened),

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!(session_key = %self.key, "Session effect task panicked: {}", e);
                        }
                    }
                }
            }
        }

        self.tasks.abort_all();
        if let Some(link) = self.link.take() {
            link.close();
        }
        debug!(session_key = %self.key, "Session runtime stopped");
    }

    fn dispatch(&mut self, event: MachineEvent) {
        let result = self.machine.process_event(event);
        if result.changed() {
            self.state_tx.send_replace(result.next_state);
        }
        for effect in result.effects {
            self.execute(effect);
        }
    }

    fn on_link_opened(&mut self, opened: LinkOpened) {
        if opened.generation != self.link_generation {
            debug!(
                session_key = %self.key,
                "Discarding link open result for stale generation {}",
                opened.generation
            );
            return;
        }

        match opened.result {
            Ok(link) => {
                info!(session_key = %self.key, generation = opened.generation, "Link connected");
                self.link = Some(spawn_link_driver(
                    link,
                    opened.generation,
                    self.reports_tx.clone(),
                ));
                // Next drop waits one backoff step before reopening
                self.link_attempts = 1;
                self.dispatch(MachineEvent::LinkConnected);
            }
            Err(e) => {
                debug!(session_key = %self.key, "Link open failed: {}", e);
                self.dispatch(MachineEvent::LinkOpenFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn on_link_report(&mut self, report: LinkReport) {
        let current = self.link.as_ref().map(LinkHandle::generation);
        if current != Some(report.generation) {
            debug!(
                session_key = %self.key,
                "Ignoring {} from replaced link generation {}",
                report.event, report.generation
            );
            return;
        }

        match &report.event {
            MachineEvent::LinkClosed { code, reason } if !code.allows_reconnect() => {
                warn!(session_key = %self.key, "Link closed as incompatible ({}): {}", code, reason);
                self.link = None;
            }
            MachineEvent::LinkClosed { .. } | MachineEvent::LinkConnectionIssue { .. } => {
                info!(session_key = %self.key, "Link lost: {}", report.event);
                self.link = None;
            }
            _ => {}
        }
        self.dispatch(report.event);
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenLink { server_url } => self.open_link(server_url),
            Effect::OpenStorage { name } => self.open_storage(name),
            Effect::RequestLeaderLock => {
                if let Err(e) = self.election.lock().request(self.events_tx.clone()) {
                    warn!(session_key = %self.key, "Leader lock request not issued: {}", e);
                }
            }
            Effect::SendHandshake => {
                self.send_remote(RemoteMessage::Init {
                    version: self.config.client_version.clone(),
                });
            }
            Effect::ForwardTransition { payload } => {
                self.send_remote(RemoteMessage::Transition { payload });
            }
            Effect::Notify(message) => {
                // No subscribers is normal between callers
                let _ = self.notices.send(message);
            }
        }
    }

    fn send_remote(&self, message: RemoteMessage) {
        let Some(link) = self.link.as_ref() else {
            debug!(session_key = %self.key, "No open link; dropping outbound message");
            return;
        };
        if let Err(e) = link.send(message) {
            warn!(session_key = %self.key, "Outbound message lost: {}", e);
        }
    }

    fn open_link(&mut self, server_url: String) {
        let Some(delay) = self.config.reconnect.delay_for(self.link_attempts) else {
            warn!(
                session_key = %self.key,
                "Giving up on link after {} attempts",
                self.link_attempts
            );
            return;
        };
        self.link_attempts = self.link_attempts.saturating_add(1);
        self.link_generation += 1;
        self.link = None;

        let generation = self.link_generation;
        let connector = Arc::clone(&self.deps.connector);
        let opened = self.opened_tx.clone();

        debug!(session_key = %self.key, generation, ?delay, "Opening link to {}", server_url);
        self.tasks.spawn(async move {
            wait(delay).await;
            let result = connector.connect(&server_url).await;
            let _ = opened.send(LinkOpened { generation, result });
        });
    }

    fn open_storage(&mut self, name: String) {
        let Some(delay) = self.config.reconnect.delay_for(self.storage_attempts) else {
            warn!(
                session_key = %self.key,
                "Giving up on storage {} after {} attempts",
                name, self.storage_attempts
            );
            return;
        };
        self.storage_attempts = self.storage_attempts.saturating_add(1);

        let storage = Arc::clone(&self.deps.storage);
        let events = self.events_tx.clone();

        debug!(session_key = %self.key, ?delay, "Opening storage {}", name);
        self.tasks.spawn(async move {
            wait(delay).await;
            let event = match storage.open(&name).await {
                Ok(()) => MachineEvent::StorageConnected,
                Err(e) => {
                    let permanent = e.is_permanent();
                    let err = SessionError::from(e);
                    debug!(storage = %name, permanent, "Storage open failed: {}", err);
                    MachineEvent::StorageOpenFailed {
                        permanent,
                        reason: err.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });
    }
}

async fn wait(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

//! Core SessionCoordinator structure and initialization

use super::connection::ConnectionHandle;
use super::registry::{RegistryStats, SessionRegistry};
use super::transport::{CallerEndpoint, Outbox, TransportKind};
use crate::config::CoordinatorConfig;
use crate::errors::{Result, SessionError};
use crate::session::SessionDeps;
use crate::types::{ConnectionId, SessionKey};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tabsync_infra_common::logging::LogContext;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument, Level};

/// What the coordinator knows about one live connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub kind: TransportKind,
    pub session_key: Option<SessionKey>,
}

/// Entry point: accepts caller connections and routes them to sessions
pub struct SessionCoordinator {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) config: Arc<CoordinatorConfig>,
    pub(crate) connections: DashMap<ConnectionId, ConnectionInfo>,
    pub(crate) shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionCoordinator {
    /// Validate the configuration and build a coordinator around `deps`
    pub fn new(config: CoordinatorConfig, deps: SessionDeps) -> Result<Arc<Self>> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new(deps, Arc::clone(&config)));

        info!(
            "Session coordinator ready (grace {:?}, ping every {:?}, client {})",
            config.liveness_grace(),
            config.ping_interval(),
            config.client_version
        );

        Ok(Arc::new(Self {
            registry,
            config,
            connections: DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Validated configuration this coordinator runs with
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Session registry shared by all connections
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accept a new caller over a transport of the given kind
    pub fn connect(self: &Arc<Self>, kind: TransportKind) -> Result<CallerEndpoint> {
        if self.shutdown.is_cancelled() {
            return Err(SessionError::internal("coordinator is shut down"));
        }

        let id = ConnectionId::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let handle = ConnectionHandle::with_id(
            id,
            Arc::clone(&self.registry),
            self.config.liveness_grace(),
        );
        let outbox = Outbox::new(id, kind, outbound_tx);

        self.connections.insert(
            id,
            ConnectionInfo {
                kind,
                session_key: None,
            },
        );

        let span = LogContext::with_operation("coordinator", "connection")
            .with_field("connection_id", id.to_string())
            .with_field("transport", kind.to_string())
            .span(Level::DEBUG);
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(
            async move {
                coordinator.run_connection(handle, inbound_rx, outbox).await;
            }
            .instrument(span),
        );

        {
            let mut tasks = self.tasks.lock();
            tasks.retain(|task| !task.is_finished());
            tasks.push(task);
        }

        debug!(connection_id = %id, %kind, "Caller connected");
        Ok(CallerEndpoint::new(id, kind, inbound_tx, outbound_rx))
    }

    /// Number of open caller connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Metadata for one open connection
    pub fn connection_info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|info| info.clone())
    }

    /// Registry counters
    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// Compare every session's caller count with the connections attached to
    /// it. Only meaningful while no connection is mid-attach or mid-detach.
    pub async fn check_consistency(&self) -> Result<()> {
        let mut attached: HashMap<SessionKey, usize> = HashMap::new();
        for entry in self.connections.iter() {
            if let Some(key) = &entry.session_key {
                *attached.entry(key.clone()).or_insert(0) += 1;
            }
        }

        for key in self.registry.keys().await {
            let expected = attached.remove(&key).unwrap_or(0);
            let actual = self.registry.caller_count(&key).await;
            if expected != actual {
                error!(session_key = %key, expected, actual, "Caller count mismatch");
                return Err(SessionError::internal(format!(
                    "session {} has caller count {} but {} attached connections",
                    key, actual, expected
                )));
            }
        }

        if let Some((key, count)) = attached.into_iter().next() {
            error!(session_key = %key, count, "Connections attached to a missing session");
            return Err(SessionError::internal(format!(
                "{} connections attached to missing session {}",
                count, key
            )));
        }
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Close every connection, wait for them to detach, then stop any
    /// session still registered
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down session coordinator");
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Connection task ended abnormally: {}", e);
            }
        }

        let leftover = self.registry.clear().await;
        if leftover > 0 {
            error!("{} sessions outlived their connections", leftover);
        }
        info!("Session coordinator stopped");
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("config", &self.config)
            .field("connections", &self.connections.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

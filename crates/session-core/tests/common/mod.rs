//! Shared fakes for session-core integration tests
//!
//! - [`FakeServer`]: in-memory remote endpoint that enforces the major
//!   version check on the `Init` handshake
//! - [`FakeStorage`]: storage engine with scripted open results
//! - [`Harness`]: a coordinator wired to both plus a [`LocalLockService`]

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabsync_session_core::protocol::{check_compatibility, decode_remote, parse_version};
use tabsync_session_core::{
    CallerEndpoint, CloseCode, CompositeState, CoordinatorConfig, CoordinatorMessage, LinkEvent,
    LocalLockService, RemoteConnector, RemoteLink, RemoteMessage, Result, SessionCoordinator,
    SessionDeps, SessionError, SessionKey, StorageEngine, StorageError,
};
use tokio::sync::mpsc;

pub const SERVER_URL: &str = "wss://x";
pub const DATABASE: &str = "d";
pub const CLIENT_VERSION: &str = "1.2.0";

pub fn key() -> SessionKey {
    SessionKey::new(SERVER_URL, DATABASE)
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tabsync_session_core=debug")
        .with_test_writer()
        .try_init();
}

enum Control {
    Event(LinkEvent),
    Drop,
}

#[derive(Default)]
struct ServerLog {
    received: Vec<RemoteMessage>,
    closes: Vec<CloseCode>,
    links: Vec<mpsc::UnboundedSender<Control>>,
}

/// In-memory remote endpoint
pub struct FakeServer {
    version: semver::Version,
    refuse: AtomicBool,
    connects: AtomicUsize,
    log: Arc<Mutex<ServerLog>>,
}

impl FakeServer {
    pub fn new(version: &str) -> Arc<Self> {
        Arc::new(Self {
            version: parse_version(version).expect("valid server version"),
            refuse: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(ServerLog::default())),
        })
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<RemoteMessage> {
        self.log.lock().received.clone()
    }

    pub fn closes(&self) -> Vec<CloseCode> {
        self.log.lock().closes.clone()
    }

    /// Drop the newest link without a close frame
    pub fn drop_latest_link(&self) {
        if let Some(link) = self.log.lock().links.last() {
            let _ = link.send(Control::Drop);
        }
    }

    /// Deliver a text frame on the newest link
    pub fn push_frame(&self, frame: impl Into<String>) {
        if let Some(link) = self.log.lock().links.last() {
            let _ = link.send(Control::Event(LinkEvent::Frame(frame.into())));
        }
    }
}

#[async_trait]
impl RemoteConnector for FakeServer {
    async fn connect(&self, server_url: &str) -> Result<Box<dyn RemoteLink>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SessionError::link(format!("{} refused the connection", server_url)));
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.log.lock().links.push(control_tx.clone());
        Ok(Box::new(FakeLink {
            version: self.version.clone(),
            log: Arc::clone(&self.log),
            control_tx,
            control_rx,
        }))
    }
}

struct FakeLink {
    version: semver::Version,
    log: Arc<Mutex<ServerLog>>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
}

#[async_trait]
impl RemoteLink for FakeLink {
    async fn send(&mut self, frame: String) -> Result<()> {
        let message = decode_remote(&frame)?;
        if let RemoteMessage::Init { version } = &message {
            if check_compatibility(version, &self.version).is_err() {
                let _ = self.control_tx.send(Control::Event(LinkEvent::Closed {
                    code: CloseCode::IncompatibleVersion,
                    reason: "incompatible version".to_string(),
                }));
            }
        }
        self.log.lock().received.push(message);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<LinkEvent> {
        match self.control_rx.recv().await {
            Some(Control::Event(event)) => Some(event),
            Some(Control::Drop) | None => None,
        }
    }

    async fn close(&mut self, code: CloseCode, _reason: &str) {
        self.log.lock().closes.push(code);
    }
}

/// Storage engine that replays scripted results, then succeeds
#[derive(Default)]
pub struct FakeStorage {
    script: Mutex<VecDeque<std::result::Result<(), StorageError>>>,
    opened: Mutex<Vec<String>>,
}

impl FakeStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(results: Vec<std::result::Result<(), StorageError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(results.into()),
            opened: Mutex::new(Vec::new()),
        })
    }

    /// Names passed to every `open` call, in order
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl StorageEngine for FakeStorage {
    async fn open(&self, name: &str) -> std::result::Result<(), StorageError> {
        self.opened.lock().push(name.to_string());
        self.script.lock().pop_front().unwrap_or(Ok(()))
    }
}

pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::default().with_client_version(CLIENT_VERSION)
}

pub struct Harness {
    pub coordinator: Arc<SessionCoordinator>,
    pub server: Arc<FakeServer>,
    pub storage: Arc<FakeStorage>,
    pub locks: Arc<LocalLockService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), FakeServer::new("1.4.0"), FakeStorage::new(), Arc::new(LocalLockService::new()))
    }

    pub fn with(
        config: CoordinatorConfig,
        server: Arc<FakeServer>,
        storage: Arc<FakeStorage>,
        locks: Arc<LocalLockService>,
    ) -> Self {
        init_logging();
        let deps = SessionDeps::new(server.clone(), storage.clone(), locks.clone());
        let coordinator = SessionCoordinator::new(config, deps).expect("valid config");
        Self {
            coordinator,
            server,
            storage,
            locks,
        }
    }

    /// Wait until the session for `key` reaches a state matching `pred`
    pub async fn wait_state(
        &self,
        key: &SessionKey,
        pred: impl FnMut(&CompositeState) -> bool,
    ) -> CompositeState {
        let session = self
            .coordinator
            .registry()
            .get(key)
            .await
            .expect("session exists");
        let mut watch = session.watch_state();
        let state = tokio::time::timeout(Duration::from_secs(10), watch.wait_for(pred))
            .await
            .expect("state reached in time")
            .expect("session alive");
        *state
    }
}

/// Next message, failing the test if none arrives in time
pub async fn recv(endpoint: &mut CallerEndpoint) -> Option<CoordinatorMessage> {
    tokio::time::timeout(Duration::from_secs(10), endpoint.recv())
        .await
        .expect("message or close in time")
}

/// Skip messages until one matches `pred`
pub async fn recv_matching(
    endpoint: &mut CallerEndpoint,
    mut pred: impl FnMut(&CoordinatorMessage) -> bool,
) -> CoordinatorMessage {
    loop {
        match recv(endpoint).await {
            Some(message) if pred(&message) => return message,
            Some(_) => continue,
            None => panic!("connection closed while waiting for a message"),
        }
    }
}

/// Drain messages until the coordinator ends the connection
pub async fn recv_closed(endpoint: &mut CallerEndpoint) -> Vec<CoordinatorMessage> {
    let mut seen = Vec::new();
    while let Some(message) = recv(endpoint).await {
        seen.push(message);
    }
    seen
}

/// Connect and attach a caller, returning once the initial status arrived
pub async fn attach(
    coordinator: &Arc<SessionCoordinator>,
    kind: tabsync_session_core::TransportKind,
) -> CallerEndpoint {
    let mut endpoint = coordinator.connect(kind).expect("coordinator accepting");
    endpoint
        .send(tabsync_session_core::CallerMessage::init(SERVER_URL, DATABASE))
        .expect("connection open");
    recv_matching(&mut endpoint, |m| matches!(m, CoordinatorMessage::SessionStatus { .. })).await;
    endpoint
}

/// Poll `check` until it holds, failing the test after ten seconds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

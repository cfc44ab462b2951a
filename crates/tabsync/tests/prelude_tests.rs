//! The facade exposes enough to run a coordinator end to end

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::Arc;
use tabsync::prelude::*;

/// Remote endpoint that is never reachable
struct Offline;

#[async_trait]
impl RemoteConnector for Offline {
    async fn connect(&self, server_url: &str) -> Result<Box<dyn RemoteLink>> {
        Err(SessionError::link(format!("{} is offline", server_url)))
    }
}

struct AlwaysOpens;

#[async_trait]
impl StorageEngine for AlwaysOpens {
    async fn open(&self, _name: &str) -> std::result::Result<(), StorageError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_caller_attaches_through_prelude() {
    let deps = SessionDeps::new(
        Arc::new(Offline),
        Arc::new(AlwaysOpens),
        Arc::new(LocalLockService::new()),
    );
    let coordinator = SessionCoordinator::new(CoordinatorConfig::default(), deps).unwrap();

    let mut caller = coordinator.connect(TransportKind::Dedicated).unwrap();
    caller
        .send(CallerMessage::init("wss://sync.example.com", "notes"))
        .unwrap();

    let first = caller.recv().await.unwrap();
    assert!(matches!(first, CoordinatorMessage::SessionStatus { .. }));
    assert_eq!(coordinator.stats().await.active_sessions, 1);

    coordinator.shutdown().await;
    while caller.recv().await.is_some() {}
    assert_eq!(coordinator.stats().await.sessions_destroyed, 1);
}

#[test]
#[serial]
fn test_second_logging_setup_is_rejected() {
    let config = LoggingConfig::default();
    setup_logging(config.clone()).unwrap();
    assert!(matches!(
        setup_logging(config),
        Err(tabsync::infra_common::Error::Config(_))
    ));
}

#[test]
fn test_version_matches_package() {
    assert_eq!(tabsync::VERSION, env!("CARGO_PKG_VERSION"));
}

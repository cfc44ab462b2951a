//! # tabsync
//!
//! Many callers in one runtime share a single sync session per
//! `(server URL, local database)` pair. The session owns one remote link,
//! one storage handle and at most one leader-lock request; callers attach
//! and detach through a [`SessionCoordinator`](session_core::SessionCoordinator).
//!
//! ## Crates
//!
//! - [`session_core`]: registry, connection handles, the session state
//!   machine, leader election and the message codec
//! - [`infra_common`]: logging bootstrap, shared error type, config loading
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tabsync::prelude::*;
//! # use std::sync::Arc;
//! # async fn run(connector: Arc<dyn RemoteConnector>, storage: Arc<dyn StorageEngine>) -> tabsync::session_core::Result<()> {
//! let deps = SessionDeps::new(connector, storage, Arc::new(LocalLockService::new()));
//! let coordinator = SessionCoordinator::new(CoordinatorConfig::from_env()?, deps)?;
//!
//! let mut caller = coordinator.connect(TransportKind::Dedicated)?;
//! caller.send(CallerMessage::init("wss://sync.example.com", "notes"))?;
//! while let Some(message) = caller.recv().await {
//!     println!("{:?}", message);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

pub use tabsync_infra_common as infra_common;
pub use tabsync_session_core as session_core;

pub mod prelude {
    //! Common imports for tabsync applications

    pub use crate::infra_common::logging::{setup_logging, LogContext, LoggingConfig};
    pub use crate::session_core::*;
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

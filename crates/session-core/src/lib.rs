//! # Session-Core
//!
//! Shared sync-session coordination for tabsync.
//!
//! Many independent callers (tabs, windows, workers) that ask for the same
//! `(serverURL, localDatabaseName)` pair share one [`Session`]. Exactly one
//! of the contenders for a session holds its leader lock and talks to the
//! remote endpoint on the session's behalf.
//!
//! This crate provides:
//! - A reference-counted [`SessionRegistry`] keyed by [`SessionKey`]
//! - Per-caller [`ConnectionHandle`]s with a resettable liveness timer
//! - The three-region [`SessionStateMachine`] (link, storage, leadership)
//! - A [`LeaderElection`] adapter over any [`LockService`]
//! - The caller/coordinator/remote message codec in [`protocol`]
//! - [`SessionCoordinator`], which ties the above to caller transports
//!
//! ## Architecture
//!
//! ```text
//!  CallerEndpoint ──▶ connection task ──▶ ConnectionHandle ──▶ SessionRegistry
//!                                                                  │
//!                                              Session runtime ◀───┘
//!                                     (state machine + effects: link,
//!                                      storage, leader lock)
//! ```
//!
//! The remote link, local storage and lock service are external
//! collaborators, reached through the [`RemoteConnector`], [`StorageEngine`]
//! and [`LockService`] traits.

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod leader;
pub mod protocol;
pub mod session;
pub mod state_machine;
pub mod types;

pub use adapters::{LinkEvent, RemoteConnector, RemoteLink, StorageEngine, StorageError};
pub use config::{CoordinatorConfig, ReconnectConfig};
pub use coordinator::{
    CallerEndpoint, ConnectionHandle, HandleOutcome, RegistryStats, ReleaseOutcome,
    SessionCoordinator, SessionRegistry, TransportKind,
};
pub use errors::{Result, SessionError};
pub use leader::{LeaderElection, LocalLockService, LockGuard, LockService};
pub use protocol::{CallerMessage, CloseCode, CoordinatorMessage, FaultKind, RemoteMessage};
pub use session::{Session, SessionDeps};
pub use state_machine::{
    CompositeState, LeadershipState, LinkState, SessionStateMachine, StorageState,
};
pub use types::{ConnectionId, InitData, SessionInstanceId, SessionKey};

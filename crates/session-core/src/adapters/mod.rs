//! Adapters to the session's external collaborators
//!
//! - [`link`]: the remote endpoint transport
//! - [`storage`]: the local storage engine
//!
//! The lock service lives in [`crate::leader`].

pub mod link;
pub mod storage;

pub use link::{spawn_link_driver, LinkEvent, LinkHandle, LinkReport, RemoteConnector, RemoteLink};
pub use storage::{StorageEngine, StorageError};

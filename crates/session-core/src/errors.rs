//! Error types for session-core
//!
//! Errors fall into four groups, and callers are expected to treat them
//! differently:
//!
//! - **User-caused**: [`SessionError::DoubleInit`], [`SessionError::InvalidMessage`].
//!   Fatal to the offending connection only.
//! - **Internal consistency**: [`SessionError::InternalConsistency`]. A
//!   bookkeeping defect somewhere in the caller path; never swallowed.
//! - **Transient**: [`SessionError::Link`], [`SessionError::Storage`],
//!   [`SessionError::LeaderElection`]. The affected region stays
//!   disconnected and the reconnect policy decides what happens next.
//! - **Version incompatibility**: terminal for the current link.

use crate::adapters::StorageError;
use crate::protocol::CloseCode;
use crate::types::{ConnectionId, SessionKey};
use thiserror::Error;

/// Result type for session-core operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A second `Init` arrived on a connection that is already attached
    #[error("Connection {connection_id} is already initialized for session {session_key}")]
    DoubleInit {
        connection_id: ConnectionId,
        session_key: SessionKey,
    },

    /// A caller or the remote endpoint sent something that does not decode
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// Registry bookkeeping no longer matches reality
    #[error("Internal consistency fault: {message}")]
    InternalConsistency { message: String },

    /// Opening or using the remote link failed
    #[error("Link error: {message}")]
    Link { message: String },

    /// Opening local storage failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// The lock service could not be reached or refused the request
    #[error("Leader election error: {message}")]
    LeaderElection { message: String },

    /// Major version mismatch between this client and the remote endpoint
    #[error("Incompatible version: client {client}, server {server}")]
    IncompatibleVersion { client: String, server: String },

    /// The connection has already been torn down
    #[error("Connection {connection_id} is closed")]
    ConnectionClosed { connection_id: ConnectionId },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl SessionError {
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalConsistency {
            message: message.into(),
        }
    }

    pub fn link(message: impl Into<String>) -> Self {
        Self::Link {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn leader_election(message: impl Into<String>) -> Self {
        Self::LeaderElection {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Faults that indicate a defect rather than a condition to recover from
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InternalConsistency { .. })
    }

    /// Environmental failures that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Link { .. } | Self::Storage { .. } | Self::LeaderElection { .. }
        )
    }

    /// Close code to use when this error ends a connection or link
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::InvalidMessage { .. } | Self::DoubleInit { .. } => Some(CloseCode::InvalidMessage),
            Self::IncompatibleVersion { .. } => Some(CloseCode::IncompatibleVersion),
            Self::Link { .. } => Some(CloseCode::LinkFailure),
            _ => None,
        }
    }
}

impl From<tabsync_infra_common::Error> for SessionError {
    fn from(err: tabsync_infra_common::Error) -> Self {
        SessionError::Config {
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::storage(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::InvalidMessage {
            reason: err.to_string(),
        }
    }
}

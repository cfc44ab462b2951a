//! Message definitions
//!
//! Three directions are covered:
//!
//! ```text
//!  caller ──CallerMessage──▶ coordinator ──RemoteMessage──▶ remote endpoint
//!  caller ◀─CoordinatorMessage── coordinator ◀──LinkEvent──── remote endpoint
//! ```

use crate::state_machine::{LeadershipState, LinkState, StorageState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Messages a caller sends to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CallerMessage {
    /// Attach this connection to the session for `(serverURL, localDatabaseName)`
    Init {
        #[serde(rename = "localDatabaseName")]
        local_database_name: String,
        #[serde(rename = "serverURL")]
        server_url: String,
    },

    /// Application-defined payload for the session's leader to forward
    Transition { payload: serde_json::Value },

    /// Heartbeat; resets the caller's liveness timer
    Ping {},
}

impl CallerMessage {
    pub fn init(server_url: impl Into<String>, local_database_name: impl Into<String>) -> Self {
        Self::Init {
            local_database_name: local_database_name.into(),
            server_url: server_url.into(),
        }
    }

    pub fn ping() -> Self {
        Self::Ping {}
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Transition { .. } => "transition",
            Self::Ping {} => "ping",
        }
    }
}

/// Session-wide faults pushed to every attached caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultKind {
    IncompatibleVersion,
    StorageUnavailable,
}

/// Messages the coordinator sends to a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CoordinatorMessage {
    /// Liveness probe; only ever sent on multiplexed transports
    Ping {},

    /// Current composite state of the attached session
    SessionStatus {
        link: LinkState,
        storage: StorageState,
        leadership: LeadershipState,
    },

    /// A fault affecting every caller of the session
    SessionFault { kind: FaultKind },

    /// Payload delivered by the remote endpoint through the leader
    Transition { payload: serde_json::Value },

    /// A fault scoped to this connection; the connection closes right after
    Error { code: CloseCode, message: String },
}

/// Messages the leader sends over the link to the remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RemoteMessage {
    /// Handshake carrying this client's semantic version
    Init { version: String },

    /// Caller payload forwarded by the leader
    Transition { payload: serde_json::Value },
}

/// Link and connection close codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum CloseCode {
    /// Orderly close
    Normal,
    /// Generic link failure
    LinkFailure,
    /// Payload did not decode
    InvalidMessage,
    /// Client major version differs from the endpoint's
    IncompatibleVersion,
    /// Any other code, treated as a generic link failure
    Other(u16),
}

impl CloseCode {
    pub const NORMAL: u16 = 1000;
    pub const LINK_FAILURE: u16 = 1011;
    pub const INVALID_MESSAGE: u16 = 4000;
    pub const INCOMPATIBLE_VERSION: u16 = 4001;

    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => Self::NORMAL,
            Self::LinkFailure => Self::LINK_FAILURE,
            Self::InvalidMessage => Self::INVALID_MESSAGE,
            Self::IncompatibleVersion => Self::INCOMPATIBLE_VERSION,
            Self::Other(code) => code,
        }
    }

    /// Whether a link closed with this code may be reopened as-is
    pub fn allows_reconnect(self) -> bool {
        !matches!(self, Self::IncompatibleVersion)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            Self::NORMAL => Self::Normal,
            Self::LINK_FAILURE => Self::LinkFailure,
            Self::INVALID_MESSAGE => Self::InvalidMessage,
            Self::INCOMPATIBLE_VERSION => Self::IncompatibleVersion,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::LinkFailure => "link failure",
            Self::InvalidMessage => "invalid message",
            Self::IncompatibleVersion => "incompatible version",
            Self::Other(_) => "other",
        };
        write!(f, "{} ({})", name, self.as_u16())
    }
}

//! Events fed into the session state machine and the effects it asks for

use crate::protocol::{CloseCode, CoordinatorMessage};
use crate::types::InitData;
use std::fmt;

/// Input to [`SessionStateMachine::process_event`](super::SessionStateMachine::process_event)
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    /// First caller attached; records the context and starts every region
    Init(InitData),

    /// The link to the remote endpoint opened
    LinkConnected,
    /// Opening the link failed before it connected
    LinkOpenFailed { reason: String },
    /// An open link failed at the link level
    LinkConnectionIssue { reason: String },
    /// The remote endpoint closed the link
    LinkClosed { code: CloseCode, reason: String },

    /// Local storage opened
    StorageConnected,
    /// Opening local storage failed
    StorageOpenFailed { reason: String, permanent: bool },

    /// The lock service granted this session's leader lock
    LeaderLockAcquired,

    /// Caller payload to forward to the remote endpoint
    Transition { payload: serde_json::Value },
    /// Payload the remote endpoint delivered over the link
    RemotePayload { payload: serde_json::Value },
}

impl MachineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::LinkConnected => "link-connected",
            Self::LinkOpenFailed { .. } => "link-open-failed",
            Self::LinkConnectionIssue { .. } => "link-connection-issue",
            Self::LinkClosed { .. } => "link-closed",
            Self::StorageConnected => "storage-connected",
            Self::StorageOpenFailed { .. } => "storage-open-failed",
            Self::LeaderLockAcquired => "leader-lock-acquired",
            Self::Transition { .. } => "transition",
            Self::RemotePayload { .. } => "remote-payload",
        }
    }
}

impl fmt::Display for MachineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Side effect requested by a transition; executed by the session runtime
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Entry action of `link: disconnected`
    OpenLink { server_url: String },
    /// Entry action of `storage: disconnected`
    OpenStorage { name: String },
    /// Ask the leader-election adapter for the session's lock
    RequestLeaderLock,
    /// Send the versioned `Init` handshake over the link
    SendHandshake,
    /// Forward a caller payload over the link
    ForwardTransition { payload: serde_json::Value },
    /// Fan a message out to every attached caller
    Notify(CoordinatorMessage),
}

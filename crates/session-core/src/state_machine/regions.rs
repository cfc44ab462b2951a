//! The three parallel regions of a session
//!
//! Each region owns one small state enum and reacts to every event on its own.
//! Regions never read each other's state; the only shared input is the
//! read-only [`SessionContext`].

use super::events::{Effect, MachineEvent};
use super::machine::SessionContext;
use crate::protocol::{CoordinatorMessage, FaultKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    Disconnected,
    Connected,
    /// The endpoint rejected this client's major version; never reopened
    Incompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageState {
    Disconnected,
    Connected,
    /// Terminal
    PermanentlyUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeadershipState {
    Follower,
    /// Terminal for the lifetime of the session
    Leader,
}

macro_rules! display_kebab {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self { $(Self::$variant => $name),+ })
            }
        }
    };
}

display_kebab!(LinkState { Disconnected => "disconnected", Connected => "connected", Incompatible => "incompatible" });
display_kebab!(StorageState { Disconnected => "disconnected", Connected => "connected", PermanentlyUnavailable => "permanently-unavailable" });
display_kebab!(LeadershipState { Follower => "follower", Leader => "leader" });

/// Link to the remote endpoint
#[derive(Debug, Clone)]
pub struct LinkRegion {
    state: LinkState,
}

impl LinkRegion {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    fn enter_disconnected(&mut self, ctx: &SessionContext, effects: &mut Vec<Effect>) {
        self.state = LinkState::Disconnected;
        if let Some(server_url) = ctx.server_url() {
            effects.push(Effect::OpenLink {
                server_url: server_url.to_string(),
            });
        }
    }

    pub fn on_event(&mut self, event: &MachineEvent, ctx: &SessionContext, effects: &mut Vec<Effect>) {
        match (self.state, event) {
            (LinkState::Disconnected, MachineEvent::Init(_)) => self.enter_disconnected(ctx, effects),
            (LinkState::Disconnected, MachineEvent::LinkConnected) => {
                self.state = LinkState::Connected;
            }
            (LinkState::Disconnected, MachineEvent::LinkOpenFailed { reason }) => {
                debug!("Link open failed ({}), staying disconnected", reason);
                self.enter_disconnected(ctx, effects);
            }
            (LinkState::Connected, MachineEvent::LinkConnectionIssue { reason }) => {
                debug!("Link connection issue ({}), re-entering disconnected", reason);
                self.enter_disconnected(ctx, effects);
            }
            (LinkState::Connected, MachineEvent::LinkClosed { code, reason }) => {
                if code.allows_reconnect() {
                    debug!("Link closed with {} ({}), re-entering disconnected", code, reason);
                    self.enter_disconnected(ctx, effects);
                } else {
                    warn!("Link closed with {} ({}); not reopening", code, reason);
                    self.state = LinkState::Incompatible;
                    effects.push(Effect::Notify(CoordinatorMessage::SessionFault {
                        kind: FaultKind::IncompatibleVersion,
                    }));
                }
            }
            _ => {}
        }
    }
}

/// Local storage attachment
#[derive(Debug, Clone)]
pub struct StorageRegion {
    state: StorageState,
}

impl StorageRegion {
    pub fn new() -> Self {
        Self {
            state: StorageState::Disconnected,
        }
    }

    pub fn state(&self) -> StorageState {
        self.state
    }

    fn open(ctx: &SessionContext, effects: &mut Vec<Effect>) {
        if let Some(name) = ctx.storage_name() {
            effects.push(Effect::OpenStorage { name });
        }
    }

    pub fn on_event(&mut self, event: &MachineEvent, ctx: &SessionContext, effects: &mut Vec<Effect>) {
        match (self.state, event) {
            (StorageState::Disconnected, MachineEvent::Init(_)) => Self::open(ctx, effects),
            (StorageState::Disconnected, MachineEvent::StorageConnected) => {
                self.state = StorageState::Connected;
            }
            (StorageState::Disconnected, MachineEvent::StorageOpenFailed { reason, permanent: true }) => {
                warn!("Storage permanently unavailable: {}", reason);
                self.state = StorageState::PermanentlyUnavailable;
                effects.push(Effect::Notify(CoordinatorMessage::SessionFault {
                    kind: FaultKind::StorageUnavailable,
                }));
            }
            (StorageState::Disconnected, MachineEvent::StorageOpenFailed { reason, permanent: false }) => {
                debug!("Storage open failed ({}), retrying", reason);
                Self::open(ctx, effects);
            }
            _ => {}
        }
    }
}

/// Leader election status
#[derive(Debug, Clone)]
pub struct LeadershipRegion {
    state: LeadershipState,
}

impl LeadershipRegion {
    pub fn new() -> Self {
        Self {
            state: LeadershipState::Follower,
        }
    }

    pub fn state(&self) -> LeadershipState {
        self.state
    }

    pub fn on_event(&mut self, event: &MachineEvent, _ctx: &SessionContext, effects: &mut Vec<Effect>) {
        match (self.state, event) {
            (LeadershipState::Follower, MachineEvent::Init(_)) => {
                effects.push(Effect::RequestLeaderLock);
            }
            (LeadershipState::Follower, MachineEvent::LeaderLockAcquired) => {
                self.state = LeadershipState::Leader;
            }
            _ => {}
        }
    }
}

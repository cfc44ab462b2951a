//! Composite session state machine
//!
//! Three regions composed in parallel:
//!
//! ```text
//!  link:       disconnected ⇄ connected ──(4001)──▶ incompatible
//!  storage:    disconnected ──▶ connected
//!                           └─▶ permanently-unavailable
//!  leadership: follower ──▶ leader
//! ```
//!
//! [`SessionStateMachine::process_event`] hands every event to all three
//! regions in the same turn, then derives the leader duties that depend on
//! the combined state (handshake, transition forwarding) and a status
//! notification when anything changed. It performs no I/O: the returned
//! [`Effect`]s are executed by the session runtime.

use super::events::{Effect, MachineEvent};
use super::regions::{
    LeadershipRegion, LeadershipState, LinkRegion, LinkState, StorageRegion, StorageState,
};
use crate::protocol::CoordinatorMessage;
use crate::types::{InitData, SessionKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Read-only context shared by the regions, filled in by `Init`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    init: Option<InitData>,
}

impl SessionContext {
    pub fn server_url(&self) -> Option<&str> {
        self.init.as_ref().map(|i| i.server_url.as_str())
    }

    pub fn local_database_name(&self) -> Option<&str> {
        self.init.as_ref().map(|i| i.local_database_name.as_str())
    }

    pub fn session_key(&self) -> Option<SessionKey> {
        self.init.as_ref().map(InitData::session_key)
    }

    pub fn storage_name(&self) -> Option<String> {
        self.session_key().map(|k| k.storage_name())
    }

    pub fn is_initialized(&self) -> bool {
        self.init.is_some()
    }
}

/// Snapshot of all three regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeState {
    pub link: LinkState,
    pub storage: StorageState,
    pub leadership: LeadershipState,
}

impl CompositeState {
    pub const INITIAL: CompositeState = CompositeState {
        link: LinkState::Disconnected,
        storage: StorageState::Disconnected,
        leadership: LeadershipState::Follower,
    };

    /// Leader with an open link: the state in which leader duties run
    pub fn is_serving(&self) -> bool {
        self.link == LinkState::Connected && self.leadership == LeadershipState::Leader
    }

    pub fn status_message(&self) -> CoordinatorMessage {
        CoordinatorMessage::SessionStatus {
            link: self.link,
            storage: self.storage,
            leadership: self.leadership,
        }
    }
}

impl Default for CompositeState {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// Result of processing one event
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessEventResult {
    pub old_state: CompositeState,
    pub next_state: CompositeState,
    pub effects: Vec<Effect>,
}

impl ProcessEventResult {
    pub fn changed(&self) -> bool {
        self.old_state != self.next_state
    }
}

/// The per-session state machine
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    context: SessionContext,
    link: LinkRegion,
    storage: StorageRegion,
    leadership: LeadershipRegion,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            context: SessionContext::default(),
            link: LinkRegion::new(),
            storage: StorageRegion::new(),
            leadership: LeadershipRegion::new(),
        }
    }

    pub fn state(&self) -> CompositeState {
        CompositeState {
            link: self.link.state(),
            storage: self.storage.state(),
            leadership: self.leadership.state(),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Feed one event to every region and collect the effects.
    ///
    /// Events other than the first `Init` are ignored until the context is
    /// initialized; a repeated `Init` is ignored with a warning.
    pub fn process_event(&mut self, event: MachineEvent) -> ProcessEventResult {
        let old_state = self.state();
        let mut effects = Vec::new();

        match &event {
            MachineEvent::Init(init) if self.context.is_initialized() => {
                warn!(
                    "Ignoring repeated init for {} (already initialized for {:?})",
                    init.session_key(),
                    self.context.session_key()
                );
                return ProcessEventResult {
                    old_state,
                    next_state: old_state,
                    effects,
                };
            }
            MachineEvent::Init(init) => {
                self.context.init = Some(init.clone());
            }
            _ if !self.context.is_initialized() => {
                debug!("Dropping {} before init", event);
                return ProcessEventResult {
                    old_state,
                    next_state: old_state,
                    effects,
                };
            }
            _ => {}
        }

        self.link.on_event(&event, &self.context, &mut effects);
        self.storage.on_event(&event, &self.context, &mut effects);
        self.leadership.on_event(&event, &self.context, &mut effects);

        let next_state = self.state();
        self.leader_duties(&event, old_state, next_state, &mut effects);

        if old_state != next_state {
            debug!(
                "Session state {:?} -> {:?} on {}",
                old_state, next_state, event
            );
            effects.push(Effect::Notify(next_state.status_message()));
        }

        ProcessEventResult {
            old_state,
            next_state,
            effects,
        }
    }

    fn leader_duties(
        &self,
        event: &MachineEvent,
        old_state: CompositeState,
        next_state: CompositeState,
        effects: &mut Vec<Effect>,
    ) {
        if next_state.is_serving() && !old_state.is_serving() {
            effects.push(Effect::SendHandshake);
        }

        match event {
            MachineEvent::Transition { payload } if next_state.is_serving() => {
                effects.push(Effect::ForwardTransition {
                    payload: payload.clone(),
                });
            }
            MachineEvent::Transition { .. } => {
                debug!(
                    "Dropping transition: link {} / {}",
                    next_state.link, next_state.leadership
                );
            }
            MachineEvent::RemotePayload { payload } => {
                effects.push(Effect::Notify(CoordinatorMessage::Transition {
                    payload: payload.clone(),
                }));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CloseCode, FaultKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn initialized() -> SessionStateMachine {
        let mut machine = SessionStateMachine::new();
        machine.process_event(MachineEvent::Init(InitData::new("wss://x", "d")));
        machine
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(SessionStateMachine::new().state(), CompositeState::INITIAL);
    }

    #[test]
    fn test_init_starts_every_region() {
        let mut machine = SessionStateMachine::new();
        let result = machine.process_event(MachineEvent::Init(InitData::new("wss://x", "d")));

        assert_eq!(
            result.effects,
            vec![
                Effect::OpenLink {
                    server_url: "wss://x".into()
                },
                Effect::OpenStorage {
                    name: SessionKey::new("wss://x", "d").storage_name()
                },
                Effect::RequestLeaderLock,
            ]
        );
        assert!(!result.changed());
        assert_eq!(machine.context().local_database_name(), Some("d"));
    }

    #[test]
    fn test_repeated_init_is_ignored() {
        let mut machine = initialized();
        let result = machine.process_event(MachineEvent::Init(InitData::new("wss://y", "e")));
        assert!(result.effects.is_empty());
        assert_eq!(machine.context().server_url(), Some("wss://x"));
    }

    #[test]
    fn test_events_before_init_are_dropped() {
        let mut machine = SessionStateMachine::new();
        let result = machine.process_event(MachineEvent::LeaderLockAcquired);
        assert!(result.effects.is_empty());
        assert_eq!(machine.state(), CompositeState::INITIAL);
    }

    #[test]
    fn test_link_issue_reenters_disconnected_without_touching_other_regions() {
        let mut machine = initialized();
        machine.process_event(MachineEvent::StorageConnected);
        machine.process_event(MachineEvent::LeaderLockAcquired);
        machine.process_event(MachineEvent::LinkConnected);

        let result = machine.process_event(MachineEvent::LinkConnectionIssue {
            reason: "reset".into(),
        });

        assert_eq!(result.next_state.link, LinkState::Disconnected);
        assert_eq!(result.next_state.storage, StorageState::Connected);
        assert_eq!(result.next_state.leadership, LeadershipState::Leader);
        assert!(result.effects.contains(&Effect::OpenLink {
            server_url: "wss://x".into()
        }));
    }

    #[test]
    fn test_incompatible_version_is_terminal_for_link() {
        let mut machine = initialized();
        machine.process_event(MachineEvent::LeaderLockAcquired);
        machine.process_event(MachineEvent::LinkConnected);

        let result = machine.process_event(MachineEvent::LinkClosed {
            code: CloseCode::IncompatibleVersion,
            reason: "major mismatch".into(),
        });

        assert_eq!(result.next_state.link, LinkState::Incompatible);
        assert!(!result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::OpenLink { .. })));
        assert!(result.effects.contains(&Effect::Notify(CoordinatorMessage::SessionFault {
            kind: FaultKind::IncompatibleVersion
        })));

        // Later link events do not revive it
        let result = machine.process_event(MachineEvent::LinkConnected);
        assert_eq!(result.next_state.link, LinkState::Incompatible);
    }

    #[test]
    fn test_other_close_codes_reconnect() {
        let mut machine = initialized();
        machine.process_event(MachineEvent::LinkConnected);
        let result = machine.process_event(MachineEvent::LinkClosed {
            code: CloseCode::Other(1006),
            reason: "abnormal".into(),
        });
        assert_eq!(result.next_state.link, LinkState::Disconnected);
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::OpenLink { .. })));
    }

    #[test]
    fn test_link_open_failure_retries_entry_action() {
        let mut machine = initialized();
        let result = machine.process_event(MachineEvent::LinkOpenFailed {
            reason: "refused".into(),
        });
        assert_eq!(result.next_state.link, LinkState::Disconnected);
        assert_eq!(
            result.effects,
            vec![Effect::OpenLink {
                server_url: "wss://x".into()
            }]
        );
    }

    #[test]
    fn test_storage_permanent_failure_is_terminal() {
        let mut machine = initialized();
        let result = machine.process_event(MachineEvent::StorageOpenFailed {
            reason: "quota".into(),
            permanent: true,
        });
        assert_eq!(result.next_state.storage, StorageState::PermanentlyUnavailable);
        assert!(result.effects.contains(&Effect::Notify(CoordinatorMessage::SessionFault {
            kind: FaultKind::StorageUnavailable
        })));

        let result = machine.process_event(MachineEvent::StorageConnected);
        assert_eq!(result.next_state.storage, StorageState::PermanentlyUnavailable);
    }

    #[test]
    fn test_storage_transient_failure_retries() {
        let mut machine = initialized();
        let result = machine.process_event(MachineEvent::StorageOpenFailed {
            reason: "locked".into(),
            permanent: false,
        });
        assert_eq!(result.next_state.storage, StorageState::Disconnected);
        assert!(matches!(result.effects.as_slice(), [Effect::OpenStorage { .. }]));
    }

    #[test]
    fn test_leadership_never_steps_down() {
        let mut machine = initialized();
        machine.process_event(MachineEvent::LeaderLockAcquired);
        for event in [
            MachineEvent::LinkConnected,
            MachineEvent::LinkConnectionIssue { reason: "x".into() },
            MachineEvent::StorageOpenFailed {
                reason: "x".into(),
                permanent: true,
            },
            MachineEvent::LeaderLockAcquired,
        ] {
            machine.process_event(event);
            assert_eq!(machine.state().leadership, LeadershipState::Leader);
        }
    }

    #[test]
    fn test_handshake_sent_when_leader_and_connected_in_either_order() {
        let mut machine = initialized();
        machine.process_event(MachineEvent::LinkConnected);
        let result = machine.process_event(MachineEvent::LeaderLockAcquired);
        assert!(result.effects.contains(&Effect::SendHandshake));

        let mut machine = initialized();
        machine.process_event(MachineEvent::LeaderLockAcquired);
        let result = machine.process_event(MachineEvent::LinkConnected);
        assert!(result.effects.contains(&Effect::SendHandshake));

        // Reconnecting re-sends it
        machine.process_event(MachineEvent::LinkConnectionIssue { reason: "x".into() });
        let result = machine.process_event(MachineEvent::LinkConnected);
        assert!(result.effects.contains(&Effect::SendHandshake));
    }

    #[test]
    fn test_transition_forwarded_only_while_serving() {
        let mut machine = initialized();
        let result = machine.process_event(MachineEvent::Transition {
            payload: json!({"n": 1}),
        });
        assert!(result.effects.is_empty());

        machine.process_event(MachineEvent::LeaderLockAcquired);
        machine.process_event(MachineEvent::LinkConnected);
        let result = machine.process_event(MachineEvent::Transition {
            payload: json!({"n": 2}),
        });
        assert_eq!(
            result.effects,
            vec![Effect::ForwardTransition {
                payload: json!({"n": 2})
            }]
        );
    }

    #[test]
    fn test_state_change_notifies_status() {
        let mut machine = initialized();
        let result = machine.process_event(MachineEvent::StorageConnected);
        assert_eq!(
            result.effects,
            vec![Effect::Notify(CoordinatorMessage::SessionStatus {
                link: LinkState::Disconnected,
                storage: StorageState::Connected,
                leadership: LeadershipState::Follower,
            })]
        );
    }
}

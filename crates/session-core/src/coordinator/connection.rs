//! Connection Handle
//!
//! One per caller. Tracks which session the caller joined and when it must
//! next be heard from. The handle itself is passive: the coordinator's
//! connection task feeds it messages and tells it when the liveness deadline
//! has passed.

use super::registry::{ReleaseOutcome, SessionRegistry};
use crate::errors::{Result, SessionError};
use crate::protocol::CallerMessage;
use crate::session::Session;
use crate::state_machine::MachineEvent;
use crate::types::{ConnectionId, InitData, SessionKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Resettable deadline for hearing from a caller
#[derive(Debug, Clone, Copy)]
pub struct LivenessTimer {
    grace: Duration,
    deadline: Instant,
}

impl LivenessTimer {
    pub fn start(grace: Duration) -> Self {
        Self {
            grace,
            deadline: Instant::now() + grace,
        }
    }

    /// Push the deadline to a full grace period from now
    pub fn reset(&mut self) {
        self.deadline = Instant::now() + self.grace;
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// What [`ConnectionHandle::handle`] did with a message
#[derive(Debug, Clone)]
pub enum HandleOutcome {
    /// `Init` attached the handle to this session
    Attached(Arc<Session>),
    /// `Ping` pushed the liveness deadline out
    LivenessReset,
    /// `Transition` was queued on the session
    Forwarded,
    /// Message arrived before `Init` and was dropped
    Dropped,
}

/// Why a handle was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    Disconnected,
    Evicted,
    Faulted,
    Shutdown,
}

impl std::fmt::Display for DetachReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::Disconnected => "disconnected",
            Self::Evicted => "evicted",
            Self::Faulted => "faulted",
            Self::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// One caller's attachment point
pub struct ConnectionHandle {
    id: ConnectionId,
    registry: Arc<SessionRegistry>,
    session: Option<Arc<Session>>,
    liveness: LivenessTimer,
    closed: bool,
}

impl ConnectionHandle {
    /// New unattached handle; the liveness timer starts now
    pub fn new(registry: Arc<SessionRegistry>, grace: Duration) -> Self {
        Self::with_id(ConnectionId::new(), registry, grace)
    }

    pub fn with_id(id: ConnectionId, registry: Arc<SessionRegistry>, grace: Duration) -> Self {
        Self {
            id,
            registry,
            session: None,
            liveness: LivenessTimer::start(grace),
            closed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session.as_ref().map(|s| s.key())
    }

    pub fn liveness_deadline(&self) -> Instant {
        self.liveness.deadline()
    }

    pub fn is_expired(&self) -> bool {
        self.liveness.is_expired()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Dispatch one caller message
    pub async fn handle(&mut self, message: CallerMessage) -> Result<HandleOutcome> {
        if self.closed {
            return Err(SessionError::ConnectionClosed {
                connection_id: self.id,
            });
        }

        match message {
            CallerMessage::Init {
                server_url,
                local_database_name,
            } => {
                if let Some(session) = &self.session {
                    return Err(SessionError::DoubleInit {
                        connection_id: self.id,
                        session_key: session.key().clone(),
                    });
                }

                let init = InitData::new(server_url, local_database_name);
                let session = self.registry.acquire(&init).await;
                self.liveness.reset();
                info!(connection_id = %self.id, session_key = %session.key(), "Caller attached");
                self.session = Some(Arc::clone(&session));
                Ok(HandleOutcome::Attached(session))
            }
            CallerMessage::Ping {} => {
                if self.session.is_none() {
                    return Ok(HandleOutcome::Dropped);
                }
                self.liveness.reset();
                Ok(HandleOutcome::LivenessReset)
            }
            CallerMessage::Transition { payload } => match &self.session {
                Some(session) => {
                    session.send_event(MachineEvent::Transition { payload })?;
                    Ok(HandleOutcome::Forwarded)
                }
                None => {
                    debug!(connection_id = %self.id, "Dropping transition received before init");
                    Ok(HandleOutcome::Dropped)
                }
            },
        }
    }

    /// Liveness deadline passed: soft-evict the caller
    pub async fn expire(&mut self) -> Result<bool> {
        self.detach(DetachReason::Evicted).await
    }

    /// Caller-initiated teardown. Idempotent: later calls return `Ok(false)`.
    pub async fn close(&mut self) -> Result<bool> {
        self.detach(DetachReason::Disconnected).await
    }

    /// Tear down the handle, releasing its session exactly once
    pub async fn detach(&mut self, reason: DetachReason) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.closed = true;

        let Some(session) = self.session.take() else {
            debug!(connection_id = %self.id, %reason, "Unattached caller closed");
            return Ok(true);
        };

        let outcome = self.registry.release(session.key()).await?;
        match reason {
            DetachReason::Evicted => info!(
                connection_id = %self.id,
                session_key = %session.key(),
                "Caller evicted after {:?} without a ping",
                self.liveness.grace()
            ),
            _ => info!(
                connection_id = %self.id,
                session_key = %session.key(),
                %reason,
                "Caller detached"
            ),
        }
        if outcome == ReleaseOutcome::Destroyed {
            debug!(connection_id = %self.id, "Caller was the last one on its session");
        }
        Ok(true)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("session_key", &self.session_key())
            .field("deadline", &self.liveness.deadline())
            .field("closed", &self.closed)
            .finish()
    }
}

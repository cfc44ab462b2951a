//! Caller transports
//!
//! A caller reaches the coordinator over one of two transport kinds:
//!
//! - **Multiplexed**: one coordinator serves many callers over a shared
//!   channel and probes each of them with `Ping` on a fixed interval.
//! - **Dedicated**: a single caller owns the coordinator. It is never probed.
//!
//! [`CallerEndpoint`] is the caller's side of a connection; [`Outbox`] is
//! the coordinator's sending side, which enforces the probing rule.

use crate::errors::{Result, SessionError};
use crate::protocol::{CallerMessage, CoordinatorMessage};
use crate::types::ConnectionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Multiplexed,
    Dedicated,
}

impl TransportKind {
    /// Whether the coordinator sends liveness probes on this transport
    pub fn is_probed(self) -> bool {
        matches!(self, Self::Multiplexed)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multiplexed => f.write_str("multiplexed"),
            Self::Dedicated => f.write_str("dedicated"),
        }
    }
}

/// Inbound traffic from a caller
#[derive(Debug)]
pub(crate) enum CallerFrame {
    Message(CallerMessage),
    /// Undecoded JSON text, as a real transport would deliver it
    Raw(String),
    Disconnect,
}

/// Coordinator-to-caller sender for one connection
#[derive(Debug, Clone)]
pub struct Outbox {
    connection_id: ConnectionId,
    kind: TransportKind,
    tx: mpsc::UnboundedSender<CoordinatorMessage>,
}

impl Outbox {
    pub(crate) fn new(
        connection_id: ConnectionId,
        kind: TransportKind,
        tx: mpsc::UnboundedSender<CoordinatorMessage>,
    ) -> Self {
        Self {
            connection_id,
            kind,
            tx,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Deliver a message; fails once the caller has gone away
    pub fn send(&self, message: CoordinatorMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| SessionError::ConnectionClosed {
            connection_id: self.connection_id,
        })
    }

    /// Probe the caller. Only valid on multiplexed transports; reaching this
    /// on a dedicated one means the wrong code path ran.
    pub fn send_ping(&self) -> Result<()> {
        if !self.kind.is_probed() {
            error!(
                connection_id = %self.connection_id,
                "Refusing to send ping on a {} transport",
                self.kind
            );
            return Err(SessionError::internal(format!(
                "ping requested on {} transport for {}",
                self.kind, self.connection_id
            )));
        }
        self.send(CoordinatorMessage::Ping {})
    }
}

/// The caller's end of a coordinator connection
#[derive(Debug)]
pub struct CallerEndpoint {
    id: ConnectionId,
    kind: TransportKind,
    inbound: mpsc::UnboundedSender<CallerFrame>,
    outbound: mpsc::UnboundedReceiver<CoordinatorMessage>,
}

impl CallerEndpoint {
    pub(crate) fn new(
        id: ConnectionId,
        kind: TransportKind,
        inbound: mpsc::UnboundedSender<CallerFrame>,
        outbound: mpsc::UnboundedReceiver<CoordinatorMessage>,
    ) -> Self {
        Self {
            id,
            kind,
            inbound,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn send(&self, message: CallerMessage) -> Result<()> {
        self.push(CallerFrame::Message(message))
    }

    /// Send an undecoded frame; a frame that does not decode ends the
    /// connection with an invalid-message error
    pub fn send_raw(&self, frame: impl Into<String>) -> Result<()> {
        self.push(CallerFrame::Raw(frame.into()))
    }

    /// Next message from the coordinator; `None` once the connection ended
    pub async fn recv(&mut self) -> Option<CoordinatorMessage> {
        self.outbound.recv().await
    }

    /// Non-blocking variant of [`CallerEndpoint::recv`]
    pub fn try_recv(&mut self) -> Option<CoordinatorMessage> {
        self.outbound.try_recv().ok()
    }

    /// Ask the coordinator to tear this connection down. Safe to repeat.
    pub fn close(&self) {
        let _ = self.inbound.send(CallerFrame::Disconnect);
    }

    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }

    fn push(&self, frame: CallerFrame) -> Result<()> {
        self.inbound
            .send(frame)
            .map_err(|_| SessionError::ConnectionClosed { connection_id: self.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplexed_outbox_pings() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(ConnectionId::new(), TransportKind::Multiplexed, tx);

        outbox.send_ping().unwrap();
        assert_eq!(rx.try_recv().unwrap(), CoordinatorMessage::Ping {});
    }

    #[test]
    fn test_dedicated_outbox_refuses_ping() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(ConnectionId::new(), TransportKind::Dedicated, tx);

        let err = outbox.send_ping().unwrap_err();
        assert!(err.is_fatal());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_caller_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(ConnectionId::new(), TransportKind::Dedicated, tx);
        drop(rx);

        assert!(matches!(
            outbox.send(CoordinatorMessage::Ping {}),
            Err(SessionError::ConnectionClosed { .. })
        ));
    }
}

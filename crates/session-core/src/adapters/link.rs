//! Link adapter
//!
//! Bridges a [`RemoteLink`] (the external transport to the remote endpoint)
//! and a session's event queue. Each opened link gets a driver task that:
//!
//! - encodes outbound [`RemoteMessage`]s and writes them to the link
//! - turns inbound frames into [`MachineEvent::RemotePayload`]
//! - reports closes and I/O failures as link events
//!
//! Every event is stamped with the link's generation so the session can
//! discard stragglers from a link it already replaced.

use crate::errors::{Result, SessionError};
use crate::protocol::{encode_remote, CloseCode, RemoteMessage};
use crate::state_machine::MachineEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Something that happened on an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One text frame from the endpoint
    Frame(String),
    /// The endpoint closed the link
    Closed { code: CloseCode, reason: String },
}

/// An open connection to the remote endpoint
#[async_trait]
pub trait RemoteLink: Send + 'static {
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Next event; `None` means the link dropped without a close frame.
    ///
    /// Must be cancel-safe: the driver races it against outbound sends.
    async fn next_event(&mut self) -> Option<LinkEvent>;

    async fn close(&mut self, code: CloseCode, reason: &str);
}

/// Opens links to a server URL
#[async_trait]
pub trait RemoteConnector: Send + Sync + 'static {
    async fn connect(&self, server_url: &str) -> Result<Box<dyn RemoteLink>>;
}

/// Link event tagged with the generation of the link that produced it
#[derive(Debug)]
pub struct LinkReport {
    pub generation: u64,
    pub event: MachineEvent,
}

/// Owner's handle on a running link driver; dropping it aborts the driver
#[derive(Debug)]
pub struct LinkHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<RemoteMessage>,
    task: Option<JoinHandle<()>>,
}

impl LinkHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn send(&self, message: RemoteMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| SessionError::link("link driver has stopped"))
    }

    /// Let the driver send a normal close frame and exit on its own
    pub fn close(mut self) {
        self.task.take();
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Start the driver task for a freshly connected link
pub fn spawn_link_driver(
    mut link: Box<dyn RemoteLink>,
    generation: u64,
    reports: mpsc::UnboundedSender<LinkReport>,
) -> LinkHandle {
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<RemoteMessage>();

    let task = tokio::spawn(async move {
        let report = |event: MachineEvent| {
            let _ = reports.send(LinkReport { generation, event });
        };

        loop {
            tokio::select! {
                message = outbound_rx.recv() => {
                    let Some(message) = message else {
                        link.close(CloseCode::Normal, "session closed").await;
                        break;
                    };
                    let frame = match encode_remote(&message) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Dropping unencodable message on link {}: {}", generation, e);
                            continue;
                        }
                    };
                    if let Err(e) = link.send(frame).await {
                        report(MachineEvent::LinkConnectionIssue { reason: e.to_string() });
                        break;
                    }
                }
                event = link.next_event() => match event {
                    Some(LinkEvent::Frame(frame)) => match serde_json::from_str(&frame) {
                        Ok(payload) => report(MachineEvent::RemotePayload { payload }),
                        Err(e) => {
                            warn!("Invalid frame on link {}: {}", generation, e);
                            link.close(CloseCode::InvalidMessage, "invalid message").await;
                            report(MachineEvent::LinkClosed {
                                code: CloseCode::InvalidMessage,
                                reason: e.to_string(),
                            });
                            break;
                        }
                    },
                    Some(LinkEvent::Closed { code, reason }) => {
                        debug!("Link {} closed by endpoint with {}", generation, code);
                        report(MachineEvent::LinkClosed { code, reason });
                        break;
                    }
                    None => {
                        report(MachineEvent::LinkConnectionIssue {
                            reason: "link dropped".to_string(),
                        });
                        break;
                    }
                },
            }
        }
    });

    LinkHandle {
        generation,
        outbound,
        task: Some(task),
    }
}

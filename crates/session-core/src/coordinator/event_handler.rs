//! Per-connection event loop for SessionCoordinator

use super::connection::{ConnectionHandle, DetachReason, HandleOutcome};
use super::transport::{CallerFrame, Outbox};
use super::SessionCoordinator;
use crate::errors::SessionError;
use crate::protocol::{decode_caller, CloseCode, CoordinatorMessage};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

impl SessionCoordinator {
    /// Drive one caller until it disconnects, faults, goes silent, or the
    /// coordinator shuts down
    pub(crate) async fn run_connection(
        self: Arc<Self>,
        mut handle: ConnectionHandle,
        mut inbound: mpsc::UnboundedReceiver<CallerFrame>,
        outbox: Outbox,
    ) {
        let id = handle.id();
        let kind = outbox.kind();

        let liveness = tokio::time::sleep_until(handle.liveness_deadline());
        tokio::pin!(liveness);

        let period = self.config.ping_interval();
        let mut probe = interval_at(Instant::now() + period, period);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut notices: Option<broadcast::Receiver<CoordinatorMessage>> = None;

        let reason = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break DetachReason::Shutdown,

                frame = inbound.recv() => {
                    let message = match frame {
                        None | Some(CallerFrame::Disconnect) => break DetachReason::Disconnected,
                        Some(CallerFrame::Message(message)) => message,
                        Some(CallerFrame::Raw(text)) => match decode_caller(&text) {
                            Ok(message) => message,
                            Err(e) => {
                                reject(&outbox, &e);
                                break DetachReason::Faulted;
                            }
                        },
                    };
                    debug!(connection_id = %id, kind = message.kind(), "Caller message");

                    match handle.handle(message).await {
                        Ok(HandleOutcome::Attached(session)) => {
                            notices = Some(session.subscribe());
                            if let Some(mut info) = self.connections.get_mut(&id) {
                                info.session_key = Some(session.key().clone());
                            }
                            liveness.as_mut().reset(handle.liveness_deadline());
                            if outbox.send(session.state().status_message()).is_err() {
                                break DetachReason::Disconnected;
                            }
                        }
                        Ok(HandleOutcome::LivenessReset) => {
                            liveness.as_mut().reset(handle.liveness_deadline());
                        }
                        Ok(HandleOutcome::Forwarded) | Ok(HandleOutcome::Dropped) => {}
                        Err(e) => {
                            reject(&outbox, &e);
                            break DetachReason::Faulted;
                        }
                    }
                }

                () = &mut liveness => break DetachReason::Evicted,

                _ = probe.tick(), if kind.is_probed() => {
                    if outbox.send_ping().is_err() {
                        break DetachReason::Disconnected;
                    }
                }

                notice = next_notice(&mut notices) => match notice {
                    Ok(message) => {
                        if outbox.send(message).is_err() {
                            break DetachReason::Disconnected;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(connection_id = %id, "Caller fell behind; {} session notices skipped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!(connection_id = %id, "Session notice stream ended");
                        notices = None;
                    }
                },
            }
        };

        if let Err(e) = handle.detach(reason).await {
            error!(connection_id = %id, "Failed to detach caller: {}", e);
        }
        self.connections.remove(&id);
    }
}

/// Report a connection-scoped fault to the caller before the connection ends
fn reject(outbox: &Outbox, err: &SessionError) {
    if err.is_fatal() {
        error!("Connection fault: {}", err);
    } else {
        warn!("Rejecting caller: {}", err);
    }
    let code = err.close_code().unwrap_or(CloseCode::LinkFailure);
    let _ = outbox.send(CoordinatorMessage::Error {
        code,
        message: err.to_string(),
    });
}

async fn next_notice(
    notices: &mut Option<broadcast::Receiver<CoordinatorMessage>>,
) -> Result<CoordinatorMessage, RecvError> {
    match notices {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

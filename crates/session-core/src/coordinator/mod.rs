//! Top-level Session Coordinator
//!
//! Accepts caller connections, attaches them to shared sessions through the
//! [`SessionRegistry`], and runs each connection's liveness and probing loop.

// Module declarations
mod coordinator;
mod event_handler;
pub mod connection;
pub mod registry;
pub mod transport;

// Re-exports
pub use connection::{ConnectionHandle, DetachReason, HandleOutcome, LivenessTimer};
pub use coordinator::{ConnectionInfo, SessionCoordinator};
pub use registry::{RegistryStats, ReleaseOutcome, SessionRegistry};
pub use transport::{CallerEndpoint, Outbox, TransportKind};

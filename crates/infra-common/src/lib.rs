//! Common infrastructure for the tabsync workspace
//!
//! Shared building blocks used by every tabsync crate:
//!
//! - [`errors`]: the common error type and error-context helpers
//! - [`logging`]: `tracing` subscriber bootstrap and contextual spans
//! - [`config`]: TOML file and environment-variable loading helpers

pub mod config;
pub mod errors;
pub mod logging;

pub use errors::types::{Error, Result};
pub use logging::setup::{setup_logging, LoggingConfig};

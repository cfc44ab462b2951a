use thiserror::Error;

/// Result alias for infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared infrastructure layer
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unloadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem or other I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),

    /// Anything else, usually an error that picked up context on the way up
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

//! Local storage adapter

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Worth retrying (locked, busy, quota momentarily exceeded)
    #[error("Storage temporarily unavailable: {0}")]
    Transient(String),

    /// Will never open for this session
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// The local storage engine a session attaches to
#[async_trait]
pub trait StorageEngine: Send + Sync + 'static {
    /// Open (or attach to) the storage called `name`
    async fn open(&self, name: &str) -> Result<(), StorageError>;
}

//! Core identifier types
//!
//! Defines the keys and ids the rest of the crate passes around: the
//! [`SessionKey`] that names a shared sync session, the per-caller
//! [`ConnectionId`], and the per-instance [`SessionInstanceId`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Identifies one logical sync session.
///
/// A pure composite of the server URL and the local database name: two
/// callers that ask for the same pair always resolve to the same key.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionKey {
    server_url: String,
    local_database_name: String,
}

impl SessionKey {
    pub fn new(server_url: impl Into<String>, local_database_name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            local_database_name: local_database_name.into(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn local_database_name(&self) -> &str {
        &self.local_database_name
    }

    /// Name of the mutual-exclusion lock that elects this session's leader
    pub fn leader_lock_name(&self) -> String {
        format!("tabsync:leader:{}", self)
    }

    /// Name of the local storage attached for this session.
    ///
    /// `{local_database_name}-{hex(sha256(server_url)[..8])}` so the same
    /// database name used against two servers never shares storage.
    pub fn storage_name(&self) -> String {
        let digest = Sha256::digest(self.server_url.as_bytes());
        let fingerprint: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}-{}", self.local_database_name, fingerprint)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.server_url, self.local_database_name)
    }
}

/// Data carried by a caller's `Init` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitData {
    pub server_url: String,
    pub local_database_name: String,
}

impl InitData {
    pub fn new(server_url: impl Into<String>, local_database_name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            local_database_name: local_database_name.into(),
        }
    }

    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.server_url.clone(), self.local_database_name.clone())
    }
}

/// Identifier of one attached caller
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifier of one Session instance.
///
/// A key that is torn down and recreated gets a fresh instance id, which
/// makes "no state leaks across instances" observable.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionInstanceId(pub Uuid);

impl SessionInstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

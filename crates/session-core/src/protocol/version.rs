//! Handshake version compatibility
//!
//! A client and endpoint are compatible when their semantic versions share a
//! major component. Endpoints close the link with
//! [`CloseCode::IncompatibleVersion`](super::CloseCode::IncompatibleVersion)
//! otherwise.

use crate::errors::{Result, SessionError};
use semver::Version;

pub fn parse_version(raw: &str) -> Result<Version> {
    Version::parse(raw.trim())
        .map_err(|e| SessionError::invalid_message(format!("bad version {:?}: {}", raw, e)))
}

pub fn is_compatible(client: &Version, server: &Version) -> bool {
    client.major == server.major
}

/// Endpoint-side check for an incoming `Init { version }`
pub fn check_compatibility(client: &str, server: &Version) -> Result<()> {
    let client_version = parse_version(client)?;
    if is_compatible(&client_version, server) {
        Ok(())
    } else {
        Err(SessionError::IncompatibleVersion {
            client: client_version.to_string(),
            server: server.to_string(),
        })
    }
}

//! Configuration loading helpers
//!
//! Components own their configuration structs; this module only knows how to
//! read them. Two layers are supported:
//!
//! - a TOML document (string or file) deserialized with `serde`
//! - individual environment-variable overrides applied on top

use crate::errors::types::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;

/// Parse a TOML document into `T`
pub fn from_toml_str<T: DeserializeOwned>(contents: &str) -> Result<T> {
    toml::from_str(contents).map_err(|e| Error::Config(format!("Parse error: {}", e)))
}

/// Read and parse a TOML configuration file
pub fn from_toml_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    tracing::debug!("Loaded configuration file {}", path.display());
    from_toml_str(&contents)
}

/// Read an environment variable and parse it.
///
/// Returns `Ok(None)` when the variable is unset and an error when it is set
/// but does not parse.
pub fn env_override<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", key, e))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(Error::Config(format!("Unreadable value for {}: {}", key, e))),
    }
}

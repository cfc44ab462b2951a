//! Coordinator configuration
//!
//! Defaults match the behaviour described for the coordinator: a 60 second
//! caller grace period and a 5 second probe interval on multiplexed
//! transports. Values can come from a TOML document, a file, or
//! `TABSYNC_*` environment overrides.

use crate::errors::{Result, SessionError};
use crate::protocol::parse_version;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tabsync_infra_common::config::{env_override, from_toml_file, from_toml_str};
use tabsync_infra_common::errors::ErrorExt;

pub const DEFAULT_LIVENESS_GRACE: Duration = Duration::from_secs(60);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Backoff applied between link (and storage) open attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 250,
            max_backoff_ms: 30_000,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Upper bound of the delay before retry number `attempt` (1-based), or
    /// `None` once the attempt budget is spent. Attempt 0 is the initial
    /// open and has no delay.
    pub fn backoff_ceiling(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        let factor = 1u64.checked_shl(attempt.saturating_sub(1).min(32)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Some(Duration::from_millis(ms))
    }

    /// Jittered delay in `[0.8, 1.0] * ceiling`
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        let ceiling = self.backoff_ceiling(attempt)?;
        if ceiling.is_zero() {
            return Some(ceiling);
        }
        let scale = rand::thread_rng().gen_range(0.8..=1.0);
        Some(ceiling.mul_f64(scale))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Time a caller may stay silent before it is evicted
    pub liveness_grace_ms: u64,
    /// Probe interval for multiplexed transports
    pub ping_interval_ms: u64,
    /// Version announced in the remote `Init` handshake
    pub client_version: String,
    pub reconnect: ReconnectConfig,
    /// Capacity of each session's caller fan-out channel
    pub event_queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            liveness_grace_ms: DEFAULT_LIVENESS_GRACE.as_millis() as u64,
            ping_interval_ms: DEFAULT_PING_INTERVAL.as_millis() as u64,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            reconnect: ReconnectConfig::default(),
            event_queue_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    pub fn liveness_grace(&self) -> Duration {
        Duration::from_millis(self.liveness_grace_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn with_liveness_grace(mut self, grace: Duration) -> Self {
        self.liveness_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = from_toml_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = from_toml_file(path).with_context("session-core", "load coordinator config")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `TABSYNC_LIVENESS_GRACE_MS`,
    /// `TABSYNC_PING_INTERVAL_MS` and `TABSYNC_CLIENT_VERSION`
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(grace) = env_override::<u64>("TABSYNC_LIVENESS_GRACE_MS")? {
            self.liveness_grace_ms = grace;
        }
        if let Some(interval) = env_override::<u64>("TABSYNC_PING_INTERVAL_MS")? {
            self.ping_interval_ms = interval;
        }
        if let Some(version) = env_override::<String>("TABSYNC_CLIENT_VERSION")? {
            self.client_version = version;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.liveness_grace_ms == 0 {
            return Err(SessionError::config("liveness_grace_ms must be positive"));
        }
        if self.ping_interval_ms == 0 {
            return Err(SessionError::config("ping_interval_ms must be positive"));
        }
        if self.ping_interval_ms >= self.liveness_grace_ms {
            return Err(SessionError::config(format!(
                "ping_interval_ms ({}) must be shorter than liveness_grace_ms ({})",
                self.ping_interval_ms, self.liveness_grace_ms
            )));
        }
        if self.event_queue_capacity == 0 {
            return Err(SessionError::config("event_queue_capacity must be positive"));
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(SessionError::config(
                "reconnect.initial_backoff_ms exceeds reconnect.max_backoff_ms",
            ));
        }
        parse_version(&self.client_version)
            .map_err(|e| SessionError::config(format!("client_version: {}", e)))?;
        Ok(())
    }
}

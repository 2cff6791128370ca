//! Cluster tracking configuration
//!
//! Loaded from a TOML file; every field has a default so a partial file
//! (or none at all) is valid.

use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ClusterResult};

/// Default name of the cookie carrying the tracking token
pub const DEFAULT_TRACKING_COOKIE: &str = "CLUSTER-TRACKING";
/// Default registry region for server registrations
pub const DEFAULT_SERVER_REGION: &str = "server-tracking-cache";
/// Default registry region for user tracking entries
pub const DEFAULT_TRACKING_REGION: &str = "user-tracking-cache";

/// Longest accepted heartbeat period (one day)
pub const MAX_HEARTBEAT_INTERVAL_SECS: u64 = 24 * 60 * 60;
/// Longest accepted user freshness window (thirty days)
pub const MAX_FRESHNESS_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

/// Cluster tracking configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Period between registration refreshes
    pub heartbeat_interval_secs: u64,
    /// Wait between claiming a number and verifying it
    pub settle_delay_millis: u64,
    /// Claim/verify rounds before activation gives up
    pub max_settle_attempts: u32,
    /// First backoff step after losing a collision
    pub backoff_base_millis: u64,
    /// Upper bound for a single backoff step
    pub backoff_max_millis: u64,
    /// Maximum age of a user tracking entry
    pub freshness_window_secs: u64,
    /// Cookie carrying the tracking token
    pub tracking_cookie_name: String,
    /// Region holding server registrations
    pub server_region: String,
    /// Region holding user tracking entries
    pub tracking_region: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 300,
            settle_delay_millis: 1000,
            max_settle_attempts: 10,
            backoff_base_millis: 250,
            backoff_max_millis: 8000,
            freshness_window_secs: 30 * 60,
            tracking_cookie_name: DEFAULT_TRACKING_COOKIE.to_string(),
            server_region: DEFAULT_SERVER_REGION.to_string(),
            tracking_region: DEFAULT_TRACKING_REGION.to_string(),
        }
    }
}

impl ClusterConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ClusterResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ClusterError::Config(format!("Failed to read config: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ClusterError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> ClusterResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClusterError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| ClusterError::Config(format!("Failed to write config: {}", e)))
    }

    /// Reject settings the tracker cannot run with
    pub fn validate(&self) -> ClusterResult<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ClusterError::Config("heartbeat_interval_secs must be positive".into()));
        }
        if self.heartbeat_interval_secs > MAX_HEARTBEAT_INTERVAL_SECS {
            return Err(ClusterError::Config(format!(
                "heartbeat_interval_secs must not exceed {}",
                MAX_HEARTBEAT_INTERVAL_SECS
            )));
        }
        if self.freshness_window_secs > MAX_FRESHNESS_WINDOW_SECS {
            return Err(ClusterError::Config(format!(
                "freshness_window_secs must not exceed {}",
                MAX_FRESHNESS_WINDOW_SECS
            )));
        }
        if self.max_settle_attempts == 0 {
            return Err(ClusterError::Config("max_settle_attempts must be positive".into()));
        }
        if self.backoff_max_millis < self.backoff_base_millis {
            return Err(ClusterError::Config(
                "backoff_max_millis must not be below backoff_base_millis".into(),
            ));
        }
        if self.tracking_cookie_name.is_empty() {
            return Err(ClusterError::Config("tracking_cookie_name must not be empty".into()));
        }
        if self.server_region.is_empty() || self.tracking_region.is_empty() {
            return Err(ClusterError::Config("region names must not be empty".into()));
        }
        if self.server_region == self.tracking_region {
            return Err(ClusterError::Config(
                "server and tracking records need separate regions".into(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_millis)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_millis)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_millis)
    }

    /// Freshness window as a chrono duration, for comparing record timestamps
    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freshness_window_secs as i64)
    }
}

//! Records stored in the replicated registry
//!
//! Server registrations and user tracking entries live in separate regions
//! and are kept as distinct types; nothing in the registry is shared between
//! the two namespaces.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Registration of a live server in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Stable identity of the process, also the registry key
    pub server_id: String,
    /// Cluster-scoped ordinal, unique among live entries once settled
    pub server_number: u32,
    /// When the number was claimed; refreshes keep it
    pub registered_at: DateTime<Utc>,
}

impl ServerEntry {
    pub fn new(server_id: impl Into<String>, server_number: u32, registered_at: DateTime<Utc>) -> Self {
        Self {
            server_id: server_id.into(),
            server_number,
            registered_at,
        }
    }
}

// Claims compare by owner and number; the claim time only ranks collisions.
impl PartialEq for ServerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.server_id == other.server_id && self.server_number == other.server_number
    }
}

impl Eq for ServerEntry {}

/// Last known user behind a tracking token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTrackingEntry {
    /// Opaque session token carried by the client
    pub token: String,
    /// Last authenticated user, empty for anonymous requests
    pub user_id: String,
    /// Server that last refreshed the entry
    pub owning_server_id: String,
    /// Creation or refresh time
    pub refreshed_at: DateTime<Utc>,
}

impl UserTrackingEntry {
    pub fn new(
        token: impl Into<String>,
        user_id: impl Into<String>,
        owning_server_id: impl Into<String>,
        refreshed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
            owning_server_id: owning_server_id.into(),
            refreshed_at,
        }
    }

    /// Whether the entry is older than the freshness window
    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.refreshed_at > window
    }

    /// Whether the entry must be rewritten for `user_id` seen at `now`
    pub fn needs_refresh(&self, user_id: &str, now: DateTime<Utc>, window: Duration) -> bool {
        self.is_expired(now, window) || self.user_id != user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn test_server_entry_equality_ignores_timestamp() {
        let a = ServerEntry::new("1-host", 3, at(0));
        let b = ServerEntry::new("1-host", 3, at(5));
        assert_eq!(a, b);
        assert_ne!(a, ServerEntry::new("1-host", 4, at(0)));
    }

    #[test]
    fn test_tracking_entry_expiry() {
        let entry = UserTrackingEntry::new("tok", "alice", "1-host", at(0));
        let window = Duration::minutes(30);

        assert!(!entry.is_expired(at(30), window));
        assert!(entry.is_expired(at(31), window));
    }

    #[test]
    fn test_user_change_forces_refresh() {
        let entry = UserTrackingEntry::new("tok", "", "1-host", at(0));
        let window = Duration::minutes(30);

        assert!(!entry.needs_refresh("", at(1), window));
        assert!(entry.needs_refresh("alice", at(1), window));
    }
}

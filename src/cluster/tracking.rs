//! User affinity tracking
//!
//! Maps an opaque tracking token, carried in a cookie, to the last user seen
//! with it and the server that saw them. Tracking is best effort: registry
//! failures make a request look untracked and never reach the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use tracing::{debug, warn};

use super::identity::ServerIdentity;
use crate::clock::Clock;
use crate::config::ClusterConfig;
use crate::error::RegistryResult;
use crate::registry::Region;
use crate::transport::{TrackingCookie, TrackingRequest, TrackingResponse};
use crate::types::UserTrackingEntry;

/// What `track_user` did for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingOutcome {
    /// An entry was created or rewritten for an inbound token
    Refreshed,
    /// The inbound token already had a current entry
    Fresh,
    /// A new token was handed to the client; nothing was stored yet
    Minted(String),
    /// Nothing could be tracked for this request
    Untracked,
}

/// Tracks users across servers through the shared registry
#[derive(Debug)]
pub struct UserTracker {
    users: Region<UserTrackingEntry>,
    server_id: ServerIdentity,
    clock: Arc<dyn Clock>,
    cookie_name: String,
    freshness_window: chrono::Duration,
    startup_millis: i64,
    mint_sequence: AtomicU64,
}

impl UserTracker {
    pub fn new(
        users: Region<UserTrackingEntry>,
        server_id: ServerIdentity,
        clock: Arc<dyn Clock>,
        config: &ClusterConfig,
    ) -> Self {
        let startup_millis = clock.now_millis();
        Self {
            users,
            server_id,
            clock,
            cookie_name: config.tracking_cookie_name.clone(),
            freshness_window: config.freshness_window(),
            startup_millis,
            mint_sequence: AtomicU64::new(0),
        }
    }

    /// Name of the tracking cookie
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Refresh tracking for every token on the request, or hand out a new
    /// token when there is none and the response can still take a cookie.
    ///
    /// A freshly minted token is not stored. It is only written once a client
    /// sends it back, so clients that never return a cookie cannot fill the
    /// shared store.
    pub async fn track_user<Q, S>(&self, request: &Q, response: &mut S) -> TrackingOutcome
    where
        Q: TrackingRequest + ?Sized,
        S: TrackingResponse + ?Sized,
    {
        let tokens = request.cookie_values(&self.cookie_name);
        let user = request.remote_user().unwrap_or_default();

        if tokens.is_empty() {
            if response.is_committed() {
                return TrackingOutcome::Untracked;
            }
            let token = self.mint_token();
            response.add_cookie(TrackingCookie::site_wide(&self.cookie_name, &token));
            debug!(token = %token, "issued tracking token");
            return TrackingOutcome::Minted(token);
        }

        let mut outcome = TrackingOutcome::Untracked;
        for token in tokens {
            match self.ping_tracking(&token, &user).await {
                Ok(true) => outcome = TrackingOutcome::Refreshed,
                Ok(false) => {
                    if outcome == TrackingOutcome::Untracked {
                        outcome = TrackingOutcome::Fresh;
                    }
                }
                Err(e) => warn!(token = %token, error = %e, "user tracking update failed"),
            }
        }
        outcome
    }

    /// Current entry for `token`, evicting it if it has gone stale
    pub async fn get_user(&self, token: &str) -> Option<UserTrackingEntry> {
        let entry = match self.users.get(token).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(token = %token, error = %e, "user tracking lookup failed");
                return None;
            }
        };

        if entry.is_expired(self.clock.now(), self.freshness_window) {
            if let Err(e) = self.users.remove(token).await {
                warn!(token = %token, error = %e, "failed to evict expired tracking entry");
            }
            return None;
        }
        Some(entry)
    }

    /// Rewrite the entry when missing, stale, or held by another user.
    /// Returns whether a write happened.
    async fn ping_tracking(&self, token: &str, user: &str) -> RegistryResult<bool> {
        let now = self.clock.now();
        let current = self.users.get(token).await?;
        let stale = current
            .as_ref()
            .map_or(true, |entry| entry.needs_refresh(user, now, self.freshness_window));

        if stale {
            let entry = UserTrackingEntry::new(token, user, self.server_id.as_str(), now);
            self.users.put(token, &entry).await?;
        }
        Ok(stale)
    }

    fn mint_token(&self) -> String {
        let thread = std::thread::current();
        let seed = format!(
            "{}:{}:{}:{}",
            thread.name().unwrap_or("unnamed"),
            self.startup_millis,
            self.clock.now_millis(),
            self.mint_sequence.fetch_add(1, Ordering::Relaxed),
        );
        let hash = digest(&SHA1_FOR_LEGACY_USE_ONLY, seed.as_bytes());
        format!("{}-{}", self.server_id, hex::encode(hash.as_ref()))
    }
}

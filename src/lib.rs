//! # Cluster Tracking
//!
//! Membership and identity for a cluster of stateless servers that share
//! nothing but a replicated key/value registry.
//!
//! Each server registers itself, settles a small server number no other live
//! server holds, refreshes its registration on a heartbeat, issues
//! cluster-wide unique ids from that number, and tracks which user is behind
//! a session token across servers.

#![warn(clippy::all)]

pub mod types;
pub mod error;
pub mod config;
pub mod clock;
pub mod registry;
pub mod transport;
pub mod cluster;
/// Command-line interface and argument parsing
pub mod cli;

// Re-export main types
pub use types::{ServerEntry, UserTrackingEntry};
pub use error::{ClusterError, ClusterResult, IdentityError, RegistryError, RegistryResult};
pub use config::ClusterConfig;
pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::{MemoryRegistry, Region, Registry};
pub use transport::{SimpleRequest, SimpleResponse, TrackingCookie, TrackingRequest, TrackingResponse};
pub use cluster::{
    ClusterTracker, ClusterUniqueId, HeartbeatHandle, MembershipState, ServerIdentity, TrackingOutcome,
    UniqueIdGenerator,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

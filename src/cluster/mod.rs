//! Cluster membership and identity
//!
//! Server identity, server number settling, heartbeat, unique ids and user
//! affinity tracking, all built on the replicated registry.

pub mod identity;
pub mod numbering;
pub mod membership;
pub mod unique_id;
pub mod tracking;

pub use identity::{IdentitySource, PlatformIdentity, ServerIdentity, StaticIdentity};
pub use membership::{ClusterTracker, HeartbeatHandle, MembershipState};
pub use numbering::ClaimVerdict;
pub use tracking::{TrackingOutcome, UserTracker};
pub use unique_id::{ClusterUniqueId, UniqueIdGenerator, EPOCH_MILLIS};

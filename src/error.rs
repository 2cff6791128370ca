//! Error types for cluster tracking

use thiserror::Error;

/// Result type for membership, numbering and id operations
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Main error type for cluster tracking operations
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The process identity could not be determined
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// The replicated registry rejected or failed an operation
    #[error("Registry unavailable: {0}")]
    Registry(#[from] RegistryError),

    /// The settling loop did not converge on a unique number
    #[error("Server number did not settle after {attempts} attempts")]
    SettleExhausted {
        /// Number of claim/verify rounds performed
        attempts: u32,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: expected {expected}, found {found}")]
    InvalidState {
        /// State the operation requires
        expected: &'static str,
        /// State the tracker is in
        found: &'static str,
    },

    /// The tracker has not reached the ready state
    #[error("Server is not registered in the cluster yet")]
    NotReady,

    /// Server number does not fit the unique id layout
    #[error("Server number {0} exceeds the unique id range")]
    ServerNumberOverflow(u32),

    /// Text could not be decoded as a unique id
    #[error("Invalid unique id: {0}")]
    InvalidUniqueId(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Registry access errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The store cannot be reached
    #[error("region {region} unavailable: {reason}")]
    Unavailable {
        /// Region that was accessed
        region: String,
        /// Failure description
        reason: String,
    },

    /// A record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RegistryError {
    /// Build an unavailable error for a region
    pub fn unavailable(region: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistryError::Unavailable {
            region: region.into(),
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for RegistryError {
    fn from(err: bincode::Error) -> Self {
        RegistryError::Serialization(err.to_string())
    }
}

/// Errors raised while establishing the server identity
#[derive(Error, Debug)]
pub enum IdentityError {
    /// The platform did not provide a host name
    #[error("Host name unavailable: {0}")]
    HostName(String),

    /// The identity source produced an empty name
    #[error("Identity source returned an empty name")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClusterError::SettleExhausted { attempts: 4 };
        assert_eq!(err.to_string(), "Server number did not settle after 4 attempts");

        let err: ClusterError = RegistryError::unavailable("server-tracking-cache", "down").into();
        assert_eq!(
            err.to_string(),
            "Registry unavailable: region server-tracking-cache unavailable: down"
        );
    }

    #[test]
    fn test_identity_error_converts() {
        let err: ClusterError = IdentityError::Empty.into();
        assert!(matches!(err, ClusterError::Identity(IdentityError::Empty)));
    }
}

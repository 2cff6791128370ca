//! Server identity
//!
//! Every process is identified by its runtime name, `pid@host`, with the
//! characters that could clash with registry keys or tracking tokens
//! replaced by `-`.

use std::fmt;

use crate::error::IdentityError;

/// Platform source of the raw runtime name
pub trait IdentitySource: Send + Sync {
    /// `processId@hostName` shaped name of the running process
    fn runtime_name(&self) -> Result<String, IdentityError>;
}

/// Identity taken from the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformIdentity;

impl IdentitySource for PlatformIdentity {
    fn runtime_name(&self) -> Result<String, IdentityError> {
        Ok(format!("{}@{}", std::process::id(), host_name()?))
    }
}

#[cfg(unix)]
fn host_name() -> Result<String, IdentityError> {
    let name = nix::unistd::gethostname().map_err(|e| IdentityError::HostName(e.to_string()))?;
    name.into_string()
        .map_err(|raw| IdentityError::HostName(format!("non UTF-8 host name {:?}", raw)))
}

#[cfg(not(unix))]
fn host_name() -> Result<String, IdentityError> {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .map_err(|e| IdentityError::HostName(e.to_string()))
}

/// Fixed runtime name, for embedding and tests
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl IdentitySource for StaticIdentity {
    fn runtime_name(&self) -> Result<String, IdentityError> {
        Ok(self.0.clone())
    }
}

/// Normalised identity of the running server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerIdentity(String);

impl ServerIdentity {
    /// Resolve the identity once from `source`
    pub fn identify(source: &dyn IdentitySource) -> Result<Self, IdentityError> {
        let raw = source.runtime_name()?;
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '@' | ':' | '/' => '-',
                c if c.is_whitespace() => '-',
                c => c,
            })
            .collect();

        if normalized.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSource;

    impl IdentitySource for BrokenSource {
        fn runtime_name(&self) -> Result<String, IdentityError> {
            Err(IdentityError::HostName("no host".into()))
        }
    }

    #[test]
    fn test_separator_characters_replaced() {
        let id = ServerIdentity::identify(&StaticIdentity("1234@app server:1/a".into())).unwrap();
        assert_eq!(id.as_str(), "1234-app-server-1-a");
    }

    #[test]
    fn test_empty_identity_rejected() {
        let err = ServerIdentity::identify(&StaticIdentity("  ".into())).unwrap_err();
        assert!(matches!(err, IdentityError::Empty));
    }

    #[test]
    fn test_source_failure_propagates() {
        assert!(matches!(
            ServerIdentity::identify(&BrokenSource),
            Err(IdentityError::HostName(_))
        ));
    }

    #[test]
    fn test_platform_identity_contains_pid() {
        let id = ServerIdentity::identify(&PlatformIdentity).unwrap();
        let pid = std::process::id().to_string();
        assert!(id.as_str().starts_with(&format!("{}-", pid)));
        assert!(!id.as_str().contains('@'));
    }
}

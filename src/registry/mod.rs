//! Replicated registry contract
//!
//! The cluster-wide cache is external; this module only describes how it is
//! consumed. A [`Registry`] stores opaque bytes under `(region, key)` and
//! makes writes visible to other nodes eventually. [`Region`] layers a typed
//! record over one region so server and user records never share a
//! namespace.

pub mod memory;

pub use memory::MemoryRegistry;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::RegistryResult;

/// Cluster-replicated key/value store
#[async_trait]
pub trait Registry: Send + Sync + fmt::Debug {
    /// Read the value under `key`
    async fn get(&self, region: &str, key: &str) -> RegistryResult<Option<Vec<u8>>>;

    /// Write `value` under `key`, returning what was there before
    async fn put(&self, region: &str, key: &str, value: Vec<u8>) -> RegistryResult<Option<Vec<u8>>>;

    /// Delete `key`, returning the removed value
    async fn remove(&self, region: &str, key: &str) -> RegistryResult<Option<Vec<u8>>>;

    /// All values currently visible in the region
    async fn list(&self, region: &str) -> RegistryResult<Vec<Vec<u8>>>;
}

/// Typed view over one registry region
pub struct Region<T> {
    registry: Arc<dyn Registry>,
    name: String,
    _record: PhantomData<fn() -> T>,
}

impl<T> Region<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(registry: Arc<dyn Registry>, name: impl Into<String>) -> Self {
        Self {
            registry,
            name: name.into(),
            _record: PhantomData,
        }
    }

    pub async fn get(&self, key: &str) -> RegistryResult<Option<T>> {
        match self.registry.get(&self.name, key).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, key: &str, record: &T) -> RegistryResult<Option<T>> {
        let bytes = bincode::serialize(record)?;
        match self.registry.put(&self.name, key, bytes).await? {
            Some(previous) => Ok(Some(bincode::deserialize(&previous)?)),
            None => Ok(None),
        }
    }

    pub async fn remove(&self, key: &str) -> RegistryResult<Option<T>> {
        match self.registry.remove(&self.name, key).await? {
            Some(previous) => Ok(Some(bincode::deserialize(&previous)?)),
            None => Ok(None),
        }
    }

    /// Decode every record in the region
    pub async fn list(&self) -> RegistryResult<Vec<T>> {
        self.registry
            .list(&self.name)
            .await?
            .iter()
            .map(|bytes| bincode::deserialize(bytes).map_err(Into::into))
            .collect()
    }
}

impl<T> Clone for Region<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            name: self.name.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Region<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ServerEntry, UserTrackingEntry};
    use chrono::Utc;

    #[tokio::test]
    async fn test_server_entry_round_trip() {
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let servers: Region<ServerEntry> = Region::new(registry, "servers");

        let entry = ServerEntry::new("42-node-a", 7, Utc::now());
        assert!(servers.put("42-node-a", &entry).await.unwrap().is_none());

        let read = servers.get("42-node-a").await.unwrap().unwrap();
        assert_eq!(read, entry);
        assert_eq!(read.registered_at, entry.registered_at);
    }

    #[tokio::test]
    async fn test_put_returns_previous() {
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let servers: Region<ServerEntry> = Region::new(registry, "servers");

        servers.put("a", &ServerEntry::new("a", 0, Utc::now())).await.unwrap();
        let previous = servers.put("a", &ServerEntry::new("a", 1, Utc::now())).await.unwrap();
        assert_eq!(previous.map(|e| e.server_number), Some(0));

        let removed = servers.remove("a").await.unwrap();
        assert_eq!(removed.map(|e| e.server_number), Some(1));
        assert!(servers.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_regions_are_separate() {
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let servers: Region<ServerEntry> = Region::new(registry.clone(), "servers");
        let users: Region<UserTrackingEntry> = Region::new(registry, "users");

        servers.put("k", &ServerEntry::new("k", 0, Utc::now())).await.unwrap();
        users.put("t", &UserTrackingEntry::new("t", "bob", "k", Utc::now())).await.unwrap();

        assert_eq!(servers.list().await.unwrap().len(), 1);
        assert_eq!(users.list().await.unwrap().len(), 1);
        assert!(users.get("k").await.unwrap().is_none());
    }
}

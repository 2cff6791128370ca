//! In-process registry
//!
//! A [`Registry`] backed by concurrent maps. Entries can be given a time to
//! live to model the expiry a replicated cache applies to entries that stop
//! being refreshed, and the whole store can be switched off to model an
//! outage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::Registry;
use crate::error::{RegistryError, RegistryResult};

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    written_at: Instant,
}

/// Registry kept entirely in memory
#[derive(Debug)]
pub struct MemoryRegistry {
    regions: DashMap<String, DashMap<String, StoredValue>>,
    entry_ttl: Option<Duration>,
    available: AtomicBool,
}

impl MemoryRegistry {
    /// Registry whose entries never expire
    pub fn new() -> Self {
        Self {
            regions: DashMap::new(),
            entry_ttl: None,
            available: AtomicBool::new(true),
        }
    }

    /// Registry that drops entries not rewritten within `ttl`
    pub fn with_entry_ttl(ttl: Duration) -> Self {
        Self {
            entry_ttl: Some(ttl),
            ..Self::new()
        }
    }

    /// Simulate the store going away or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entries in a region
    pub fn len(&self, region: &str) -> usize {
        self.regions
            .get(region)
            .map(|entries| entries.iter().filter(|e| !self.is_stale(e.value())).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, region: &str) -> bool {
        self.len(region) == 0
    }

    fn check_available(&self, region: &str) -> RegistryResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::unavailable(region, "registry offline"))
        }
    }

    fn is_stale(&self, value: &StoredValue) -> bool {
        match self.entry_ttl {
            Some(ttl) => value.written_at.elapsed() > ttl,
            None => false,
        }
    }

    fn evict_stale(&self, region: &str) {
        if self.entry_ttl.is_none() {
            return;
        }
        if let Some(entries) = self.regions.get(region) {
            entries.retain(|_, value| !self.is_stale(value));
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get(&self, region: &str, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        self.check_available(region)?;
        self.evict_stale(region);
        Ok(self
            .regions
            .get(region)
            .and_then(|entries| entries.get(key).map(|v| v.bytes.clone())))
    }

    async fn put(&self, region: &str, key: &str, value: Vec<u8>) -> RegistryResult<Option<Vec<u8>>> {
        self.check_available(region)?;
        self.evict_stale(region);
        let entries = self.regions.entry(region.to_string()).or_default();
        let previous = entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                written_at: Instant::now(),
            },
        );
        Ok(previous.map(|v| v.bytes))
    }

    async fn remove(&self, region: &str, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        self.check_available(region)?;
        self.evict_stale(region);
        Ok(self
            .regions
            .get(region)
            .and_then(|entries| entries.remove(key).map(|(_, v)| v.bytes)))
    }

    async fn list(&self, region: &str) -> RegistryResult<Vec<Vec<u8>>> {
        self.check_available(region)?;
        self.evict_stale(region);
        Ok(self
            .regions
            .get(region)
            .map(|entries| entries.iter().map(|e| e.value().bytes.clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let registry = MemoryRegistry::new();
        assert!(registry.get("r", "k").await.unwrap().is_none());

        assert!(registry.put("r", "k", vec![1]).await.unwrap().is_none());
        assert_eq!(registry.put("r", "k", vec![2]).await.unwrap(), Some(vec![1]));
        assert_eq!(registry.get("r", "k").await.unwrap(), Some(vec![2]));
        assert_eq!(registry.list("r").await.unwrap(), vec![vec![2]]);
        assert!(registry.list("other").await.unwrap().is_empty());

        assert_eq!(registry.remove("r", "k").await.unwrap(), Some(vec![2]));
        assert!(registry.is_empty("r"));
    }

    #[tokio::test]
    async fn test_offline_registry_fails() {
        let registry = MemoryRegistry::new();
        registry.set_available(false);

        let err = registry.put("r", "k", vec![1]).await.unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable { .. }));
        assert!(registry.list("r").await.is_err());

        registry.set_available(true);
        assert!(registry.put("r", "k", vec![1]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_without_refresh() {
        let registry = MemoryRegistry::with_entry_ttl(Duration::from_secs(10));
        registry.put("r", "kept", vec![1]).await.unwrap();
        registry.put("r", "dropped", vec![2]).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        registry.put("r", "kept", vec![3]).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(registry.get("r", "kept").await.unwrap(), Some(vec![3]));
        assert!(registry.get("r", "dropped").await.unwrap().is_none());
        assert_eq!(registry.len("r"), 1);
    }
}

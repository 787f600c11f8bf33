use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::traits::{CacheError, CacheNode};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process cache node with per-entry expiry.
///
/// Expired entries are dropped lazily on access and by [`purge_expired`](Self::purge_expired).
pub struct InMemoryNode {
    address: String,
    data: DashMap<String, Entry>,
    offline: AtomicBool,
}

impl InMemoryNode {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            data: DashMap::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Count of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| e.value().is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, entry| entry.is_live(now));
        before - self.data.len()
    }

    /// Simulate the node going away (every call fails until brought back).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CacheError::unavailable(&self.address, "node offline"))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryNode {
    fn default() -> Self {
        Self::new(crate::config::MEMORY_NODE)
    }
}

#[async_trait]
impl CacheNode for InMemoryNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check_online()?;
        let now = Instant::now();
        let value = match self.data.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };
        // Expired: drop it so len() stays honest.
        self.data.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.check_online()?;
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.data.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check_online()?;
        let now = Instant::now();
        Ok(self
            .data
            .remove(key)
            .map_or(false, |(_, entry)| entry.is_live(now)))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        self.check_online()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().is_live(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

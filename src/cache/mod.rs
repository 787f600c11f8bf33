// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache tier: blob payloads keyed by [`BlobKey`], sharded across nodes.
//!
//! Keys are laid out as `{prefix}:{tag}:{name}` with `%` and `:` in the tag
//! percent-encoded, so the first `:` after the prefix always ends the tag.
//! Keys longer than 250 bytes are replaced by `{prefix}:%h:{sha256-hex}`.
//! Hashed keys do not carry their tag; a prefix scan cannot find them, so
//! tag invalidation must also be given the tag's names.
//!
//! With more than one node, keys are placed with a consistent-hash
//! [`HashRing`] so adding a node only remaps the keys that land on it.
//!
//! Every [`get`](CacheTier::get) bumps exactly one of the hit/miss counters.
//! Nothing else touches them, and only [`reset_stats`](CacheTier::reset_stats)
//! clears them.

pub mod ring;

pub use ring::HashRing;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::blob::BlobKey;
use crate::config::{TierEngineConfig, MEMORY_NODE};
use crate::pattern::GlobPattern;
use crate::storage::memory::InMemoryNode;
use crate::storage::redis::RedisNode;
use crate::storage::traits::{CacheError, CacheNode};

/// Longest key stored verbatim.
pub const MAX_KEY_LEN: usize = 250;

/// Marker in the tag position of hashed long keys. Never produced by
/// [`escape_tag`], which always encodes a bare `%`.
const HASHED_TAG: &str = "%h";

/// Point-in-time counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub struct CacheTier {
    nodes: Vec<Arc<dyn CacheNode>>,
    ring: HashRing,
    prefix: String,
    default_ttl: Duration,
    timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheTier {
    pub fn new(
        nodes: Vec<Arc<dyn CacheNode>>,
        prefix: impl Into<String>,
        default_ttl: Duration,
        timeout: Duration,
    ) -> Self {
        let addresses: Vec<&str> = nodes.iter().map(|n| n.address()).collect();
        let ring = HashRing::new(&addresses);
        Self {
            nodes,
            ring,
            prefix: prefix.into(),
            default_ttl,
            timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build and connect the nodes listed in `config.cache_nodes`.
    ///
    /// `memory` (or `memory:<name>`) gives an in-process node; anything else
    /// is treated as a Redis URL.
    pub async fn from_config(config: &TierEngineConfig) -> Result<Self, CacheError> {
        let mut nodes: Vec<Arc<dyn CacheNode>> = Vec::with_capacity(config.cache_nodes.len());
        for address in &config.cache_nodes {
            let node: Arc<dyn CacheNode> = if address == MEMORY_NODE || address.starts_with("memory:") {
                Arc::new(InMemoryNode::new(address.clone()))
            } else {
                Arc::new(RedisNode::connect(address).await?)
            };
            nodes.push(node);
        }
        info!(
            nodes = nodes.len(),
            addresses = %config.cache_nodes.join(", "),
            "Cache tier ready"
        );
        Ok(Self::new(
            nodes,
            config.key_prefix.clone(),
            config.default_ttl(),
            config.cache_timeout(),
        ))
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Storage key for a blob, hashed when it would exceed [`MAX_KEY_LEN`].
    #[must_use]
    pub fn cache_key(&self, key: &BlobKey) -> String {
        let raw = format!("{}:{}:{}", self.prefix, escape_tag(key.tag()), key.name());
        if raw.len() <= MAX_KEY_LEN {
            return raw;
        }
        let digest = Sha256::digest(raw.as_bytes());
        format!("{}:{}:{}", self.prefix, HASHED_TAG, hex::encode(digest))
    }

    fn tag_prefix(&self, tag: &str) -> String {
        format!("{}:{}:", self.prefix, escape_tag(tag))
    }

    fn node_for(&self, cache_key: &str) -> Result<&Arc<dyn CacheNode>, CacheError> {
        self.ring
            .node_for(cache_key)
            .and_then(|idx| self.nodes.get(idx))
            .ok_or_else(|| CacheError::unavailable("<none>", "no cache nodes configured"))
    }

    /// Run one node call under the per-call timeout.
    async fn bounded<T, F>(&self, node: &dyn CacheNode, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::unavailable(
                node.address(),
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Look up a payload. `Ok(None)` is a miss.
    ///
    /// An unavailable node counts as a miss and returns the error.
    pub async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, CacheError> {
        let cache_key = self.cache_key(key);
        let result = match self.node_for(&cache_key) {
            Ok(node) => self.bounded(node.as_ref(), node.get(&cache_key)).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(Some(_)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup("hit");
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup("miss");
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup("miss");
                warn!(key = %key, error = %e, "Cache get failed, counted as miss");
            }
        }
        result
    }

    /// Store a payload; `ttl = None` uses the tier default.
    pub async fn put(&self, key: &BlobKey, data: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let cache_key = self.cache_key(key);
        let node = self.node_for(&cache_key)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.bounded(node.as_ref(), node.set(&cache_key, data, ttl)).await?;
        debug!(key = %key, bytes = data.len(), ttl_secs = ttl.as_secs(), "Cached blob");
        Ok(())
    }

    /// Remove one entry. Returns whether it was present.
    pub async fn delete_one(&self, key: &BlobKey) -> Result<bool, CacheError> {
        let cache_key = self.cache_key(key);
        let node = self.node_for(&cache_key)?;
        self.bounded(node.as_ref(), node.delete(&cache_key)).await
    }

    /// Invalidate entries for `tag`.
    ///
    /// With `names`, only those blobs are removed. Without, every node is
    /// scanned for the tag's keys. All deletions are attempted even if some
    /// fail; the first failure is returned in that case.
    pub async fn delete_by_tag(&self, tag: &str, names: Option<&[String]>) -> Result<usize, CacheError> {
        let mut removed = 0;
        let mut first_error = None;

        match names {
            Some(names) => {
                for name in names {
                    let key = match BlobKey::new(tag, name.clone()) {
                        Ok(key) => key,
                        Err(_) => continue,
                    };
                    match self.delete_one(&key).await {
                        Ok(true) => removed += 1,
                        Ok(false) => {}
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
            None => {
                let prefix = self.tag_prefix(tag);
                for node in &self.nodes {
                    let keys = match self.bounded(node.as_ref(), node.scan_prefix(&prefix)).await {
                        Ok(keys) => keys,
                        Err(e) => {
                            first_error.get_or_insert(e);
                            continue;
                        }
                    };
                    for cache_key in keys {
                        match self.bounded(node.as_ref(), node.delete(&cache_key)).await {
                            Ok(true) => removed += 1,
                            Ok(false) => {}
                            Err(e) => {
                                first_error.get_or_insert(e);
                            }
                        }
                    }
                }
            }
        }

        match first_error {
            Some(e) => {
                warn!(tag = %tag, removed, error = %e, "Tag invalidation incomplete");
                Err(e)
            }
            None => {
                debug!(tag = %tag, removed, "Tag invalidated");
                Ok(removed)
            }
        }
    }

    /// Enumerate cached keys whose tag and name match the patterns.
    ///
    /// Hashed long keys cannot be mapped back to a key and are skipped.
    /// Results are sorted.
    pub async fn query_keys(
        &self,
        tag_pattern: &GlobPattern,
        name_pattern: &GlobPattern,
    ) -> Result<Vec<BlobKey>, CacheError> {
        let prefix = format!("{}:", self.prefix);
        let mut matches = Vec::new();
        for node in &self.nodes {
            let keys = self.bounded(node.as_ref(), node.scan_prefix(&prefix)).await?;
            for cache_key in keys {
                let Some((escaped, name)) = cache_key[prefix.len()..].split_once(':') else {
                    continue;
                };
                if escaped == HASHED_TAG {
                    continue;
                }
                let Some(tag) = unescape_tag(escaped) else {
                    debug!(key = %cache_key, "Skipping foreign cache key");
                    continue;
                };
                if tag_pattern.matches(&tag) && name_pattern.matches(name) {
                    if let Ok(key) = BlobKey::new(tag, name) {
                        matches.push(key);
                    }
                }
            }
        }
        matches.sort();
        matches.dedup();
        Ok(matches)
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hits / (hits + misses), 0.0 before any lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.hit_rate(),
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

fn escape_tag(tag: &str) -> String {
    let mut escaped = String::with_capacity(tag.len());
    for ch in tag.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Inverse of [`escape_tag`]; `None` for anything it could not have produced.
fn unescape_tag(escaped: &str) -> Option<String> {
    let mut tag = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        tag.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code {
            "25" => tag.push('%'),
            "3A" => tag.push(':'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    tag.push_str(rest);
    Some(tag)
}

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Node unreachable, timed out, or answered garbage.
    #[error("cache node '{node}' unavailable: {reason}")]
    Unavailable { node: String, reason: String },
}

impl CacheError {
    pub fn unavailable(node: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            node: node.into(),
            reason: reason.to_string(),
        }
    }
}

/// One cache node. Keys arrive fully formed (prefix, tag and name already
/// joined); nodes only store bytes with a TTL.
#[async_trait]
pub trait CacheNode: Send + Sync {
    /// Address used for ring placement and logging.
    fn address(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value`; a zero `ttl` means no expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// All live keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

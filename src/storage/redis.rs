//! Redis cache node.
//!
//! Payloads are stored as plain Redis strings with `SET ... EX`:
//!
//! ```text
//! SET iowarp:docs:readme.md <bytes> EX 3600
//! ```
//!
//! Tag-wide invalidation uses `SCAN MATCH iowarp:docs:*`, so the node never
//! blocks the server with `KEYS`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::traits::{CacheError, CacheNode};
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisNode {
    address: String,
    connection: ConnectionManager,
}

impl RedisNode {
    /// Connect to a Redis node, retrying with the startup policy.
    pub async fn connect(connection_string: &str) -> Result<Self, CacheError> {
        let client = Client::open(connection_string)
            .map_err(|e| CacheError::unavailable(connection_string, e))?;

        // Fast-fail after a handful of attempts; a bad address is a config error.
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| CacheError::unavailable(connection_string, e))?;

        Ok(Self {
            address: connection_string.to_string(),
            connection,
        })
    }

    fn unavailable(&self, err: redis::RedisError) -> CacheError {
        crate::metrics::record_connection_error("redis");
        CacheError::unavailable(&self.address, err)
    }
}

/// Escape glob metacharacters so a literal prefix can be used with `SCAN MATCH`.
fn escape_match_pattern(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 2);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl CacheNode for RedisNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(|e| self.unavailable(e))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let secs = ttl.as_secs();
        let result: redis::RedisResult<()> = if secs == 0 {
            conn.set(key, value).await
        } else {
            conn.set_ex(key, value, secs).await
        };
        result.map_err(|e| self.unavailable(e))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(key).await.map_err(|e| self.unavailable(e))?;
        Ok(removed > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection.clone();
        let pattern = escape_match_pattern(prefix);
        let mut keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<'_, String> = conn
                .scan_match(&pattern)
                .await
                .map_err(|e| self.unavailable(e))?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_match_pattern() {
        assert_eq!(escape_match_pattern("iowarp:docs:"), "iowarp:docs:*");
        assert_eq!(escape_match_pattern("iowarp:a*b?:"), "iowarp:a\\*b\\?:*");
        assert_eq!(escape_match_pattern("p:[x]\\:"), "p:\\[x\\]\\\\:*");
    }
}

//! Configuration for the tier engine.
//!
//! Supplied once at construction; there is no runtime reconfiguration.
//!
//! # Example
//!
//! ```
//! use tier_engine::TierEngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = TierEngineConfig::default();
//! assert_eq!(config.default_ttl_secs, 3600);
//! assert_eq!(config.archive_endpoints, vec!["tcp://127.0.0.1:5560".to_string()]);
//!
//! // Distributed config
//! let config = TierEngineConfig {
//!     archive_endpoints: vec!["tcp://10.0.0.1:5560".into(), "tcp://10.0.0.2:5560".into()],
//!     cache_nodes: vec!["redis://10.0.0.5:6379".into(), "redis://10.0.0.6:6379".into()],
//!     default_ttl_secs: 600,
//!     ..Default::default()
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::rewards::RewardPolicy;

/// Node address that selects the in-process cache backend.
pub const MEMORY_NODE: &str = "memory";

/// Configuration for the tier engine.
///
/// All fields have defaults. For production, configure `archive_endpoints`
/// and `cache_nodes`.
#[derive(Debug, Clone, Deserialize)]
pub struct TierEngineConfig {
    /// Archive endpoints (e.g., "tcp://127.0.0.1:5560"), tried round-robin
    #[serde(default = "default_archive_endpoints")]
    pub archive_endpoints: Vec<String>,

    /// Cache nodes: "redis://host:port" or "memory"
    #[serde(default = "default_cache_nodes")]
    pub cache_nodes: Vec<String>,

    /// Cache key namespace ("{prefix}:{tag}:{name}")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL for cache entries written by ingest and read-repair
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Archive connect + ping timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Archive per-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long a failed endpoint stays DOWN before it is eligible again
    #[serde(default = "default_endpoint_retry_after_ms")]
    pub endpoint_retry_after_ms: u64,

    /// Per-call timeout for cache nodes
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,

    /// Bundle format hint passed to the archive
    #[serde(default = "default_format")]
    pub default_format: String,

    /// Where `mem::` references are spilled before transfer
    #[serde(default = "default_spill_dir")]
    pub spill_dir: PathBuf,

    #[serde(default)]
    pub rewards: RewardPolicy,
}

fn default_archive_endpoints() -> Vec<String> { vec!["tcp://127.0.0.1:5560".to_string()] }
fn default_cache_nodes() -> Vec<String> { vec![MEMORY_NODE.to_string()] }
fn default_key_prefix() -> String { "iowarp".to_string() }
fn default_ttl_secs() -> u64 { 3600 }
fn default_connect_timeout_ms() -> u64 { 5_000 }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_endpoint_retry_after_ms() -> u64 { 5_000 }
fn default_cache_timeout_ms() -> u64 { 5_000 }
fn default_format() -> String { "arrow".to_string() }
fn default_spill_dir() -> PathBuf { std::env::temp_dir().join("tier-engine").join("uri-cache") }

impl Default for TierEngineConfig {
    fn default() -> Self {
        Self {
            archive_endpoints: default_archive_endpoints(),
            cache_nodes: default_cache_nodes(),
            key_prefix: default_key_prefix(),
            default_ttl_secs: default_ttl_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            endpoint_retry_after_ms: default_endpoint_retry_after_ms(),
            cache_timeout_ms: default_cache_timeout_ms(),
            default_format: default_format(),
            spill_dir: default_spill_dir(),
            rewards: RewardPolicy::default(),
        }
    }
}

impl TierEngineConfig {
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn endpoint_retry_after(&self) -> Duration {
        Duration::from_millis(self.endpoint_retry_after_ms)
    }

    #[must_use]
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: TierEngineConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.cache_nodes, vec!["memory".to_string()]);
        assert_eq!(config.key_prefix, "iowarp");
        assert_eq!(config.default_format, "arrow");
        assert_eq!(config.rewards, RewardPolicy::default());
    }

    #[test]
    fn test_durations() {
        let config = TierEngineConfig {
            request_timeout_ms: 250,
            endpoint_retry_after_ms: 1_500,
            ..Default::default()
        };
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.endpoint_retry_after(), Duration::from_millis(1_500));
        assert_eq!(config.default_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_nested_rewards() {
        let config: TierEngineConfig = serde_json::from_value(json!({
            "archive_endpoints": ["tcp://a:1", "tcp://b:2"],
            "rewards": {"cache_hit": 0.9}
        }))
        .unwrap();
        assert_eq!(config.archive_endpoints.len(), 2);
        assert_eq!(config.rewards.cache_hit, 0.9);
        assert_eq!(config.rewards.cache_miss, 0.2);
    }
}

//! Reward policy: outcome category → numeric reward.
//!
//! Rewards are emitted with every [`StepOutcome`](crate::StepOutcome) and
//! never fed back into anything inside this crate.
//!
//! # Example
//!
//! ```
//! use tier_engine::{RewardPolicy, RewardKind};
//!
//! let policy = RewardPolicy::default();
//! assert_eq!(policy.value(RewardKind::CacheHit), 0.3);
//! assert!(policy.value(RewardKind::Error) < 0.0);
//! ```

use serde::{Deserialize, Serialize};

/// Outcome categories that carry a reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    CacheHit,
    CacheMiss,
    IngestSuccess,
    QuerySuccess,
    EvictSuccess,
    DestroySuccess,
    Error,
}

impl std::fmt::Display for RewardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CacheHit => write!(f, "cache_hit"),
            Self::CacheMiss => write!(f, "cache_miss"),
            Self::IngestSuccess => write!(f, "ingest_success"),
            Self::QuerySuccess => write!(f, "query_success"),
            Self::EvictSuccess => write!(f, "evict_success"),
            Self::DestroySuccess => write!(f, "destroy_success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Reward values per outcome. Immutable once the engine is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardPolicy {
    #[serde(default = "default_cache_hit")]
    pub cache_hit: f64,
    #[serde(default = "default_cache_miss")]
    pub cache_miss: f64,
    #[serde(default = "default_ingest_success", alias = "assimilate_success")]
    pub ingest_success: f64,
    #[serde(default = "default_query_success")]
    pub query_success: f64,
    #[serde(default = "default_evict_success", alias = "prune_success")]
    pub evict_success: f64,
    #[serde(default = "default_destroy_success")]
    pub destroy_success: f64,
    #[serde(default = "default_error")]
    pub error: f64,
}

fn default_cache_hit() -> f64 { 0.3 }
fn default_cache_miss() -> f64 { 0.2 }
fn default_ingest_success() -> f64 { 0.1 }
fn default_query_success() -> f64 { 0.1 }
fn default_evict_success() -> f64 { 0.05 }
fn default_destroy_success() -> f64 { 0.05 }
fn default_error() -> f64 { -0.5 }

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            cache_hit: default_cache_hit(),
            cache_miss: default_cache_miss(),
            ingest_success: default_ingest_success(),
            query_success: default_query_success(),
            evict_success: default_evict_success(),
            destroy_success: default_destroy_success(),
            error: default_error(),
        }
    }
}

impl RewardPolicy {
    #[must_use]
    pub fn value(&self, kind: RewardKind) -> f64 {
        match kind {
            RewardKind::CacheHit => self.cache_hit,
            RewardKind::CacheMiss => self.cache_miss,
            RewardKind::IngestSuccess => self.ingest_success,
            RewardKind::QuerySuccess => self.query_success,
            RewardKind::EvictSuccess => self.evict_success,
            RewardKind::DestroySuccess => self.destroy_success,
            RewardKind::Error => self.error,
        }
    }
}

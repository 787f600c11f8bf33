// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-tier coordinator.
//!
//! The [`TierEngine`] runs one [`Action`] end to end against the cache tier
//! and the archive, and reports a [`StepOutcome`] with a reward from the
//! configured [`RewardPolicy`]. It keeps no state between calls beyond the
//! cache hit/miss counters and the archive endpoint table.
//!
//! # Consistency rules
//!
//! ```text
//! ingest   : resolve → archive bundle → cache put (best effort)
//! query    : archive query → (unreachable) cache key listing, degraded
//! retrieve : cache get → (miss) archive read → cache put (best effort)
//! list     : query scoped to one tag
//! evict    : cache delete only; the archive keeps the data
//! destroy  : archive destroy → cache invalidation per tag, always attempted
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tier_engine::{TierEngine, TierEngineConfig};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = TierEngine::from_config(TierEngineConfig::default())
//!     .await
//!     .expect("cache nodes");
//! engine.connect().await.expect("archive");
//!
//! let params = json!({"source": "folder::/data/run-1", "tag": "run-1"});
//! let outcome = engine.execute("ingest", params.as_object().cloned().unwrap_or_default()).await;
//! println!("{} (reward {})", outcome.text, outcome.reward);
//! # }
//! ```

mod action;
mod read_api;
mod types;
mod write_api;

pub use action::Action;
pub use types::{EngineError, ErrorKind, StepOutcome};

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::archive::{ArchiveClient, ArchiveError};
use crate::cache::CacheTier;
use crate::config::TierEngineConfig;
use crate::metrics::{self, LatencyTimer};
use crate::resolver::UriResolver;
use crate::rewards::{RewardKind, RewardPolicy};
use crate::storage::traits::CacheError;

/// What a handler produced.
///
/// `error` is set when the action failed after doing partial work worth
/// reporting (destroy invalidates the cache even when the archive fails).
pub(super) struct Handled {
    pub(super) text: String,
    pub(super) data: Value,
    pub(super) reward: RewardKind,
    pub(super) payload: Option<Vec<u8>>,
    pub(super) error: Option<EngineError>,
}

impl Handled {
    pub(super) fn ok(text: String, data: Value, reward: RewardKind) -> Self {
        Self {
            text,
            data,
            reward,
            payload: None,
            error: None,
        }
    }
}

/// Coordinator over one cache tier and one archive client.
///
/// `Send + Sync`; share it behind an `Arc` and call from any task.
pub struct TierEngine {
    pub(super) cache: Arc<CacheTier>,
    pub(super) archive: Arc<ArchiveClient>,
    pub(super) resolver: UriResolver,
    pub(super) rewards: RewardPolicy,
    pub(super) default_format: String,
}

impl TierEngine {
    /// Assemble an engine from already-built tiers.
    pub fn new(config: &TierEngineConfig, cache: Arc<CacheTier>, archive: Arc<ArchiveClient>) -> Self {
        let resolver = UriResolver::new(Some(Arc::clone(&cache)), config.spill_dir.clone());
        Self {
            cache,
            archive,
            resolver,
            rewards: config.rewards.clone(),
            default_format: config.default_format.clone(),
        }
    }

    /// Build the cache tier (connecting Redis nodes) and a TCP archive client.
    ///
    /// Archive endpoints are not contacted here; see [`connect`](Self::connect).
    pub async fn from_config(config: TierEngineConfig) -> Result<Self, CacheError> {
        let cache = Arc::new(CacheTier::from_config(&config).await?);
        let archive = Arc::new(ArchiveClient::from_config(&config));
        info!(
            cache_nodes = cache.node_count(),
            archive_endpoints = config.archive_endpoints.len(),
            "Tier engine created"
        );
        Ok(Self::new(&config, cache, archive))
    }

    /// Ping every archive endpoint. Returns how many answered.
    pub async fn connect(&self) -> Result<usize, ArchiveError> {
        self.archive.connect().await
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheTier> {
        &self.cache
    }

    #[must_use]
    pub fn archive(&self) -> &Arc<ArchiveClient> {
        &self.archive
    }

    #[must_use]
    pub fn rewards(&self) -> &RewardPolicy {
        &self.rewards
    }

    /// Fraction of cache lookups that hit since the last reset.
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        self.cache.hit_rate()
    }

    pub fn reset_stats(&self) {
        self.cache.reset_stats();
        metrics::set_cache_hit_rate(0.0);
    }

    /// Run a named action with JSON parameters.
    ///
    /// Never fails: bad input comes back as an error outcome.
    pub async fn execute(&self, action: &str, params: Map<String, Value>) -> StepOutcome {
        match Action::parse(action, params) {
            Ok(parsed) => self.step(parsed).await,
            Err(e) => {
                debug!(action, error = %e, "Rejected action");
                metrics::record_action("rejected", "error");
                let reward = self.rewards.value(RewardKind::Error);
                metrics::record_reward("rejected", reward);
                StepOutcome::failure(action, &e, json!({}), reward)
            }
        }
    }

    /// Run a typed action.
    pub async fn step(&self, action: Action) -> StepOutcome {
        let name = action.name();
        let _timer = LatencyTimer::new(name);

        let result = match action {
            Action::Ingest { sources, tag, format } => self.ingest(&sources, &tag, format.as_deref()).await,
            Action::Query {
                tag_pattern,
                name_pattern,
            } => self.query(&tag_pattern, &name_pattern).await,
            Action::Retrieve { key, skip_cache } => self.retrieve(&key, skip_cache).await,
            Action::List { tag } => self.list(&tag).await,
            Action::Evict { tag, names } => self.evict(&tag, &names).await,
            Action::Destroy { tags } => self.destroy(&tags).await,
        };

        let outcome = match result {
            Ok(Handled {
                text,
                data,
                reward,
                payload,
                error: None,
            }) => {
                let reward = self.rewards.value(reward);
                metrics::record_action(name, "success");
                StepOutcome::success(text, data, reward, payload)
            }
            Ok(Handled {
                data, error: Some(e), ..
            }) => self.fail(name, &e, data),
            Err(e) => self.fail(name, &e, json!({})),
        };

        metrics::record_reward(name, outcome.reward);
        metrics::set_cache_hit_rate(self.cache.hit_rate());
        outcome
    }

    fn fail(&self, action: &str, error: &EngineError, data: Value) -> StepOutcome {
        warn!(action, kind = %error.kind(), error = %error, "Action failed");
        metrics::record_action(action, "error");
        StepOutcome::failure(action, error, data, self.rewards.value(RewardKind::Error))
    }
}

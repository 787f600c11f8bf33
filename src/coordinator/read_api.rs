//! Read-side actions: query, list, retrieve.
//!
//! Query and list go to the archive first (it is authoritative for what
//! exists) and fall back to the cache's key listing only when no archive
//! endpoint can be reached. Retrieve goes to the cache first (it is the fast
//! path for payloads) and repairs the cache after an archive read.

use serde_json::json;
use tracing::{debug, instrument, warn};

use super::{EngineError, Handled, TierEngine};
use crate::archive::ArchiveError;
use crate::blob::BlobKey;
use crate::metrics;
use crate::pattern::GlobPattern;
use crate::rewards::RewardKind;

impl TierEngine {
    #[instrument(skip(self))]
    pub(super) async fn query(&self, tag_pattern: &str, name_pattern: &str) -> Result<Handled, EngineError> {
        let (keys, degraded) = self.keys_with_fallback("query", tag_pattern, name_pattern).await?;

        let matches: Vec<_> = keys
            .iter()
            .map(|k| json!({"tag": k.tag(), "blob_name": k.name()}))
            .collect();
        let text = if degraded {
            format!("Query returned {} match(es) from cache (archive unreachable).", matches.len())
        } else {
            format!("Query returned {} match(es).", matches.len())
        };
        Ok(Handled::ok(
            text,
            json!({"count": matches.len(), "matches": matches, "degraded": degraded}),
            RewardKind::QuerySuccess,
        ))
    }

    #[instrument(skip(self))]
    pub(super) async fn list(&self, tag: &str) -> Result<Handled, EngineError> {
        let (keys, degraded) = self.keys_with_fallback("list", tag, "*").await?;

        // The tag goes out as a pattern; keep only exact matches.
        let names: Vec<&str> = keys.iter().filter(|k| k.tag() == tag).map(BlobKey::name).collect();
        Ok(Handled::ok(
            format!("Listed {} blob(s) in '{}'.", names.len(), tag),
            json!({"tag": tag, "count": names.len(), "blob_names": names, "degraded": degraded}),
            RewardKind::QuerySuccess,
        ))
    }

    /// Archive query, or the cache's keys when every endpoint is unreachable.
    async fn keys_with_fallback(
        &self,
        action: &'static str,
        tag_pattern: &str,
        name_pattern: &str,
    ) -> Result<(Vec<BlobKey>, bool), EngineError> {
        let unreachable = match self.archive.query(tag_pattern, name_pattern).await {
            Ok(keys) => return Ok((keys, false)),
            Err(e @ ArchiveError::Unreachable { .. }) => e,
            Err(e) => return Err(e.into()),
        };

        let tag_glob = GlobPattern::new(tag_pattern).map_err(|e| EngineError::invalid_params(action, e))?;
        let name_glob = GlobPattern::new(name_pattern).map_err(|e| EngineError::invalid_params(action, e))?;
        match self.cache.query_keys(&tag_glob, &name_glob).await {
            Ok(keys) => {
                metrics::record_query_fallback(action);
                warn!(action, keys = keys.len(), error = %unreachable, "Archive unreachable, answering from cache keys");
                Ok((keys, true))
            }
            Err(cache_error) => {
                debug!(action, error = %cache_error, "Cache key listing failed too");
                Err(unreachable.into())
            }
        }
    }

    #[instrument(skip(self, key), fields(key = %key))]
    pub(super) async fn retrieve(&self, key: &BlobKey, skip_cache: bool) -> Result<Handled, EngineError> {
        if !skip_cache {
            match self.cache.get(key).await {
                Ok(Some(data)) => {
                    return Ok(Handled {
                        text: format!("Retrieved '{}' from cache (hit).", key.name()),
                        data: json!({
                            "tag": key.tag(),
                            "blob_name": key.name(),
                            "cache_hit": true,
                            "size": data.len(),
                        }),
                        reward: RewardKind::CacheHit,
                        payload: Some(data),
                        error: None,
                    });
                }
                Ok(None) => debug!(key = %key, "Cache miss"),
                Err(e) => warn!(key = %key, error = %e, "Cache unavailable, reading from archive"),
            }
        }

        let data = self.archive.read(key).await?;

        let mut cache_failures = 0usize;
        if let Err(e) = self.cache.put(key, &data, None).await {
            cache_failures += 1;
            metrics::record_cache_failure("put");
            warn!(key = %key, error = %e, "Read-repair cache put failed");
        }

        Ok(Handled {
            text: format!("Retrieved '{}' from archive (cache miss).", key.name()),
            data: json!({
                "tag": key.tag(),
                "blob_name": key.name(),
                "cache_hit": false,
                "size": data.len(),
                "cache_failures": cache_failures,
            }),
            reward: RewardKind::CacheMiss,
            payload: Some(data),
            error: None,
        })
    }
}

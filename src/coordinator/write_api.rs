//! Write-side actions: ingest, evict, destroy.
//!
//! The archive is written first and is the source of truth. Cache side
//! effects are best effort: a failed put or delete is counted in the
//! outcome's `cache_failures` and never turns a successful action into an
//! error.

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{EngineError, Handled, TierEngine};
use crate::blob::BlobKey;
use crate::metrics;
use crate::pattern::GlobPattern;
use crate::rewards::RewardKind;

impl TierEngine {
    #[instrument(skip(self), fields(items))]
    pub(super) async fn ingest(
        &self,
        sources: &[String],
        tag: &str,
        format: Option<&str>,
    ) -> Result<Handled, EngineError> {
        let items = self.resolver.resolve_all(sources).await?;
        tracing::Span::current().record("items", items.len());

        if items.is_empty() {
            info!(tag = %tag, "Nothing to ingest");
            return Ok(Handled::ok(
                format!("Nothing to ingest into '{}': sources resolved to no files.", tag),
                json!({"tag": tag, "files": 0, "written": 0, "cached": 0, "cache_failures": 0}),
                RewardKind::IngestSuccess,
            ));
        }

        let format = format.unwrap_or(&self.default_format);
        let receipt = match self.archive.bundle(&items, tag, format).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.resolver.release_spills(&items).await;
                return Err(e.into());
            }
        };

        let mut cached = 0usize;
        let mut cache_failures = 0usize;
        for item in &items {
            let key = item.key_in(tag)?;
            let data = match tokio::fs::read(&item.path).await {
                Ok(data) => data,
                Err(e) => {
                    cache_failures += 1;
                    metrics::record_cache_failure("put");
                    warn!(path = %item.path.display(), error = %e, "Cannot read item for write-through");
                    continue;
                }
            };
            match self.cache.put(&key, &data, None).await {
                Ok(()) => cached += 1,
                Err(e) => {
                    cache_failures += 1;
                    metrics::record_cache_failure("put");
                    warn!(key = %key, error = %e, "Write-through cache put failed");
                }
            }
        }

        // Spilled mem:: blobs were only needed for the transfer and write-through.
        self.resolver.release_spills(&items).await;

        info!(tag = %tag, files = items.len(), cached, cache_failures, "Ingest complete");
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        Ok(Handled::ok(
            format!(
                "Ingested {} file(s) into '{}'. Cached {} blob(s).",
                items.len(),
                receipt.tag,
                cached
            ),
            json!({
                "tag": receipt.tag,
                "files": items.len(),
                "written": receipt.written,
                "blob_names": names,
                "cached": cached,
                "cache_failures": cache_failures,
            }),
            RewardKind::IngestSuccess,
        ))
    }

    #[instrument(skip(self))]
    pub(super) async fn evict(&self, tag: &str, names: &[String]) -> Result<Handled, EngineError> {
        if names.is_empty() {
            return Err(EngineError::MissingBlobNames);
        }
        let keys = names
            .iter()
            .map(|name| BlobKey::new(tag, name.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut evicted = 0usize;
        let mut cache_failures = 0usize;
        for key in &keys {
            match self.cache.delete_one(key).await {
                Ok(true) => evicted += 1,
                Ok(false) => debug!(key = %key, "Nothing cached to evict"),
                Err(e) => {
                    cache_failures += 1;
                    metrics::record_cache_failure("delete");
                    warn!(key = %key, error = %e, "Cache eviction failed");
                }
            }
        }

        Ok(Handled::ok(
            format!("Evicted {} blob(s) from cache. Data remains in the archive.", evicted),
            json!({
                "tag": tag,
                "requested": names,
                "evicted": evicted,
                "cache_failures": cache_failures,
            }),
            RewardKind::EvictSuccess,
        ))
    }

    #[instrument(skip(self))]
    pub(super) async fn destroy(&self, tags: &[String]) -> Result<Handled, EngineError> {
        // Names first: hashed long keys are only reachable by name, and the
        // archive forgets them once the destroy lands.
        let mut names_by_tag = Vec::with_capacity(tags.len());
        for tag in tags {
            names_by_tag.push(self.names_in_tag(tag).await);
        }

        let archived = self.archive.destroy(tags).await;

        // Invalidate regardless of the archive outcome.
        let mut invalidated = 0usize;
        let mut cache_failures = 0usize;
        for (tag, names) in tags.iter().zip(&names_by_tag) {
            let by_name = self.cache.delete_by_tag(tag, Some(names)).await;
            let by_scan = self.cache.delete_by_tag(tag, None).await;
            for result in [by_name, by_scan] {
                match result {
                    Ok(n) => invalidated += n,
                    Err(e) => {
                        cache_failures += 1;
                        metrics::record_cache_failure("invalidate");
                        warn!(tag = %tag, error = %e, "Cache invalidation failed");
                    }
                }
            }
        }

        match archived {
            Ok(receipt) => {
                info!(
                    destroyed = receipt.destroyed.len(),
                    invalidated, cache_failures, "Destroy complete"
                );
                Ok(Handled::ok(
                    format!(
                        "Destroyed {} tag(s) from the archive. Invalidated {} cache entries.",
                        receipt.destroyed.len(),
                        invalidated
                    ),
                    json!({
                        "destroyed": receipt.destroyed,
                        "cache_invalidated": invalidated,
                        "cache_failures": cache_failures,
                    }),
                    RewardKind::DestroySuccess,
                ))
            }
            Err(e) => Ok(Handled {
                text: String::new(),
                data: json!({
                    "destroyed": [],
                    "cache_invalidated": invalidated,
                    "cache_failures": cache_failures,
                }),
                reward: RewardKind::Error,
                payload: None,
                error: Some(e.into()),
            }),
        }
    }

    /// Every name stored under `tag`, from the archive or else the cache.
    /// Best effort: an empty list only means the prefix scan has to do.
    async fn names_in_tag(&self, tag: &str) -> Vec<String> {
        let keys = match self.archive.query(tag, "*").await {
            Ok(keys) => keys,
            Err(e) => {
                debug!(tag = %tag, error = %e, "Archive listing failed before destroy, using cached keys");
                let cached = match GlobPattern::new(tag) {
                    Ok(tag_glob) => self.cache.query_keys(&tag_glob, &GlobPattern::any()).await,
                    Err(_) => Ok(Vec::new()),
                };
                cached.unwrap_or_default()
            }
        };
        keys.into_iter()
            .filter(|k| k.tag() == tag)
            .map(|k| k.name().to_string())
            .collect()
    }
}

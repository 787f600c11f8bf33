// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for tier-engine.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The embedding
//! process picks the exporter (Prometheus, OTEL, a debugging recorder, ...).
//!
//! # Metric Naming Convention
//! - `tier_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `action`: ingest, query, retrieve, list, evict, destroy
//! - `status`: success, error
//! - `endpoint`: archive endpoint address

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a finished coordinator action
pub fn record_action(action: &str, status: &str) {
    counter!(
        "tier_engine_actions_total",
        "action" => action.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record action latency
pub fn record_action_latency(action: &str, duration: Duration) {
    histogram!(
        "tier_engine_action_seconds",
        "action" => action.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record reward handed back to the caller
pub fn record_reward(action: &str, reward: f64) {
    histogram!(
        "tier_engine_reward",
        "action" => action.to_string()
    )
    .record(reward);
}

/// Record a cache lookup (`hit` or `miss`)
pub fn record_cache_lookup(result: &str) {
    counter!(
        "tier_engine_cache_lookups_total",
        "result" => result.to_string()
    )
    .increment(1);
}

/// Record a best-effort cache side effect that failed
pub fn record_cache_failure(operation: &str) {
    counter!(
        "tier_engine_cache_failures_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a degraded query served from cache keys
pub fn record_query_fallback(action: &str) {
    counter!(
        "tier_engine_query_fallbacks_total",
        "action" => action.to_string()
    )
    .increment(1);
}

/// Record an archive request attempt on one endpoint
pub fn record_archive_attempt(endpoint: &str, method: &str, status: &str) {
    counter!(
        "tier_engine_archive_attempts_total",
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a failover to the next endpoint
pub fn record_failover(from_endpoint: &str) {
    counter!(
        "tier_engine_failovers_total",
        "endpoint" => from_endpoint.to_string()
    )
    .increment(1);
}

/// Record the archive rejecting a request
pub fn record_remote_error(method: &str) {
    counter!(
        "tier_engine_remote_errors_total",
        "method" => method.to_string()
    )
    .increment(1);
}

/// Set endpoint liveness (1 = up, 0 = down)
pub fn set_endpoint_up(endpoint: &str, up: bool) {
    gauge!(
        "tier_engine_endpoint_up",
        "endpoint" => endpoint.to_string()
    )
    .set(if up { 1.0 } else { 0.0 });
}

/// Record a discarded and recreated archive connection
pub fn record_reconnect(endpoint: &str) {
    counter!(
        "tier_engine_reconnects_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// Record a connection error to a cache backend
pub fn record_connection_error(backend: &str) {
    counter!(
        "tier_engine_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Set current cache hit rate (0.0 - 1.0)
pub fn set_cache_hit_rate(rate: f64) {
    gauge!("tier_engine_cache_hit_rate").set(rate);
}

/// Timer guard that records action latency on drop
pub struct LatencyTimer {
    action: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(action: &'static str) -> Self {
        Self {
            action,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_action_latency(self.action, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without a recorder installed these are no-ops; they must not panic.
    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_action("ingest", "success");
        record_cache_lookup("hit");
        record_cache_failure("put");
        record_failover("tcp://a:1");
        set_endpoint_up("tcp://a:1", false);
        set_cache_hit_rate(0.5);
        let _timer = LatencyTimer::new("retrieve");
    }
}

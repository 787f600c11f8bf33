//! Chaos Testing for Tier Engine
//!
//! This module tests failure scenarios using:
//! 1. **FailingNode wrapper** - per-operation error injection on a cache node
//! 2. **FlakyConnector wrapper** - archive endpoints that refuse connections
//! 3. **Endpoint failure injection** - down and hanging archive endpoints
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use tier_engine::archive::{ArchiveConnector, ArchiveTransport, TransportError};
use tier_engine::storage::memory::InMemoryNode;
use tier_engine::{
    ArchiveClient, ArchiveError, ArchiveTimeouts, BlobKey, CacheError, CacheNode, CacheTier, ErrorKind,
    InMemoryArchive, TierEngine, TierEngineConfig,
};

const A: &str = "tcp://archive-a:5560";
const B: &str = "tcp://archive-b:5560";

// =============================================================================
// Failing Node Wrapper - Precise Error Injection
// =============================================================================

/// Cache node whose operations can be switched to fail independently.
pub struct FailingNode {
    inner: InMemoryNode,
    fail_get: AtomicBool,
    fail_set: AtomicBool,
    fail_delete: AtomicBool,
    fail_scan: AtomicBool,
    /// Calls that were failed on purpose
    injected: AtomicU64,
}

impl FailingNode {
    pub fn new(address: &str) -> Self {
        Self {
            inner: InMemoryNode::new(address),
            fail_get: AtomicBool::new(false),
            fail_set: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_scan: AtomicBool::new(false),
            injected: AtomicU64::new(0),
        }
    }

    pub fn fail_all(&self, fail: bool) {
        for flag in [&self.fail_get, &self.fail_set, &self.fail_delete, &self.fail_scan] {
            flag.store(fail, Ordering::SeqCst);
        }
    }

    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> Result<(), CacheError> {
        if flag.load(Ordering::SeqCst) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(CacheError::unavailable(self.inner.address(), format!("injected {} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheNode for FailingNode {
    fn address(&self) -> &str {
        self.inner.address()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check(&self.fail_get, "get")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.check(&self.fail_set, "set")?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check(&self.fail_delete, "delete")?;
        self.inner.delete(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        self.check(&self.fail_scan, "scan")?;
        self.inner.scan_prefix(prefix).await
    }
}

/// Cache node that never answers.
struct HangingNode;

#[async_trait]
impl CacheNode for HangingNode {
    fn address(&self) -> &str {
        "memory:hanging"
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        std::future::pending().await
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        std::future::pending().await
    }

    async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<String>, CacheError> {
        std::future::pending().await
    }
}

// =============================================================================
// Flaky Connector Wrapper
// =============================================================================

/// Refuses connections to the listed addresses; counts every dial.
struct FlakyConnector {
    inner: Arc<dyn ArchiveConnector>,
    refuse: Mutex<HashSet<String>>,
    dials: Mutex<Vec<String>>,
}

impl FlakyConnector {
    fn new(inner: Arc<dyn ArchiveConnector>, refuse: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner,
            refuse: Mutex::new(refuse.iter().map(|s| s.to_string()).collect()),
            dials: Mutex::new(Vec::new()),
        })
    }

    fn dials_to(&self, address: &str) -> usize {
        self.dials.lock().iter().filter(|a| a.as_str() == address).count()
    }
}

#[async_trait]
impl ArchiveConnector for FlakyConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn ArchiveTransport>, TransportError> {
        self.dials.lock().push(address.to_string());
        if self.refuse.lock().contains(address) {
            return Err(TransportError::Connect {
                address: address.to_string(),
                reason: "injected refusal".to_string(),
            });
        }
        self.inner.connect(address).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn timeouts() -> ArchiveTimeouts {
    ArchiveTimeouts {
        connect: Duration::from_millis(200),
        request: Duration::from_millis(300),
        retry_after: Duration::from_secs(5),
    }
}

fn to_map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn engine_with_node(node: Arc<dyn CacheNode>, archive: &InMemoryArchive) -> (TierEngine, TempDir) {
    let spill = tempfile::tempdir().unwrap();
    let config = TierEngineConfig {
        spill_dir: spill.path().to_path_buf(),
        ..Default::default()
    };
    let cache = Arc::new(CacheTier::new(
        vec![node],
        "chaos",
        Duration::from_secs(60),
        Duration::from_millis(200),
    ));
    let client = Arc::new(ArchiveClient::new([A, B], archive.connector(), timeouts()));
    (TierEngine::new(&config, cache, client), spill)
}

fn two_files() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x.bin"), b"xx").unwrap();
    std::fs::write(dir.path().join("y.bin"), b"yy").unwrap();
    dir
}

// =============================================================================
// Archive Endpoint Failover
// =============================================================================

#[tokio::test]
async fn chaos_failed_endpoint_is_skipped_on_next_call() {
    let archive = InMemoryArchive::new();
    archive.insert("docs", "a.csv", b"payload".to_vec());
    let connector = FlakyConnector::new(archive.connector(), &[A]);
    let client = ArchiveClient::new([A, B], connector.clone(), timeouts());
    let key = BlobKey::new("docs", "a.csv").unwrap();

    // First call tries A, fails over to B
    assert_eq!(client.read(&key).await.unwrap(), b"payload".to_vec());
    assert_eq!(connector.dials_to(A), 1);
    assert!(!client.endpoint_states()[0].up);

    // Following calls go straight to B
    for _ in 0..5 {
        assert_eq!(client.read(&key).await.unwrap(), b"payload".to_vec());
    }
    assert_eq!(connector.dials_to(A), 1);
    assert_eq!(archive.calls_to(B), 6);
}

#[tokio::test(start_paused = true)]
async fn chaos_down_endpoint_rejoins_after_retry_window() {
    let archive = InMemoryArchive::new();
    let connector = FlakyConnector::new(archive.connector(), &[A]);
    let client = ArchiveClient::new([A, B], connector.clone(), timeouts());

    client.query("*", "*").await.unwrap();
    assert_eq!(connector.dials_to(A), 1);

    connector.refuse.lock().clear();
    tokio::time::advance(timeouts().retry_after).await;

    for _ in 0..2 {
        client.query("*", "*").await.unwrap();
    }
    assert_eq!(connector.dials_to(A), 2);
    assert!(client.endpoint_states().iter().all(|s| s.up));
}

#[tokio::test(start_paused = true)]
async fn chaos_hanging_endpoint_times_out() {
    let archive = InMemoryArchive::new();
    archive.set_endpoint_hanging(A, true);
    let client = ArchiveClient::new([A, B], archive.connector(), timeouts());

    let start = tokio::time::Instant::now();
    client.query("*", "*").await.unwrap();
    assert!(start.elapsed() >= timeouts().request);

    let states = client.endpoint_states();
    assert!(!states[0].up);
    assert_eq!(states[0].consecutive_failures, 1);
    assert!(states[1].up);
}

#[tokio::test(start_paused = true)]
async fn chaos_repeated_failures_force_reconnect() {
    let archive = InMemoryArchive::new();
    let client = ArchiveClient::new([A], archive.connector(), timeouts());
    client.connect().await.unwrap();
    assert_eq!(archive.connects_to(A), 1);

    // Established connection starts failing: two consecutive failures
    archive.set_endpoint_down(A, true);
    let err = client.query("*", "*").await.unwrap_err();
    assert!(matches!(err, ArchiveError::Unreachable { attempts: 2, .. }));
    assert!(!client.endpoint_states()[0].connected);

    archive.set_endpoint_down(A, false);
    client.query("*", "*").await.unwrap();
    assert_eq!(archive.connects_to(A), 2);
    assert_eq!(client.endpoint_states()[0].consecutive_failures, 0);
}

#[tokio::test]
async fn chaos_remote_error_surfaces_without_failover() {
    let archive = InMemoryArchive::new();
    let (engine, _spill) = engine_with_node(Arc::new(InMemoryNode::default()), &archive);

    // File vanishes between resolve and bundle: the archive refuses the bundle
    let outcome = engine
        .execute("ingest", to_map(json!({"source": "file::/no/such/file.bin", "tag": "t"})))
        .await;
    assert_eq!(outcome.error_kind, Some(ErrorKind::RemoteError));
    assert_eq!(archive.calls_to(A) + archive.calls_to(B), 1);
}

// =============================================================================
// Best-Effort Cache Side Effects
// =============================================================================

#[tokio::test]
async fn chaos_ingest_succeeds_when_cache_writes_fail() {
    let archive = InMemoryArchive::new();
    let node = Arc::new(FailingNode::new("memory:flaky"));
    node.fail_set.store(true, Ordering::SeqCst);
    let (engine, _spill) = engine_with_node(node.clone(), &archive);

    let dir = two_files();
    let outcome = engine
        .execute("ingest", to_map(json!({"source": format!("folder::{}", dir.path().display()), "tag": "t"})))
        .await;

    assert!(outcome.is_success(), "{}", outcome.text);
    assert_eq!(outcome.data["cached"], json!(0));
    assert_eq!(outcome.data["cache_failures"], json!(2));
    assert_eq!(archive.len(), 2);
    assert_eq!(node.injected(), 2);
}

#[tokio::test]
async fn chaos_retrieve_falls_through_unavailable_cache() {
    let archive = InMemoryArchive::new();
    archive.insert("t", "x.bin", b"from archive".to_vec());
    let node = Arc::new(FailingNode::new("memory:flaky"));
    node.fail_all(true);
    let (engine, _spill) = engine_with_node(node.clone(), &archive);

    let outcome = engine.execute("retrieve", to_map(json!({"tag": "t", "name": "x.bin"}))).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.payload, Some(b"from archive".to_vec()));
    assert_eq!(outcome.reward, 0.2);
    assert_eq!(outcome.data["cache_failures"], json!(1));

    // Unavailable lookups count as misses
    assert_eq!(engine.cache().stats().misses, 1);
    assert_eq!(engine.cache_hit_rate(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn chaos_hanging_cache_is_bounded() {
    let archive = InMemoryArchive::new();
    archive.insert("t", "x.bin", b"slow cache".to_vec());
    let (engine, _spill) = engine_with_node(Arc::new(HangingNode), &archive);

    let outcome = engine.execute("retrieve", to_map(json!({"tag": "t", "name": "x.bin"}))).await;
    assert_eq!(outcome.payload, Some(b"slow cache".to_vec()));
    assert_eq!(outcome.data["cache_failures"], json!(1));
}

#[tokio::test]
async fn chaos_evict_reports_cache_failures() {
    let archive = InMemoryArchive::new();
    let node = Arc::new(FailingNode::new("memory:flaky"));
    node.fail_delete.store(true, Ordering::SeqCst);
    let (engine, _spill) = engine_with_node(node, &archive);

    let outcome = engine
        .execute("evict", to_map(json!({"tag": "t", "names": ["x.bin", "y.bin"]})))
        .await;
    assert!(outcome.is_success());
    assert_eq!(outcome.data["evicted"], json!(0));
    assert_eq!(outcome.data["cache_failures"], json!(2));
}

#[tokio::test]
async fn chaos_destroy_survives_failed_invalidation() {
    let archive = InMemoryArchive::new();
    let node = Arc::new(FailingNode::new("memory:flaky"));
    let (engine, _spill) = engine_with_node(node.clone(), &archive);

    let dir = two_files();
    engine
        .execute("ingest", to_map(json!({"source": format!("folder::{}", dir.path().display()), "tag": "t"})))
        .await;

    node.fail_scan.store(true, Ordering::SeqCst);
    let outcome = engine.execute("destroy", to_map(json!({"tags": ["t"]}))).await;

    // Archive destroy is not rolled back
    assert!(outcome.is_success());
    assert_eq!(outcome.data["destroyed"], json!(["t"]));
    assert_eq!(outcome.data["cache_failures"], json!(1));
    assert!(archive.is_empty());
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic tier-engine usage example.
//!
//! Demonstrates:
//! 1. Serving an in-process archive on two TCP endpoints
//! 2. Ingesting a folder of files (archive write + cache write-through)
//! 3. Querying, listing and retrieving (cache hit vs. miss rewards)
//! 4. Evicting from cache, then read-repair on the next retrieve
//! 5. Endpoint failover when one archive endpoint goes down
//! 6. Destroying a tag and displaying metrics
//!
//! No external services are needed. Point `cache_nodes` at
//! `redis://localhost:6379` to use a real Redis cache node instead.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{json, Map, Value};
use tier_engine::{InMemoryArchive, StepOutcome, TierEngine, TierEngineConfig};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the engine emits)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    // Simple logging (no filter for simplicity)
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           tier-engine: Basic Usage Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Start two archive endpoints backed by one store
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Starting archive endpoints...");
    let archive = InMemoryArchive::new();
    let mut endpoints = Vec::new();
    let mut servers = Vec::new();
    for _ in 0..2 {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        endpoints.push(format!("tcp://{}", listener.local_addr()?));
        servers.push(archive.serve_tcp(listener));
    }
    for endpoint in &endpoints {
        println!("   └─ {}", endpoint);
    }

    let workdir = tempfile::tempdir()?;
    let config = TierEngineConfig {
        archive_endpoints: endpoints.clone(),
        cache_nodes: vec!["memory".into()],
        key_prefix: "demo".into(),
        endpoint_retry_after_ms: 500,
        spill_dir: workdir.path().join("spill"),
        ..Default::default()
    };

    let engine = TierEngine::from_config(config).await?;
    let reachable = engine.connect().await?;
    println!("   ✅ Engine connected ({} endpoint(s) reachable)", reachable);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Ingest a folder
    // ─────────────────────────────────────────────────────────────────────────
    let data_dir = workdir.path().join("run-1");
    std::fs::create_dir_all(data_dir.join("logs"))?;
    std::fs::write(data_dir.join("metrics.csv"), "step,loss\n1,0.9\n2,0.4\n")?;
    std::fs::write(data_dir.join("params.json"), r#"{"lr": 0.001}"#)?;
    std::fs::write(data_dir.join("logs").join("train.log"), "epoch 1 done\n")?;

    println!("\n📝 Ingesting {}...", data_dir.display());
    let outcome = run(
        &engine,
        "ingest",
        json!({"source": format!("folder::{}", data_dir.display()), "tag": "run-1"}),
    )
    .await;
    println!("   └─ Blobs: {}", outcome.data["blob_names"]);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Query, list, retrieve
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔍 Query and list...");
    run(&engine, "query", json!({"tag_pattern": "run-*", "name_pattern": "*.csv"})).await;
    run(&engine, "list", json!({"tag": "run-1"})).await;

    println!("\n📖 Retrieving (written through, so this hits)...");
    let outcome = run(&engine, "retrieve", json!({"tag": "run-1", "name": "metrics.csv"})).await;
    if let Some(payload) = &outcome.payload {
        println!("   └─ Payload: {:?}", String::from_utf8_lossy(payload));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Evict, then retrieve again (miss + read-repair)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧹 Evicting from cache...");
    run(&engine, "evict", json!({"tag": "run-1", "names": ["metrics.csv"]})).await;
    run(&engine, "retrieve", json!({"tag": "run-1", "name": "metrics.csv"})).await;
    run(&engine, "retrieve", json!({"tag": "run-1", "name": "metrics.csv"})).await;
    println!("   ⚡ Hit rate: {:.2}", engine.cache_hit_rate());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Failover
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔀 Taking {} down...", endpoints[0]);
    archive.set_endpoint_down(&endpoints[0], true);
    for _ in 0..3 {
        run(&engine, "list", json!({"tag": "run-1"})).await;
    }
    for status in engine.archive().endpoint_states() {
        println!(
            "   └─ {} up={} failures={} connected={}",
            status.address, status.up, status.consecutive_failures, status.connected
        );
    }
    archive.set_endpoint_down(&endpoints[0], false);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Destroy and metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🗑️  Destroying tag...");
    run(&engine, "destroy", json!({"tags": ["run-1"]})).await;
    run(&engine, "retrieve", json!({"tag": "run-1", "name": "metrics.csv"})).await;

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    for server in servers {
        server.abort();
    }

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Execute one action and print its outcome line.
async fn run(engine: &TierEngine, action: &str, params: Value) -> StepOutcome {
    let params: Map<String, Value> = params.as_object().cloned().unwrap_or_default();
    let start = std::time::Instant::now();
    let outcome = engine.execute(action, params).await;
    let marker = if outcome.is_success() { "✅" } else { "❌" };
    println!(
        "   {} {:<8} reward={:+.2} ({:?}) {}",
        marker,
        action,
        outcome.reward,
        start.elapsed(),
        outcome.text
    );
    outcome
}

/// Dump all captured metrics
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                let max = samples.iter().map(|v| v.into_inner()).fold(0.0, f64::max);
                histograms.push((name, label_str, count, sum, max));
            }
        }
    }

    counters.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    gauges.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    histograms.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }

    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }

    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum, max) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("      └─ {}{} count={} avg={:.4} max={:.4}", name, labels, count, avg, max);
        }
    }

    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}

//! # Tier Engine
//!
//! Coordinates blob reads and writes across a volatile cache tier and a
//! durable archive reachable over several redundant endpoints.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TierEngine                           │
//! │  • execute(action, params) → StepOutcome + reward          │
//! │  • ingest / query / retrieve / list / evict / destroy      │
//! └─────────────────────────────────────────────────────────────┘
//!            │                    │                    │
//!            ▼                    ▼                    ▼
//! ┌──────────────────┐ ┌────────────────────┐ ┌──────────────────┐
//! │   UriResolver    │ │     CacheTier      │ │  ArchiveClient   │
//! │ file:: hdf5::    │ │ • TTL entries      │ │ • round-robin    │
//! │ folder:: mem::   │ │ • consistent hash  │ │ • failover       │
//! │                  │ │ • hit/miss counts  │ │ • retry-after    │
//! └──────────────────┘ └────────────────────┘ └──────────────────┘
//!                                │                    │
//!                      memory / Redis nodes   archive endpoints
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tier_engine::{TierEngine, TierEngineConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TierEngineConfig {
//!         archive_endpoints: vec!["tcp://10.0.0.1:5560".into(), "tcp://10.0.0.2:5560".into()],
//!         cache_nodes: vec!["redis://localhost:6379".into()],
//!         ..Default::default()
//!     };
//!
//!     let engine = TierEngine::from_config(config).await.expect("cache nodes");
//!     engine.connect().await.expect("no archive endpoint answered");
//!
//!     let ingest = json!({"source": "folder::/data/run-1", "tag": "run-1"});
//!     let outcome = engine.execute("ingest", ingest.as_object().cloned().unwrap_or_default()).await;
//!     println!("{}", outcome.text);
//!
//!     // First read misses and repairs the cache; the second one hits.
//!     let read = json!({"tag": "run-1", "name": "metrics.csv"});
//!     for _ in 0..2 {
//!         let outcome = engine.execute("retrieve", read.as_object().cloned().unwrap_or_default()).await;
//!         println!("{} (reward {})", outcome.text, outcome.reward);
//!     }
//!     println!("hit rate: {:.2}", engine.cache_hit_rate());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`TierEngine`] and its action vocabulary
//! - [`cache`]: Cache tier with consistent-hash node placement
//! - [`storage`]: Cache node backends (memory, Redis)
//! - [`archive`]: Multi-endpoint archive client, wire protocol, transports
//! - [`resolver`]: Source reference expansion
//! - [`rewards`]: Reward policy
//! - [`resilience`]: Retry with backoff for backend connections

pub mod archive;
pub mod blob;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod pattern;
pub mod resilience;
pub mod resolver;
pub mod rewards;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use archive::{ArchiveClient, ArchiveError, ArchiveTimeouts, EndpointStatus, InMemoryArchive};
pub use blob::{BlobKey, ItemRef, ItemScheme, KeyError};
pub use cache::{CacheStats, CacheTier};
pub use config::TierEngineConfig;
pub use coordinator::{Action, EngineError, ErrorKind, StepOutcome, TierEngine};
pub use metrics::LatencyTimer;
pub use pattern::GlobPattern;
pub use resilience::retry::RetryConfig;
pub use resolver::{ResolveError, UriResolver};
pub use rewards::{RewardKind, RewardPolicy};
pub use storage::traits::{CacheError, CacheNode};

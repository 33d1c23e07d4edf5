// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Oplog River
//!
//! Keeps an Elasticsearch index eventually consistent with a MongoDB
//! collection by tailing the replica set oplog.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               oplog-river                               │
//! │                                                                         │
//! │  ┌──────────────────┐     start/stop     ┌──────────────────────────┐   │
//! │  │ClusterCoordinator│───────────────────►│          Worker          │   │
//! │  │ (lease election) │                    │ ┌──────────────────────┐ │   │
//! │  └────────┬─────────┘                    │ │ SnapshotImporter     │ │   │
//! │           │ master_id / master_since     │ │ LogTailer (oplog.rs) │ │   │
//! │           ▼                              │ └──────────┬───────────┘ │   │
//! │  ┌──────────────────┐      last_ts       │            ▼             │   │
//! │  │   SinkSettings   │◄───────────────────│      ChangeApplier       │   │
//! │  └────────┬─────────┘                    └────────────┬─────────────┘   │
//! │           └──────────────────┬────────────────────────┘                 │
//! │                              ▼                                          │
//! │                     Sink (Elasticsearch)                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Several instances can run against the same index. Only the lease holder
//! writes; the checkpoint and the lease live in the index's own settings
//! document, so no coordination service is needed.
//!
//! ## Delivery
//!
//! At-least-once. Every sink write is an idempotent upsert or delete, so
//! replaying from an older checkpoint converges to the same index state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use oplog_river::{ElasticSink, MongoSource, River, RiverConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> oplog_river::Result<()> {
//!     let config = RiverConfig::load()?;
//!     let source = MongoSource::connect(&config.source).await?;
//!     let sink = ElasticSink::connect(&config.sink).await?;
//!
//!     let river = River::new(config, Arc::new(source), Arc::new(sink))?;
//!     river.start().await?;
//!     // ... until a termination signal
//!     river.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod apply;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod record;
pub mod resilience;
pub mod settings;
pub mod sink;
pub mod snapshot;
pub mod source;
pub mod tailer;
pub mod worker;

// Re-exports for convenience
pub use apply::{normalize_id, ApplyOutcome, ChangeApplier};
pub use config::{ClusterConfig, RiverConfig, SinkConfig, SinkVersion, SourceConfig};
pub use coordinator::{Clock, ClusterCoordinator, EngineState, Identity, ManualClock, River, Role, SystemClock};
pub use error::{Result, RiverError};
pub use record::{ChangeRecord, Operation, Position};
pub use resilience::RetryConfig;
pub use settings::{Lease, SinkSettings};
pub use sink::{ElasticSink, MemorySink, Sink, SinkCall};
pub use snapshot::SnapshotImporter;
pub use source::{MemoryOplog, MongoSource, OplogSource, TailFilter};
pub use tailer::LogTailer;
pub use worker::{Worker, WorkerControl, WorkerState};

//! Shared test utilities for the integration tests.
//!
//! This module provides:
//! - In-memory pipeline harness (oplog, sink, worker)
//! - Recording and lease-stealing mocks for election tests
//! - Polling helpers

#![allow(dead_code)]

pub mod mock_cluster;

pub use mock_cluster::*;

use oplog_river::{MemoryOplog, MemorySink, RetryConfig, RiverConfig, Worker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DB: &str = "shop";
pub const COLLECTION: &str = "orders";
pub const NS: &str = "shop.orders";

pub fn test_config() -> RiverConfig {
    RiverConfig::for_testing(DB, COLLECTION)
}

/// A worker over an in-memory oplog and sink, with its loops running.
pub struct Pipeline {
    pub oplog: MemoryOplog,
    pub sink: Arc<MemorySink>,
    pub worker: Arc<Worker<MemoryOplog, MemorySink>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(config: &RiverConfig) -> Self {
        Self::with_parts(config, MemoryOplog::new(), Arc::new(MemorySink::new()))
    }

    /// Start a pipeline over an existing log and sink, as a restarted
    /// process would.
    pub fn with_parts(config: &RiverConfig, oplog: MemoryOplog, sink: Arc<MemorySink>) -> Self {
        let worker = Arc::new(
            Worker::new(config, Arc::new(oplog.clone()), Arc::clone(&sink))
                .with_retry(RetryConfig::testing()),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = worker.spawn(shutdown_rx);
        Self {
            oplog,
            sink,
            worker,
            shutdown_tx,
            handles,
        }
    }

    /// Signal shutdown and wait for every loop to exit.
    pub async fn stop(self) -> (MemoryOplog, Arc<MemorySink>) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("loop did not stop")
                .expect("loop panicked");
        }
        (self.oplog, self.sink)
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", what);
}

/// Let the background loops run for a moment.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(40)).await;
}

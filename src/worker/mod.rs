// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The worker: snapshot import and log tailing behind two activity gates.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Worker                             │
//! │  start()/stop() ──► snapshot gate ──► import loop ─┐         │
//! │                 └─► tail gate ─────► tail loop ────┼──► ChangeApplier ──► Sink
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `start()` opens the tail gate, and the snapshot gate unless the initial
//! import is skipped. `stop()` closes both. The loops keep running while
//! the gates are closed: they park without issuing sink writes and keep
//! their source cursors, so the next `start()` resumes at once.
//!
//! Per-record apply errors are logged by the loops and never propagated.

pub mod gate;
mod import_loop;
mod tail_loop;

pub use gate::ActivityGate;

use crate::apply::ChangeApplier;
use crate::config::RiverConfig;
use crate::error::Result;
use crate::metrics;
use crate::record::ChangeRecord;
use crate::resilience::RetryConfig;
use crate::settings::{Lease, SinkSettings};
use crate::sink::{BoxFuture, Sink};
use crate::snapshot::SnapshotImporter;
use crate::source::OplogSource;
use crate::tailer::LogTailer;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Worker state, derived from the gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Active,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Active => write!(f, "active"),
        }
    }
}

/// What the cluster coordinator drives.
///
/// The coordinator never touches worker internals; it only calls these.
pub trait WorkerControl: Send + Sync + 'static {
    fn start(&self);

    fn stop(&self);

    /// Read the election lease from shared storage.
    fn lease(&self) -> BoxFuture<'_, Lease>;

    /// Write the election lease to shared storage.
    fn set_lease(&self, lease: Lease) -> BoxFuture<'_, ()>;
}

/// Owns the importer, the tailer and the applier.
pub struct Worker<S, K> {
    source: Arc<S>,
    applier: Arc<ChangeApplier<K>>,
    database: String,
    collection: String,
    skip_initial_import: bool,
    retry: RetryConfig,
    snapshot_gate: ActivityGate,
    tail_gate: ActivityGate,
    snapshot_complete: Arc<AtomicBool>,
}

impl<S: OplogSource, K: Sink> Worker<S, K> {
    pub fn new(config: &RiverConfig, source: Arc<S>, sink: Arc<K>) -> Self {
        let settings = Arc::new(SinkSettings::new(sink));
        Self {
            source,
            applier: Arc::new(ChangeApplier::new(settings)),
            database: config.source.database.clone(),
            collection: config.source.collection.clone(),
            skip_initial_import: config.river.skip_initial_import,
            retry: RetryConfig::daemon(),
            snapshot_gate: ActivityGate::new(),
            tail_gate: ActivityGate::new(),
            snapshot_complete: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the reconnect schedule.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    pub fn settings(&self) -> &Arc<SinkSettings<K>> {
        self.applier.settings()
    }

    pub fn state(&self) -> WorkerState {
        if self.tail_gate.is_active() {
            WorkerState::Active
        } else {
            WorkerState::Stopped
        }
    }

    pub fn is_tail_active(&self) -> bool {
        self.tail_gate.is_active()
    }

    pub fn is_snapshot_active(&self) -> bool {
        self.snapshot_gate.is_active()
    }

    /// The initial import finished a full pass.
    pub fn is_snapshot_complete(&self) -> bool {
        self.snapshot_complete.load(Ordering::SeqCst)
    }

    /// Spawn the background loops. They idle until [`start`](Self::start).
    pub fn spawn(&self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);

        if !self.skip_initial_import {
            let importer = SnapshotImporter::new(
                Arc::clone(&self.source),
                self.database.clone(),
                self.collection.clone(),
            );
            handles.push(tokio::spawn(import_loop::run_import_loop(
                importer,
                Arc::clone(&self.applier),
                self.snapshot_gate.subscribe(),
                shutdown_rx.clone(),
                self.retry.clone(),
                Arc::clone(&self.snapshot_complete),
            )));
        }

        let tailer = LogTailer::new(Arc::clone(&self.source), self.namespace());
        handles.push(tokio::spawn(tail_loop::run_tail_loop(
            tailer,
            Arc::clone(&self.applier),
            self.tail_gate.subscribe(),
            shutdown_rx,
            self.retry.clone(),
        )));

        handles
    }

    pub fn start(&self) {
        if !self.skip_initial_import {
            self.snapshot_gate.set(true);
        }
        if self.tail_gate.set(true) {
            debug!(namespace = %self.namespace(), "Worker started");
        }
        metrics::set_worker_active(true);
    }

    pub fn stop(&self) {
        self.snapshot_gate.set(false);
        if self.tail_gate.set(false) {
            debug!(namespace = %self.namespace(), "Worker stopped");
        }
        metrics::set_worker_active(false);
    }

    pub async fn lease(&self) -> Result<Lease> {
        self.settings().lease().await
    }

    pub async fn set_lease(&self, lease: &Lease) -> Result<()> {
        self.settings().set_lease(lease).await
    }
}

impl<S: OplogSource, K: Sink> WorkerControl for Worker<S, K> {
    fn start(&self) {
        Worker::start(self);
    }

    fn stop(&self) {
        Worker::stop(self);
    }

    fn lease(&self) -> BoxFuture<'_, Lease> {
        Box::pin(Worker::lease(self))
    }

    fn set_lease(&self, lease: Lease) -> BoxFuture<'_, ()> {
        Box::pin(async move { Worker::set_lease(self, &lease).await })
    }
}

impl<T: WorkerControl + ?Sized> WorkerControl for Arc<T> {
    fn start(&self) {
        (**self).start()
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn lease(&self) -> BoxFuture<'_, Lease> {
        (**self).lease()
    }

    fn set_lease(&self, lease: Lease) -> BoxFuture<'_, ()> {
        (**self).set_lease(lease)
    }
}

/// Apply one record, logging a failure with enough context to replay it.
pub(crate) async fn apply_logged<K: Sink>(applier: &ChangeApplier<K>, record: &ChangeRecord) {
    if let Err(e) = applier.apply(record).await {
        let id = record
            .target_id()
            .map(|id| id.to_string())
            .unwrap_or_default();
        warn!(
            position = ?record.position,
            op = %record.operation,
            id = %id,
            namespace = %record.namespace,
            error = %e,
            "Failed to apply record"
        );
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! River engine coordinator.
//!
//! Ties together:
//! - the [`Worker`] (snapshot import and oplog tailing)
//! - the [`ClusterCoordinator`] that decides whether this instance may run it
//!
//! # Lifecycle
//!
//! 1. `new()` validates the config and builds everything; nothing runs yet
//! 2. `start()` spawns the worker loops (parked) and the election loop, or
//!    starts the worker directly when clustering is disabled
//! 3. `shutdown()` signals every loop, waits for in-flight applies to finish
//!    and reports `Stopped`

mod clock;
mod election;
mod identity;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use election::ClusterCoordinator;
pub use identity::Identity;
pub use types::{EngineState, Role};

use crate::config::RiverConfig;
use crate::error::{Result, RiverError};
use crate::metrics;
use crate::sink::Sink;
use crate::source::OplogSource;
use crate::worker::Worker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `shutdown()` waits for a task before warning that it is still
/// finishing a write. The wait itself is not bounded.
const DRAIN_WARN_AFTER: Duration = Duration::from_secs(10);

/// The river engine: one worker, optionally driven by a lease election.
pub struct River<S, K> {
    config: RiverConfig,

    worker: Arc<Worker<S, K>>,

    /// Present when clustering is enabled.
    coordinator: Option<Arc<ClusterCoordinator<Worker<S, K>>>>,

    identity: Identity,

    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    handles: RwLock<Vec<JoinHandle<()>>>,
}

impl<S: OplogSource, K: Sink> River<S, K> {
    /// Build an engine over `source` and `sink` with a fresh identity.
    pub fn new(config: RiverConfig, source: Arc<S>, sink: Arc<K>) -> Result<Self> {
        let worker = Worker::new(&config, source, sink);
        Self::with_parts(config, worker, Identity::generate(), Arc::new(SystemClock))
    }

    /// Build an engine from an already configured worker.
    pub fn with_parts(
        config: RiverConfig,
        worker: Worker<S, K>,
        identity: Identity,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let worker = Arc::new(worker);
        let coordinator = config.cluster.enabled.then(|| {
            Arc::new(ClusterCoordinator::new(
                &config.cluster,
                identity.clone(),
                Arc::clone(&worker),
                clock,
            ))
        });

        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            worker,
            coordinator,
            identity,
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            handles: RwLock::new(Vec::new()),
        })
    }

    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn worker(&self) -> &Arc<Worker<S, K>> {
        &self.worker
    }

    /// Election role updates. `None` when clustering is disabled.
    pub fn role_receiver(&self) -> Option<watch::Receiver<Role>> {
        self.coordinator.as_ref().map(|c| c.role_receiver())
    }

    /// Whether this instance leads. Always true without clustering once started.
    pub fn is_leader(&self) -> bool {
        match &self.coordinator {
            Some(coordinator) => coordinator.role().is_leader(),
            None => self.is_running(),
        }
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    /// Start replicating.
    pub async fn start(&self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(RiverError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            identity = %self.identity,
            namespace = %self.config.namespace(),
            clustered = self.config.cluster.enabled,
            "Starting river"
        );

        let mut handles = self.handles.write().await;
        handles.extend(self.worker.spawn(self.shutdown_rx.clone()));

        match &self.coordinator {
            Some(coordinator) => {
                let coordinator = Arc::clone(coordinator);
                let shutdown_rx = self.shutdown_rx.clone();
                handles.push(tokio::spawn(async move {
                    coordinator.run(shutdown_rx).await;
                }));
                debug!("Spawned election loop");
            }
            None => {
                info!("Clustering disabled, starting worker");
                self.worker.start();
            }
        }
        drop(handles);

        self.set_state(EngineState::Running);
        Ok(())
    }

    /// Shut down gracefully.
    ///
    /// Loops stop issuing sink writes and every task is awaited, so an apply
    /// in flight reaches the sink and the checkpoint before this returns.
    pub async fn shutdown(&self) {
        match self.state() {
            EngineState::Stopped | EngineState::Failed => return,
            _ => {}
        }

        info!("Shutting down river");
        self.set_state(EngineState::ShuttingDown);
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.handles.write().await;
            std::mem::take(&mut *guard)
        };

        let task_count = handles.len();
        if task_count > 0 {
            info!(task_count, "Waiting for tasks to finish");
        }

        let mut panicked = false;
        for (i, mut handle) in handles.into_iter().enumerate() {
            let joined = match tokio::time::timeout(DRAIN_WARN_AFTER, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(task = i + 1, "Task still finishing an in-flight write");
                    handle.await
                }
            };
            match joined {
                Ok(()) => {
                    debug!(task = i + 1, "Task completed");
                }
                Err(e) => {
                    panicked = true;
                    error!(task = i + 1, error = %e, "Task panicked");
                }
            }
        }

        self.worker.stop();

        if panicked {
            self.set_state(EngineState::Failed);
            error!("River stopped after a task failure");
        } else {
            self.set_state(EngineState::Stopped);
            info!("River stopped");
        }
    }
}

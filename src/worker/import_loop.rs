// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Import loop: full collection scan into the sink, at most once.
//!
//! Closing the gate abandons the scan in progress; the next activation
//! starts it again from the first document. Once a pass completes the loop
//! exits and later activations do not import again.

use super::apply_logged;
use super::gate::{sleep_or_shutdown, wait_active};
use crate::apply::ChangeApplier;
use crate::metrics;
use crate::resilience::RetryConfig;
use crate::sink::Sink;
use crate::snapshot::SnapshotImporter;
use crate::source::OplogSource;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};

enum Pass {
    Complete,
    Interrupted,
    Failed,
}

/// Run the import loop until the import completes or shutdown.
pub(crate) async fn run_import_loop<S: OplogSource, K: Sink>(
    importer: SnapshotImporter<S>,
    applier: Arc<ChangeApplier<K>>,
    mut gate: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
    retry: RetryConfig,
    complete: Arc<AtomicBool>,
) {
    let span = info_span!("snapshot", namespace = %importer.namespace());

    async move {
        let mut failures = 0usize;

        loop {
            if !wait_active(&mut gate, &mut shutdown_rx).await {
                break;
            }

            let mut stream = match importer.open().await {
                Ok(stream) => stream,
                Err(e) => {
                    failures += 1;
                    let delay = retry.delay_for_attempt(failures);
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Failed to open collection scan");
                    if !sleep_or_shutdown(delay, &mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };

            info!("Starting initial import");
            let started = Instant::now();
            let mut imported = 0u64;

            let pass = loop {
                if *shutdown_rx.borrow_and_update() || !*gate.borrow_and_update() {
                    break Pass::Interrupted;
                }

                let item = tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break Pass::Interrupted;
                        }
                        continue;
                    }

                    changed = gate.changed() => {
                        if changed.is_err() {
                            break Pass::Interrupted;
                        }
                        continue;
                    }

                    item = stream.next() => item,
                };

                match item {
                    Some(Ok(record)) => {
                        if !*gate.borrow() || *shutdown_rx.borrow() {
                            break Pass::Interrupted;
                        }
                        apply_logged(&applier, &record).await;
                        imported += 1;
                        metrics::record_records_read("snapshot", 1);
                        metrics::record_snapshot_documents(1);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, imported, "Collection scan failed");
                        break Pass::Failed;
                    }
                    None => break Pass::Complete,
                }
            };

            match pass {
                Pass::Complete => {
                    metrics::record_snapshot_pass("complete", started.elapsed());
                    complete.store(true, Ordering::SeqCst);
                    info!(imported, "Initial import complete");
                    return;
                }
                Pass::Interrupted => {
                    metrics::record_snapshot_pass("interrupted", started.elapsed());
                    info!(imported, "Initial import interrupted, will restart from the beginning");
                }
                Pass::Failed => {
                    metrics::record_snapshot_pass("interrupted", started.elapsed());
                    failures += 1;
                    let delay = retry.delay_for_attempt(failures);
                    if !sleep_or_shutdown(delay, &mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }

        info!("Initial import stopped");
    }
    .instrument(span)
    .await
}

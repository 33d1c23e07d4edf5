// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tail loop: replication log to sink, one record at a time.
//!
//! # Lifecycle
//!
//! ```text
//!          ┌──────── gate closed ────────┐
//!          ▼                             │
//!      [parked] ── gate opens ──► [refresh checkpoint] ──► [applying]
//!                                                            │    ▲
//!                                              cursor lost   ▼    │
//!                                                        [backoff, reopen]
//! ```
//!
//! While parked the open cursor is kept, so reopening the gate resumes from
//! the same place without a new tail request. A new tail is only opened when
//! there is none yet or the previous one was lost; it starts at the last
//! position seen, or the stored checkpoint when nothing was seen.
//!
//! Shutdown is observed between records, so an apply in flight always
//! finishes.

use super::apply_logged;
use super::gate::{sleep_or_shutdown, wait_active};
use crate::apply::ChangeApplier;
use crate::metrics;
use crate::record::{ChangeRecord, Position};
use crate::resilience::RetryConfig;
use crate::sink::Sink;
use crate::source::OplogSource;
use crate::tailer::{LogTailer, RecordStream};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Run the tail loop until shutdown.
pub(crate) async fn run_tail_loop<S: OplogSource, K: Sink>(
    tailer: LogTailer<S>,
    applier: Arc<ChangeApplier<K>>,
    mut gate: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
    retry: RetryConfig,
) {
    let span = info_span!("tail", namespace = %tailer.namespace());

    async move {
        info!("Starting oplog tailer");

        let mut stream: Option<RecordStream> = None;
        // Position of the newest record pulled from the current or a previous cursor.
        let mut last_seen: Option<Position> = None;
        // Pulled just as the gate closed; applied first after reactivation.
        let mut pending: Option<ChangeRecord> = None;
        let mut failures = 0usize;
        let mut opened_before = false;

        'outer: loop {
            if !wait_active(&mut gate, &mut shutdown_rx).await {
                break;
            }

            // Another leader may have moved the checkpoint while we were parked.
            let checkpoint = match applier.settings().refresh().await {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    failures += 1;
                    let delay = retry.delay_for_attempt(failures);
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Failed to read checkpoint");
                    if !sleep_or_shutdown(delay, &mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };
            info!(since = ?checkpoint, "Listening for oplog");

            loop {
                if *shutdown_rx.borrow_and_update() {
                    break 'outer;
                }
                if !*gate.borrow_and_update() {
                    debug!(last_seen = ?last_seen, "Tailer parked");
                    continue 'outer;
                }

                if let Some(record) = pending.take() {
                    if !already_applied(&record, checkpoint) {
                        apply_logged(&applier, &record).await;
                    }
                    continue;
                }

                if stream.is_none() {
                    let from = last_seen.max(checkpoint);
                    match tailer.open(from).await {
                        Ok(opened) => {
                            metrics::record_tail_open(opened_before);
                            debug!(from = ?from, reconnect = opened_before, "Opened oplog tail");
                            opened_before = true;
                            failures = 0;
                            stream = Some(opened);
                        }
                        Err(e) => {
                            failures += 1;
                            let delay = retry.delay_for_attempt(failures);
                            warn!(
                                error = %e,
                                attempt = failures,
                                delay_ms = delay.as_millis() as u64,
                                "Failed to open oplog tail"
                            );
                            if !sleep_or_shutdown(delay, &mut shutdown_rx).await {
                                break 'outer;
                            }
                            continue;
                        }
                    }
                }
                let Some(current) = stream.as_mut() else {
                    continue;
                };

                let item = tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break 'outer;
                        }
                        continue;
                    }

                    changed = gate.changed() => {
                        if changed.is_err() {
                            break 'outer;
                        }
                        continue;
                    }

                    item = current.next() => item,
                };

                match item {
                    Some(Ok(record)) => {
                        failures = 0;
                        if record.position.is_some() {
                            last_seen = record.position.max(last_seen);
                        }
                        if !*gate.borrow() || *shutdown_rx.borrow() {
                            pending = Some(record);
                            continue;
                        }
                        if already_applied(&record, checkpoint) {
                            trace!(position = ?record.position, "Skipping record below checkpoint");
                            continue;
                        }
                        apply_logged(&applier, &record).await;
                    }
                    Some(Err(e)) => {
                        stream = None;
                        failures += 1;
                        let delay = retry.delay_for_attempt(failures);
                        warn!(
                            error = %e,
                            retryable = e.is_retryable(),
                            last_seen = ?last_seen,
                            delay_ms = delay.as_millis() as u64,
                            "Oplog tail failed, reconnecting"
                        );
                        if !sleep_or_shutdown(delay, &mut shutdown_rx).await {
                            break 'outer;
                        }
                    }
                    None => {
                        stream = None;
                        failures += 1;
                        let delay = retry.delay_for_attempt(failures);
                        warn!(
                            last_seen = ?last_seen,
                            delay_ms = delay.as_millis() as u64,
                            "Oplog cursor closed, reconnecting"
                        );
                        if !sleep_or_shutdown(delay, &mut shutdown_rx).await {
                            break 'outer;
                        }
                    }
                }
            }
        }

        info!("Oplog tailer stopped");
    }
    .instrument(span)
    .await
}

/// Records strictly below the checkpoint read at activation were applied by
/// an earlier leader.
fn already_applied(record: &ChangeRecord, checkpoint: Option<Position>) -> bool {
    matches!(
        (record.position, checkpoint),
        (Some(position), Some(checkpoint)) if position < checkpoint
    )
}

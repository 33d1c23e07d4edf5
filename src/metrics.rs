// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Emits through the `metrics` facade for:
//! - Log tailing throughput and reconnects
//! - Change application outcomes and latency
//! - Checkpoint progress
//! - Snapshot import progress
//! - Lease election and leadership
//!
//! No exporter is installed here; the host process picks one.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `river_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! # Usage
//!
//! ```rust,no_run
//! use oplog_river::metrics;
//! use std::time::Duration;
//!
//! metrics::record_records_read("tail", 1);
//! metrics::record_apply("insert", "applied", Duration::from_millis(4));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Pipeline Metrics
// =============================================================================

/// Record change records read from a producer (`tail` or `snapshot`).
pub fn record_records_read(producer: &'static str, count: u64) {
    counter!("river_records_read_total", "producer" => producer).increment(count);
}

/// Record one apply attempt.
///
/// `outcome` is `applied`, `skipped` or `failed`.
pub fn record_apply(op: &'static str, outcome: &'static str, duration: Duration) {
    counter!("river_records_applied_total", "op" => op, "outcome" => outcome).increment(1);
    histogram!("river_apply_duration_seconds", "op" => op).record(duration.as_secs_f64());
}

/// Record a log entry that could not be decoded.
pub fn record_malformed_entry() {
    counter!("river_malformed_entries_total").increment(1);
}

/// Gauge for the persisted checkpoint, in source seconds.
pub fn set_checkpoint(time: u32) {
    gauge!("river_checkpoint_time_seconds").set(time as f64);
}

/// Record a failed checkpoint write.
pub fn record_checkpoint_failure() {
    counter!("river_checkpoint_failures_total").increment(1);
}

/// Record a tail cursor being (re)opened.
pub fn record_tail_open(reconnect: bool) {
    let kind = if reconnect { "reconnect" } else { "initial" };
    counter!("river_tail_opens_total", "kind" => kind).increment(1);
}

// =============================================================================
// Snapshot Metrics
// =============================================================================

/// Record documents imported by the snapshot scan.
pub fn record_snapshot_documents(count: u64) {
    counter!("river_snapshot_documents_total").increment(count);
}

/// Record a finished snapshot pass.
///
/// `outcome` is `complete` or `interrupted`.
pub fn record_snapshot_pass(outcome: &'static str, duration: Duration) {
    counter!("river_snapshot_passes_total", "outcome" => outcome).increment(1);
    histogram!("river_snapshot_duration_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Election Metrics
// =============================================================================

/// Record one lease write attempt.
///
/// `kind` is `claim` (lease taken from nobody or an expired holder) or
/// `renew` (already ours).
pub fn record_lease_write(kind: &'static str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("river_lease_writes_total", "kind" => kind, "status" => status).increment(1);
}

/// Record a tick that could not read the lease.
pub fn record_election_error() {
    counter!("river_election_errors_total").increment(1);
}

/// Gauge: 1 while this instance leads, 0 otherwise.
pub fn set_leader(leader: bool) {
    gauge!("river_leader").set(if leader { 1.0 } else { 0.0 });
}

/// Record a change of role.
pub fn record_role_change(role: &'static str) {
    counter!("river_role_changes_total", "role" => role).increment(1);
}

// =============================================================================
// State Gauges
// =============================================================================

/// Gauge for worker state (0=stopped, 1=active).
pub fn set_worker_active(active: bool) {
    gauge!("river_worker_active").set(if active { 1.0 } else { 0.0 });
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        "Failed" => 4.0,
        _ => -1.0,
    };
    gauge!("river_engine_state").set(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed, so these only prove the calls are well formed.

    #[test]
    fn test_record_records_read() {
        record_records_read("tail", 1);
        record_records_read("snapshot", 500);
    }

    #[test]
    fn test_record_apply_outcomes() {
        record_apply("insert", "applied", Duration::from_millis(3));
        record_apply("noop", "skipped", Duration::ZERO);
        record_apply("delete", "failed", Duration::from_secs(1));
    }

    #[test]
    fn test_checkpoint_metrics() {
        set_checkpoint(0);
        set_checkpoint(u32::MAX);
        record_checkpoint_failure();
        record_malformed_entry();
    }

    #[test]
    fn test_tail_and_snapshot_metrics() {
        record_tail_open(false);
        record_tail_open(true);
        record_snapshot_documents(0);
        record_snapshot_pass("complete", Duration::from_secs(2));
        record_snapshot_pass("interrupted", Duration::from_millis(10));
    }

    #[test]
    fn test_election_metrics() {
        record_lease_write("claim", true);
        record_lease_write("renew", false);
        record_election_error();
        set_leader(true);
        set_leader(false);
        record_role_change("leader");
    }

    #[test]
    fn test_set_engine_state_all_states() {
        set_engine_state("Created");
        set_engine_state("Running");
        set_engine_state("ShuttingDown");
        set_engine_state("Stopped");
        set_engine_state("Failed");
        set_engine_state("Unknown");
        set_worker_active(true);
    }
}

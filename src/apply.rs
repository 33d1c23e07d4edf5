// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change application.
//!
//! Turns one [`ChangeRecord`] into one sink write, then advances the
//! checkpoint to the record's position.
//!
//! # Dispatch
//!
//! | Operation | Sink call |
//! |-----------|-----------|
//! | insert | `insert(id(o._id), o)` with `_id` replaced by the normalized id |
//! | update | `update(id(o2._id), o)` |
//! | delete | `remove(id(o2._id))`, falling back to `o._id` |
//! | noop, other | nothing |
//!
//! # Failure
//!
//! A failed write is returned to the caller and the checkpoint stays where
//! it was. The record is not retried in this run; a restart re-tails from the
//! checkpoint and delivers it again.

use crate::error::{Result, RiverError};
use crate::metrics;
use crate::record::{ChangeRecord, Operation};
use crate::settings::SinkSettings;
use crate::sink::Sink;
use bson::oid::ObjectId;
use bson::Bson;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Canonical sink id for a source `_id`.
///
/// An ObjectId and its hex string normalize to the same lowercase hex, so
/// both encodings address one sink document.
pub fn normalize_id(id: Option<&Bson>) -> Result<String> {
    match id {
        Some(Bson::ObjectId(oid)) => Ok(oid.to_hex()),
        Some(Bson::String(s)) if s.is_empty() => {
            Err(RiverError::InvalidRecord("empty _id".to_string()))
        }
        Some(Bson::String(s)) => Ok(ObjectId::parse_str(s)
            .map(|oid| oid.to_hex())
            .unwrap_or_else(|_| s.clone())),
        Some(Bson::Int32(n)) => Ok(n.to_string()),
        Some(Bson::Int64(n)) => Ok(n.to_string()),
        Some(other) => Err(RiverError::InvalidRecord(format!(
            "unsupported _id type {:?}",
            other.element_type()
        ))),
        None => Err(RiverError::InvalidRecord("missing _id".to_string())),
    }
}

/// Result of a successful apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A sink write was issued.
    Written,
    /// Nothing to write for this operation.
    Skipped,
}

/// Applies change records to the sink, one at a time.
pub struct ChangeApplier<K> {
    settings: Arc<SinkSettings<K>>,
}

impl<K: Sink> ChangeApplier<K> {
    pub fn new(settings: Arc<SinkSettings<K>>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Arc<SinkSettings<K>> {
        &self.settings
    }

    /// Apply one record and advance the checkpoint.
    pub async fn apply(&self, record: &ChangeRecord) -> Result<ApplyOutcome> {
        let started = Instant::now();
        let op = record.operation.as_str();

        let result = self.write(record).await;
        let outcome_label = match &result {
            Ok(ApplyOutcome::Written) => "applied",
            Ok(ApplyOutcome::Skipped) => "skipped",
            Err(_) => "failed",
        };
        metrics::record_apply(op, outcome_label, started.elapsed());
        let outcome = result?;

        if let Some(position) = record.position {
            if let Err(e) = self.settings.advance_checkpoint(position).await {
                // The write itself landed; the next applied record moves the
                // checkpoint past this one.
                warn!(position = %position, op, error = %e, "Checkpoint write failed");
            }
        }
        Ok(outcome)
    }

    async fn write(&self, record: &ChangeRecord) -> Result<ApplyOutcome> {
        let sink = self.settings.sink();
        match &record.operation {
            Operation::Insert => {
                let id = normalize_id(record.target_id())?;
                let mut document = record.object.clone();
                document.insert("_id", id.clone());
                debug!(id = %id, namespace = %record.namespace, "Received insert op");
                sink.insert(id, document).await?;
            }
            Operation::Update => {
                let id = normalize_id(record.target_id())?;
                debug!(id = %id, namespace = %record.namespace, "Received update op");
                sink.update(id, record.object.clone()).await?;
            }
            Operation::Delete => {
                let id = normalize_id(record.target_id())?;
                debug!(id = %id, namespace = %record.namespace, "Received delete op");
                sink.remove(id).await?;
            }
            Operation::Noop | Operation::Other(_) => {
                debug!(op = record.operation.code(), "Skipping op");
                return Ok(ApplyOutcome::Skipped);
            }
        }
        Ok(ApplyOutcome::Written)
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication log tailing.
//!
//! Opens a tail on the source from a position and turns raw log entries into
//! [`ChangeRecord`]s, in log order.
//!
//! # Filtering
//!
//! The query sent to the source already excludes migrations and other
//! namespaces. The same rules are applied again to every decoded record, so
//! nothing outside the configured namespace reaches the applier even if a
//! source ignores part of the query.
//!
//! # Malformed Entries
//!
//! Entries that cannot be decoded are logged and skipped. Source errors are
//! passed through; the caller decides whether to reconnect.

use crate::error::Result;
use crate::metrics;
use crate::record::{ChangeRecord, Position};
use crate::source::{OplogSource, TailFilter};
use bson::Document;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{trace, warn};

/// A live sequence of change records.
pub type RecordStream = BoxStream<'static, Result<ChangeRecord>>;

/// Tails the replication log for one namespace.
pub struct LogTailer<S> {
    source: Arc<S>,
    namespace: String,
}

impl<S: OplogSource> LogTailer<S> {
    pub fn new(source: Arc<S>, namespace: impl Into<String>) -> Self {
        Self {
            source,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Open a tail starting at `from` (inclusive), or at the start of the log.
    ///
    /// The stream waits for new entries. It ends only when the underlying
    /// cursor is lost.
    pub async fn open(&self, from: Option<Position>) -> Result<RecordStream> {
        let filter = TailFilter::new(self.namespace.clone(), from);
        let raw = self.source.tail(filter).await?;
        let namespace = self.namespace.clone();

        Ok(raw
            .filter_map(move |item| future::ready(decode(item, &namespace)))
            .boxed())
    }
}

/// Decode one raw tail item. `None` drops it.
fn decode(item: Result<Document>, namespace: &str) -> Option<Result<ChangeRecord>> {
    let entry = match item {
        Ok(entry) => entry,
        Err(e) => return Some(Err(e)),
    };

    match ChangeRecord::from_oplog(&entry) {
        Ok(record) if record.is_relevant(namespace) => {
            trace!(
                position = ?record.position,
                op = %record.operation,
                "Parsed oplog entry"
            );
            metrics::record_records_read("tail", 1);
            Some(Ok(record))
        }
        Ok(record) => {
            trace!(
                position = ?record.position,
                namespace = %record.namespace,
                from_migrate = record.from_migrate,
                "Ignoring oplog entry"
            );
            None
        }
        Err(e) => {
            metrics::record_malformed_entry();
            warn!(
                ts = ?entry.get("ts"),
                error = %e,
                "Failed to parse oplog entry, skipping"
            );
            None
        }
    }
}

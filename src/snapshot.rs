// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full-collection import.
//!
//! Emits one insert record per document currently in the collection. The
//! scan cannot resume part way: a new [`open`](SnapshotImporter::open) starts
//! from the first document again. Re-importing a document that the tailer
//! already wrote converges because inserts are upserts.

use crate::error::Result;
use crate::record::ChangeRecord;
use crate::source::OplogSource;
use crate::tailer::RecordStream;
use futures::stream::StreamExt;
use std::sync::Arc;

/// Scans one collection into insert records.
pub struct SnapshotImporter<S> {
    source: Arc<S>,
    database: String,
    collection: String,
}

impl<S: OplogSource> SnapshotImporter<S> {
    pub fn new(source: Arc<S>, database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            source,
            database: database.into(),
            collection: collection.into(),
        }
    }

    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    /// Start a scan from the beginning of the collection.
    pub async fn open(&self) -> Result<RecordStream> {
        let raw = self
            .source
            .scan(self.database.clone(), self.collection.clone())
            .await?;
        let namespace = self.namespace();

        Ok(raw
            .map(move |item| item.map(|doc| ChangeRecord::snapshot_insert(namespace.clone(), doc)))
            .boxed())
    }
}

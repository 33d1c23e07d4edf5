// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source store integration.
//!
//! The source provides two raw document streams:
//! - `tail`: the replication log from a position onwards. The stream waits
//!   for new entries and never ends on its own; ending means the cursor or
//!   connection was lost and the caller should reopen it.
//! - `scan`: every document of one collection, once.
//!
//! Decoding into change records happens above this layer, in
//! [`LogTailer`](crate::tailer::LogTailer) and
//! [`SnapshotImporter`](crate::snapshot::SnapshotImporter).

pub mod memory;
pub mod mongo;

pub use memory::MemoryOplog;
pub use mongo::MongoSource;

use crate::error::Result;
use crate::record::Position;
use bson::{doc, Document};
use futures::stream::BoxStream;
use std::sync::Arc;

pub use crate::sink::BoxFuture;

/// Raw documents read from the source.
pub type DocumentStream = BoxStream<'static, Result<Document>>;

/// Replication log query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailFilter {
    /// `database.collection`
    pub namespace: String,
    /// Inclusive lower bound. `None` reads from the start of the log.
    pub from: Option<Position>,
    /// Drop entries written by chunk migration.
    pub exclude_migrations: bool,
}

impl TailFilter {
    pub fn new(namespace: impl Into<String>, from: Option<Position>) -> Self {
        Self {
            namespace: namespace.into(),
            from,
            exclude_migrations: true,
        }
    }

    /// Render as a log query document.
    ///
    /// ```text
    /// { fromMigrate: { $exists: false }, ns: <namespace>, ts: { $gte: <from> } }
    /// ```
    pub fn to_document(&self) -> Document {
        let mut query = Document::new();
        if self.exclude_migrations {
            query.insert("fromMigrate", doc! { "$exists": false });
        }
        query.insert("ns", self.namespace.clone());
        if let Some(from) = self.from {
            query.insert("ts", doc! { "$gte": from.to_timestamp() });
        }
        query
    }
}

/// What the river needs from the source store.
pub trait OplogSource: Send + Sync + 'static {
    /// Open a tail over the replication log.
    fn tail(&self, filter: TailFilter) -> BoxFuture<'_, DocumentStream>;

    /// Open a full scan of one collection.
    fn scan(&self, database: String, collection: String) -> BoxFuture<'_, DocumentStream>;
}

impl<T: OplogSource + ?Sized> OplogSource for Arc<T> {
    fn tail(&self, filter: TailFilter) -> BoxFuture<'_, DocumentStream> {
        (**self).tail(filter)
    }

    fn scan(&self, database: String, collection: String) -> BoxFuture<'_, DocumentStream> {
        (**self).scan(database, collection)
    }
}

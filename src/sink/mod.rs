// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sink integration traits.
//!
//! The sink stores replicated documents and exposes a small key/value
//! settings area. The river keeps its checkpoint and the election lease in
//! that area, so the sink is the only state shared between instances.
//!
//! # Write Semantics
//!
//! Implementations must be idempotent:
//! - `insert` and `update` are upserts by id
//! - `remove` of an id that does not exist succeeds
//!
//! Redelivery after a restart relies on this.
//!
//! # Example
//!
//! ```rust,no_run
//! use oplog_river::sink::{BoxFuture, Sink};
//! use bson::Document;
//!
//! struct Discard;
//!
//! impl Sink for Discard {
//!     fn insert(&self, _id: String, _document: Document) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn update(&self, _id: String, _document: Document) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn remove(&self, _id: String) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn get_setting(&self, _key: &'static str) -> BoxFuture<'_, Option<serde_json::Value>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//!     fn set_setting(&self, _key: &'static str, _value: serde_json::Value) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//! ```

pub mod elastic;
pub mod memory;

pub use elastic::ElasticSink;
pub use memory::{MemorySink, SinkCall};

use crate::error::Result;
use bson::Document;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What the river needs from a search index.
///
/// Version differences stay inside the implementation; callers never see
/// which wire protocol is in use.
pub trait Sink: Send + Sync + 'static {
    /// Store `document` under `id`, replacing any existing document.
    fn insert(&self, id: String, document: Document) -> BoxFuture<'_, ()>;

    /// Apply an update to the document stored under `id`.
    fn update(&self, id: String, document: Document) -> BoxFuture<'_, ()>;

    /// Delete the document stored under `id`. Absent ids are not an error.
    fn remove(&self, id: String) -> BoxFuture<'_, ()>;

    /// Read one settings value. `None` when it was never written.
    fn get_setting(&self, key: &'static str) -> BoxFuture<'_, Option<serde_json::Value>>;

    /// Write one settings value.
    fn set_setting(&self, key: &'static str, value: serde_json::Value) -> BoxFuture<'_, ()>;
}

impl<T: Sink + ?Sized> Sink for Arc<T> {
    fn insert(&self, id: String, document: Document) -> BoxFuture<'_, ()> {
        (**self).insert(id, document)
    }

    fn update(&self, id: String, document: Document) -> BoxFuture<'_, ()> {
        (**self).update(id, document)
    }

    fn remove(&self, id: String) -> BoxFuture<'_, ()> {
        (**self).remove(id)
    }

    fn get_setting(&self, key: &'static str) -> BoxFuture<'_, Option<serde_json::Value>> {
        (**self).get_setting(key)
    }

    fn set_setting(&self, key: &'static str, value: serde_json::Value) -> BoxFuture<'_, ()> {
        (**self).set_setting(key, value)
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process sink.
//!
//! Same idempotent semantics as the search index adapters. Keeps a log of
//! every successful document write so callers can assert on exactly what was
//! sent, and can be told to reject writes.

use super::{BoxFuture, Sink};
use crate::error::RiverError;
use bson::Document;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A document write that reached the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Insert { id: String, document: Document },
    Update { id: String, document: Document },
    Remove { id: String },
}

impl SinkCall {
    pub fn id(&self) -> &str {
        match self {
            SinkCall::Insert { id, .. } | SinkCall::Update { id, .. } | SinkCall::Remove { id } => {
                id
            }
        }
    }
}

#[derive(Default)]
struct State {
    documents: BTreeMap<String, Document>,
    settings: HashMap<String, serde_json::Value>,
    calls: Vec<SinkCall>,
}

/// In-memory [`Sink`].
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<State>,
    failing_writes: AtomicUsize,
    settings_unavailable: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reject the next `n` document writes with a retryable sink error.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Make every settings read and write fail until switched back.
    pub fn set_settings_unavailable(&self, unavailable: bool) {
        self.settings_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current document stored under `id`.
    pub fn document(&self, id: &str) -> Option<Document> {
        self.lock().documents.get(id).cloned()
    }

    /// All documents, ordered by id.
    pub fn documents(&self) -> BTreeMap<String, Document> {
        self.lock().documents.clone()
    }

    /// Successful document writes, in order.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.lock().calls.clone()
    }

    /// Raw settings value, bypassing failure injection.
    pub fn setting(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().settings.get(key).cloned()
    }

    /// Write a settings value directly, bypassing failure injection.
    pub fn put_setting(&self, key: &str, value: serde_json::Value) {
        self.lock().settings.insert(key.to_string(), value);
    }

    fn take_write_failure(&self, operation: &str) -> crate::error::Result<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(RiverError::sink_status(operation, 503, "injected failure"))
        } else {
            Ok(())
        }
    }

    fn check_settings(&self, operation: &str) -> crate::error::Result<()> {
        if self.settings_unavailable.load(Ordering::SeqCst) {
            Err(RiverError::sink_msg(operation, "settings unavailable"))
        } else {
            Ok(())
        }
    }

    fn upsert(&self, operation: &str, call: SinkCall) -> crate::error::Result<()> {
        self.take_write_failure(operation)?;
        let mut state = self.lock();
        match &call {
            SinkCall::Insert { id, document } | SinkCall::Update { id, document } => {
                state.documents.insert(id.clone(), document.clone());
            }
            SinkCall::Remove { id } => {
                state.documents.remove(id);
            }
        }
        state.calls.push(call);
        Ok(())
    }
}

impl Sink for MemorySink {
    fn insert(&self, id: String, document: Document) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.upsert("insert", SinkCall::Insert { id, document }) })
    }

    fn update(&self, id: String, document: Document) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.upsert("update", SinkCall::Update { id, document }) })
    }

    fn remove(&self, id: String) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.upsert("remove", SinkCall::Remove { id }) })
    }

    fn get_setting(&self, key: &'static str) -> BoxFuture<'_, Option<serde_json::Value>> {
        Box::pin(async move {
            self.check_settings("get_setting")?;
            Ok(self.setting(key))
        })
    }

    fn set_setting(&self, key: &'static str, value: serde_json::Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.check_settings("set_setting")?;
            self.put_setting(key, value);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_is_upsert() {
        let sink = MemorySink::new();
        sink.insert("a".into(), doc! { "v": 1 }).await.unwrap();
        sink.insert("a".into(), doc! { "v": 2 }).await.unwrap();
        assert_eq!(sink.documents().len(), 1);
        assert_eq!(sink.document("a"), Some(doc! { "v": 2 }));
        assert_eq!(sink.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let sink = MemorySink::new();
        sink.remove("ghost".into()).await.unwrap();
        assert!(sink.documents().is_empty());
        assert_eq!(sink.calls(), vec![SinkCall::Remove { id: "ghost".into() }]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let sink = MemorySink::new();
        sink.fail_next_writes(1);
        let err = sink.insert("a".into(), doc! {}).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(sink.calls().is_empty());

        sink.insert("a".into(), doc! {}).await.unwrap();
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let sink = MemorySink::new();
        assert_eq!(sink.get_setting("last_ts").await.unwrap(), None);
        sink.set_setting("last_ts", json!(42)).await.unwrap();
        assert_eq!(sink.get_setting("last_ts").await.unwrap(), Some(json!(42)));
    }

    #[tokio::test]
    async fn test_settings_unavailable() {
        let sink = MemorySink::new();
        sink.set_settings_unavailable(true);
        assert!(sink.get_setting("master_id").await.is_err());
        assert!(sink.set_setting("master_id", json!("x")).await.is_err());

        sink.set_settings_unavailable(false);
        sink.set_setting("master_id", json!("x")).await.unwrap();
        assert_eq!(sink.setting("master_id"), Some(json!("x")));
    }

    #[test]
    fn test_call_id() {
        let call = SinkCall::Update {
            id: "b".into(),
            document: doc! {},
        };
        assert_eq!(call.id(), "b");
    }
}

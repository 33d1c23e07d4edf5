// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process replication log and collections.
//!
//! Behaves like a tailable cursor: an open tail parks until the next append
//! instead of ending. [`MemoryOplog::disconnect`] ends every open tail, the
//! same way a dropped connection ends a driver cursor.
//!
//! Only the position bound of a [`TailFilter`] is applied here. Namespace and
//! migration filtering are left to the tailer.

use super::{BoxFuture, DocumentStream, OplogSource, TailFilter};
use crate::error::RiverError;
use crate::record::Position;
use bson::{doc, Document};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Build a raw oplog entry.
pub fn oplog_entry(
    position: Position,
    op: &str,
    namespace: &str,
    object: Document,
    filter: Option<Document>,
) -> Document {
    let mut entry = doc! {
        "ts": position.to_timestamp(),
        "h": position.as_u64() as i64,
        "v": 2_i32,
        "op": op,
        "ns": namespace,
        "o": object,
    };
    if let Some(filter) = filter {
        entry.insert("o2", filter);
    }
    entry
}

#[derive(Default)]
struct State {
    entries: Vec<Document>,
    collections: HashMap<String, Vec<Document>>,
    generation: u64,
    sequence: u32,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    appended: Notify,
    tail_opens: AtomicUsize,
    failing_opens: AtomicUsize,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory [`OplogSource`]. Clones share the same log.
#[derive(Clone, Default)]
pub struct MemoryOplog {
    inner: Arc<Inner>,
}

impl MemoryOplog {
    /// Base second used for positions assigned by [`push`](Self::push).
    pub const BASE_TIME: u32 = 1_700_000_000;

    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw entry and wake open tails.
    pub fn append(&self, entry: Document) {
        self.inner.lock().entries.push(entry);
        self.inner.appended.notify_waiters();
    }

    /// Append an entry at the next position and return that position.
    pub fn push(&self, op: &str, namespace: &str, object: Document, filter: Option<Document>) -> Position {
        let position = {
            let mut state = self.inner.lock();
            state.sequence += 1;
            let position = Position::new(Self::BASE_TIME, state.sequence);
            state
                .entries
                .push(oplog_entry(position, op, namespace, object, filter));
            position
        };
        self.inner.appended.notify_waiters();
        position
    }

    /// Add a document to a collection's scan result.
    pub fn seed_document(&self, namespace: &str, document: Document) {
        self.inner
            .lock()
            .collections
            .entry(namespace.to_string())
            .or_default()
            .push(document);
    }

    /// End every open tail.
    pub fn disconnect(&self) {
        self.inner.lock().generation += 1;
        self.inner.appended.notify_waiters();
    }

    /// Make the next `n` tail opens fail with a source error.
    pub fn fail_next_tails(&self, n: usize) {
        self.inner.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Number of tails opened so far, failed opens excluded.
    pub fn tail_opens(&self) -> usize {
        self.inner.tail_opens.load(Ordering::SeqCst)
    }

    /// Number of entries in the log.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn entry_position(entry: &Document) -> Option<Position> {
    entry.get_timestamp("ts").ok().map(Position::from)
}

impl OplogSource for MemoryOplog {
    fn tail(&self, filter: TailFilter) -> BoxFuture<'_, DocumentStream> {
        Box::pin(async move {
            let failed = self
                .inner
                .failing_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(RiverError::source_msg("tail", "injected failure"));
            }
            self.inner.tail_opens.fetch_add(1, Ordering::SeqCst);

            let generation = self.inner.lock().generation;
            let from = filter.from;
            let inner = self.inner.clone();

            let tail = stream::unfold((inner, 0usize), move |(inner, mut next)| async move {
                loop {
                    let notified = inner.appended.notified();
                    tokio::pin!(notified);
                    // Register before checking so an append in between is not missed.
                    notified.as_mut().enable();

                    let found = {
                        let state = inner.lock();
                        if state.generation != generation {
                            return None;
                        }
                        let mut found = None;
                        while next < state.entries.len() {
                            let entry = &state.entries[next];
                            next += 1;
                            let in_range = match (from, entry_position(entry)) {
                                (Some(from), Some(position)) => position >= from,
                                _ => true,
                            };
                            if in_range {
                                found = Some(entry.clone());
                                break;
                            }
                        }
                        found
                    };

                    if let Some(entry) = found {
                        return Some((Ok(entry), (inner.clone(), next)));
                    }
                    notified.await;
                }
            });

            Ok(tail.boxed())
        })
    }

    fn scan(&self, database: String, collection: String) -> BoxFuture<'_, DocumentStream> {
        Box::pin(async move {
            let namespace = format!("{}.{}", database, collection);
            let documents = self
                .inner
                .lock()
                .collections
                .get(&namespace)
                .cloned()
                .unwrap_or_default();
            Ok(stream::iter(documents.into_iter().map(Ok)).boxed())
        })
    }
}

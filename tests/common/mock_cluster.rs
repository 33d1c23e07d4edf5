//! Mocks for election tests.
//!
//! [`RecordingWorker`] implements `WorkerControl` on top of real sink
//! settings and records every start/stop the coordinator issues.
//! [`StealingSink`] lets a test overwrite the lease holder right after a
//! claim lands, simulating another instance winning the race.

use bson::Document;
use oplog_river::settings::LEASE_HOLDER_KEY;
use oplog_river::sink::BoxFuture;
use oplog_river::{Lease, MemorySink, Sink, SinkSettings, WorkerControl};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A start or stop issued to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

pub struct RecordingWorker<K: Sink> {
    settings: SinkSettings<K>,
    commands: Mutex<Vec<Command>>,
    active: AtomicBool,
}

impl<K: Sink> RecordingWorker<K> {
    pub fn new(sink: Arc<K>) -> Arc<Self> {
        Arc::new(Self {
            settings: SinkSettings::new(sink),
            commands: Mutex::new(Vec::new()),
            active: AtomicBool::new(false),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn last_command(&self) -> Option<Command> {
        self.commands.lock().unwrap().last().copied()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }
}

impl<K: Sink> WorkerControl for RecordingWorker<K> {
    fn start(&self) {
        self.commands.lock().unwrap().push(Command::Start);
        self.active.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.commands.lock().unwrap().push(Command::Stop);
        self.active.store(false, Ordering::SeqCst);
    }

    fn lease(&self) -> BoxFuture<'_, Lease> {
        Box::pin(self.settings.lease())
    }

    fn set_lease(&self, lease: Lease) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.settings.set_lease(&lease).await })
    }
}

/// Wraps a [`MemorySink`]; when armed, the next holder write is immediately
/// replaced by `thief`.
pub struct StealingSink {
    inner: Arc<MemorySink>,
    thief: Mutex<Option<String>>,
}

impl StealingSink {
    pub fn new(inner: Arc<MemorySink>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            thief: Mutex::new(None),
        })
    }

    pub fn steal_next_claim(&self, thief: &str) {
        *self.thief.lock().unwrap() = Some(thief.to_string());
    }
}

impl Sink for StealingSink {
    fn insert(&self, id: String, document: Document) -> BoxFuture<'_, ()> {
        self.inner.insert(id, document)
    }

    fn update(&self, id: String, document: Document) -> BoxFuture<'_, ()> {
        self.inner.update(id, document)
    }

    fn remove(&self, id: String) -> BoxFuture<'_, ()> {
        self.inner.remove(id)
    }

    fn get_setting(&self, key: &'static str) -> BoxFuture<'_, Option<serde_json::Value>> {
        self.inner.get_setting(key)
    }

    fn set_setting(&self, key: &'static str, value: serde_json::Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.inner.set_setting(key, value).await?;
            if key == LEASE_HOLDER_KEY {
                let thief = self.thief.lock().unwrap().take();
                if let Some(thief) = thief {
                    self.inner.put_setting(LEASE_HOLDER_KEY, serde_json::json!(thief));
                }
            }
            Ok(())
        })
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Activity gates.
//!
//! One writer (the worker) flips a gate; the background loops hold
//! receivers and park on them. Setting a gate to the value it already has
//! wakes nobody.

use std::time::Duration;
use tokio::sync::watch;

/// A single-writer boolean that loops can wait on.
#[derive(Debug)]
pub struct ActivityGate {
    tx: watch::Sender<bool>,
}

impl Default for ActivityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityGate {
    /// A closed (inactive) gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Open or close the gate. Returns whether the value changed.
    pub fn set(&self, active: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        })
    }

    pub fn is_active(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Park until `gate` opens.
///
/// Returns `false` when shutdown was requested or the gate's owner is gone.
pub(crate) async fn wait_active(
    gate: &mut watch::Receiver<bool>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown_rx.borrow_and_update() {
        return false;
    }
    tokio::select! {
        biased;
        _ = shutdown_rx.wait_for(|stop| *stop) => false,
        active = gate.wait_for(|active| *active) => active.is_ok(),
    }
}

/// Sleep for `delay` unless shutdown comes first.
///
/// Returns `false` when interrupted by shutdown.
pub(crate) async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_rx.wait_for(|stop| *stop) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reports_changes_only() {
        let gate = ActivityGate::new();
        assert!(!gate.is_active());
        assert!(gate.set(true));
        assert!(!gate.set(true));
        assert!(gate.is_active());
        assert!(gate.set(false));
        assert!(!gate.is_active());
    }

    #[test]
    fn test_redundant_set_does_not_notify() {
        let gate = ActivityGate::new();
        let mut rx = gate.subscribe();
        gate.set(false);
        assert!(!rx.has_changed().unwrap());
        gate.set(true);
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();
        gate.set(true);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_wait_active_wakes_on_open() {
        let gate = ActivityGate::new();
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut rx = gate.subscribe();

        let waiter = tokio::spawn(async move { wait_active(&mut rx, &mut shutdown_rx).await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        gate.set(true);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_active_returns_on_shutdown() {
        let gate = ActivityGate::new();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut rx = gate.subscribe();

        let waiter = tokio::spawn(async move { wait_active(&mut rx, &mut shutdown_rx).await });
        shutdown_tx.send(true).unwrap();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        assert!(sleep_or_shutdown(Duration::from_secs(5), &mut shutdown_rx).await);

        shutdown_tx.send(true).unwrap();
        assert!(!sleep_or_shutdown(Duration::from_secs(5), &mut shutdown_rx).await);
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lease-based leader election.
//!
//! Every tick an instance reads the lease from the sink. If the lease has
//! expired, or is already ours, we write `{holder: us, renewed_at: now}` and
//! read it back. We lead for this tick only when the write succeeded and the
//! read-back names us; otherwise we follow.
//!
//! ```text
//!   read lease ──► expired or ours? ──no──► follower ──► worker.stop()
//!                        │
//!                       yes
//!                        ▼
//!                  write {us, now} ──err──► follower
//!                        │
//!                        ▼
//!                  read back == us? ──no──► follower (lost the race)
//!                        │
//!                       yes
//!                        ▼
//!                     leader ──► worker.start()
//! ```
//!
//! This is mutual exclusion by lease, not consensus. Around expiry, or under
//! clock skew, two instances can both lead for up to one tick; the applier's
//! idempotent writes make that overlap converge.

use super::clock::Clock;
use super::identity::Identity;
use super::types::Role;
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::metrics;
use crate::settings::Lease;
use crate::worker::gate::sleep_or_shutdown;
use crate::worker::WorkerControl;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Drives a worker from the lease held in shared storage.
pub struct ClusterCoordinator<W> {
    identity: Identity,
    worker: Arc<W>,
    clock: Arc<dyn Clock>,
    lease_ttl: Duration,
    tick_interval: Duration,
    jitter_min: Duration,
    jitter_max: Duration,
    role_tx: watch::Sender<Role>,
}

impl<W: WorkerControl> ClusterCoordinator<W> {
    pub fn new(
        config: &ClusterConfig,
        identity: Identity,
        worker: Arc<W>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (role_tx, _role_rx) = watch::channel(Role::Follower);
        Self {
            identity,
            worker,
            clock,
            lease_ttl: config.lease_ttl_duration(),
            tick_interval: config.tick_interval_duration(),
            jitter_min: config.jitter_min_duration(),
            jitter_max: config.jitter_max_duration(),
            role_tx,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Role decided by the last tick.
    pub fn role(&self) -> Role {
        *self.role_tx.borrow()
    }

    pub fn role_receiver(&self) -> watch::Receiver<Role> {
        self.role_tx.subscribe()
    }

    /// Run one election round and drive the worker accordingly.
    pub async fn tick(&self) -> Role {
        let now = self.clock.now();
        let role = match self.contend(now).await {
            Ok(true) => Role::Leader,
            Ok(false) => Role::Follower,
            Err(e) => {
                metrics::record_election_error();
                warn!(error = %e, "Election tick failed, following");
                Role::Follower
            }
        };

        match role {
            Role::Leader => self.worker.start(),
            Role::Follower => self.worker.stop(),
        }
        self.publish(role);
        role
    }

    /// Claim or renew when allowed. `Ok(true)` when we hold the lease.
    async fn contend(&self, now: DateTime<Utc>) -> Result<bool> {
        let lease = self.worker.lease().await?;
        let ours = lease.is_held_by(self.identity.as_str());

        if !ours && !lease.is_expired(now, self.lease_ttl) {
            trace!(holder = ?lease.holder, renewed_at = %lease.renewed_at, "Lease held elsewhere");
            return Ok(false);
        }

        let kind = if ours { "renew" } else { "claim" };
        let claim = Lease::new(self.identity.as_str(), now);
        if let Err(e) = self.worker.set_lease(claim).await {
            metrics::record_lease_write(kind, false);
            return Err(e);
        }
        metrics::record_lease_write(kind, true);

        // Another instance may have claimed the same expired lease between
        // our read and our write.
        let current = self.worker.lease().await?;
        if !current.is_held_by(self.identity.as_str()) {
            debug!(holder = ?current.holder, "Lost lease race");
            return Ok(false);
        }
        Ok(true)
    }

    fn publish(&self, role: Role) {
        let changed = self.role_tx.send_if_modified(|current| {
            if *current == role {
                false
            } else {
                *current = role;
                true
            }
        });
        if changed {
            info!(role = %role, "Role changed");
            metrics::record_role_change(role.as_str());
            metrics::set_leader(role.is_leader());
        }
    }

    fn startup_jitter(&self) -> Duration {
        let min = self.jitter_min.as_millis() as u64;
        let max = self.jitter_max.as_millis() as u64;
        if max <= min {
            return self.jitter_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Tick until shutdown, starting after a random jitter.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let span = info_span!("election", identity = %self.identity);

        async move {
            let jitter = self.startup_jitter();
            debug!(jitter_ms = jitter.as_millis() as u64, "Waiting before first election");
            if !sleep_or_shutdown(jitter, &mut shutdown_rx).await {
                return;
            }

            info!(
                lease_ttl_ms = self.lease_ttl.as_millis() as u64,
                tick_ms = self.tick_interval.as_millis() as u64,
                "Starting election loop"
            );

            let mut timer = tokio::time::interval(self.tick_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }

                    _ = timer.tick() => {
                        self.tick().await;
                    }
                }
            }

            metrics::set_leader(false);
            info!("Election loop stopped");
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::clock::ManualClock;
    use crate::sink::{BoxFuture, MemorySink};
    use crate::settings::SinkSettings;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeWorker {
        settings: SinkSettings<MemorySink>,
        active: AtomicBool,
    }

    impl FakeWorker {
        fn new(sink: Arc<MemorySink>) -> Arc<Self> {
            Arc::new(Self {
                settings: SinkSettings::new(sink),
                active: AtomicBool::new(false),
            })
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
    }

    impl WorkerControl for FakeWorker {
        fn start(&self) {
            self.active.store(true, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.active.store(false, Ordering::SeqCst);
        }

        fn lease(&self) -> BoxFuture<'_, Lease> {
            Box::pin(self.settings.lease())
        }

        fn set_lease(&self, lease: Lease) -> BoxFuture<'_, ()> {
            Box::pin(async move { self.settings.set_lease(&lease).await })
        }
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn node(
        id: &str,
        sink: &Arc<MemorySink>,
        clock: &Arc<ManualClock>,
    ) -> (Arc<FakeWorker>, ClusterCoordinator<FakeWorker>) {
        let worker = FakeWorker::new(sink.clone());
        let clock: Arc<dyn Clock> = clock.clone();
        let coordinator = ClusterCoordinator::new(
            &ClusterConfig::default(),
            Identity::new(id),
            worker.clone(),
            clock,
        );
        (worker, coordinator)
    }

    #[tokio::test]
    async fn test_claims_vacant_lease() {
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (worker, coordinator) = node("a", &sink, &clock);

        assert_eq!(coordinator.tick().await, Role::Leader);
        assert!(worker.is_active());
        assert_eq!(coordinator.role(), Role::Leader);
        assert_eq!(sink.setting("master_id"), Some(serde_json::json!("a")));
        assert_eq!(
            sink.setting("master_since"),
            Some(serde_json::json!("2024-06-01T12:00:00.000Z"))
        );
    }

    #[tokio::test]
    async fn test_live_lease_held_elsewhere() {
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (_, a) = node("a", &sink, &clock);
        let (worker_b, b) = node("b", &sink, &clock);

        assert_eq!(a.tick().await, Role::Leader);
        clock.advance(Duration::from_secs(5));
        assert_eq!(b.tick().await, Role::Follower);
        assert!(!worker_b.is_active());
        assert_eq!(sink.setting("master_id"), Some(serde_json::json!("a")));
    }

    #[tokio::test]
    async fn test_renewal_keeps_leadership() {
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (worker, a) = node("a", &sink, &clock);

        for _ in 0..30 {
            assert_eq!(a.tick().await, Role::Leader);
            clock.advance(Duration::from_secs(1));
        }
        assert!(worker.is_active());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (_, a) = node("a", &sink, &clock);
        let (worker_b, b) = node("b", &sink, &clock);

        assert_eq!(a.tick().await, Role::Leader);
        clock.advance(Duration::from_secs(11));
        assert_eq!(b.tick().await, Role::Leader);
        assert!(worker_b.is_active());

        // The old leader notices on its next tick.
        assert_eq!(a.tick().await, Role::Follower);
    }

    #[tokio::test]
    async fn test_exactly_ttl_is_not_expired() {
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (_, a) = node("a", &sink, &clock);
        let (_, b) = node("b", &sink, &clock);

        a.tick().await;
        clock.advance(Duration::from_secs(10));
        assert_eq!(b.tick().await, Role::Follower);
    }

    #[tokio::test]
    async fn test_unreadable_lease_stops_worker() {
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (worker, a) = node("a", &sink, &clock);

        assert_eq!(a.tick().await, Role::Leader);
        sink.set_settings_unavailable(true);
        assert_eq!(a.tick().await, Role::Follower);
        assert!(!worker.is_active());

        sink.set_settings_unavailable(false);
        assert_eq!(a.tick().await, Role::Leader);
    }

    #[tokio::test]
    async fn test_role_receiver_sees_changes() {
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (_, a) = node("a", &sink, &clock);
        let mut rx = a.role_receiver();

        a.tick().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Role::Leader);

        a.tick().await;
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_jitter_within_bounds() {
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (_, a) = node("a", &sink, &clock);
        for _ in 0..100 {
            let jitter = a.startup_jitter();
            assert!(jitter >= Duration::from_millis(100));
            assert!(jitter <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_elects_and_stops_on_shutdown() {
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (worker, a) = node("a", &sink, &clock);
        let a = Arc::new(a);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = {
            let a = a.clone();
            tokio::spawn(async move { a.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(worker.is_active());
        assert_eq!(a.role(), Role::Leader);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }
}

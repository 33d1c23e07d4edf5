// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint and lease persistence in the sink's settings area.
//!
//! Both live next to the index, so a fresh index starts with no checkpoint
//! and no leader.
//!
//! # Keys
//!
//! | Key | Value |
//! |-----|-------|
//! | `last_ts` | checkpoint, packed position `time << 32 \| increment` |
//! | `master_id` | lease holder identity |
//! | `master_since` | lease renewal time, RFC 3339 |
//!
//! ## Checkpoint Semantics
//!
//! The checkpoint is the position of the **last successfully applied**
//! record. On restart we tail from the checkpoint inclusive, so that record
//! is seen once more and re-applied idempotently.
//!
//! ```text
//! read entry P → apply to sink → persist checkpoint P
//!                (crash here = re-read P, idempotent)
//! ```
//!
//! The checkpoint never moves backwards. [`SinkSettings`] keeps a high-water
//! mark and ignores positions at or below it.

use crate::error::Result;
use crate::metrics;
use crate::record::Position;
use crate::sink::Sink;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const CHECKPOINT_KEY: &str = "last_ts";
pub const LEASE_HOLDER_KEY: &str = "master_id";
pub const LEASE_SINCE_KEY: &str = "master_since";

/// A time-bounded leadership claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Identity of the holder. `None` when nobody ever claimed it.
    pub holder: Option<String>,
    /// Last renewal. The epoch when absent or unreadable.
    pub renewed_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(holder: impl Into<String>, renewed_at: DateTime<Utc>) -> Self {
        Self {
            holder: Some(holder.into()),
            renewed_at,
        }
    }

    /// The lease nobody holds.
    pub fn vacant() -> Self {
        Self {
            holder: None,
            renewed_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// More than `ttl` has passed since the last renewal.
    ///
    /// A renewal in the future (clock skew) is not expired.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - self.renewed_at).to_std() {
            Ok(elapsed) => elapsed > ttl,
            Err(_) => false,
        }
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder.as_deref() == Some(identity)
    }
}

/// Decode a stored checkpoint.
///
/// Integers are packed positions. Floats come from deployments that stored
/// the packed value as a double and are truncated.
pub fn decode_checkpoint(value: &Value) -> Option<Position> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Position::from_u64),
        Value::String(s) => s.parse::<u64>().ok().map(Position::from_u64),
        _ => None,
    }
}

/// Typed access to the sink's settings area.
pub struct SinkSettings<K> {
    sink: Arc<K>,
    high_water: Mutex<Option<Position>>,
}

impl<K: Sink> SinkSettings<K> {
    pub fn new(sink: Arc<K>) -> Self {
        Self {
            sink,
            high_water: Mutex::new(None),
        }
    }

    pub fn sink(&self) -> &Arc<K> {
        &self.sink
    }

    /// Read the stored checkpoint.
    ///
    /// An unreadable value is logged and treated as no checkpoint, which
    /// replays the log from the start.
    pub async fn checkpoint(&self) -> Result<Option<Position>> {
        let Some(value) = self.sink.get_setting(CHECKPOINT_KEY).await? else {
            return Ok(None);
        };
        let position = decode_checkpoint(&value);
        if position.is_none() {
            warn!(value = %value, "Ignoring unreadable checkpoint");
        }
        Ok(position)
    }

    /// Reload the high-water mark from the sink.
    ///
    /// Keeps the higher of the stored and in-memory positions and returns it.
    pub async fn refresh(&self) -> Result<Option<Position>> {
        let stored = self.checkpoint().await?;
        let mut high_water = self.high_water.lock().await;
        *high_water = (*high_water).max(stored);
        Ok(*high_water)
    }

    /// Highest position persisted by this process or loaded by `refresh`.
    pub async fn high_water(&self) -> Option<Position> {
        *self.high_water.lock().await
    }

    /// Persist `position` if it is beyond the high-water mark.
    ///
    /// Returns whether a write happened.
    pub async fn advance_checkpoint(&self, position: Position) -> Result<bool> {
        let mut high_water = self.high_water.lock().await;
        if matches!(*high_water, Some(current) if current >= position) {
            return Ok(false);
        }

        if let Err(e) = self
            .sink
            .set_setting(CHECKPOINT_KEY, Value::from(position.as_u64()))
            .await
        {
            metrics::record_checkpoint_failure();
            return Err(e);
        }

        *high_water = Some(position);
        metrics::set_checkpoint(position.time);
        debug!(position = %position, "Checkpoint advanced");
        Ok(true)
    }

    /// Read the current lease.
    pub async fn lease(&self) -> Result<Lease> {
        let holder = self
            .sink
            .get_setting(LEASE_HOLDER_KEY)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|h| !h.is_empty());

        let renewed_at = self
            .sink
            .get_setting(LEASE_SINCE_KEY)
            .await?
            .and_then(|v| v.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()))
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Ok(Lease { holder, renewed_at })
    }

    /// Write the lease: holder first, then renewal time.
    pub async fn set_lease(&self, lease: &Lease) -> Result<()> {
        let holder = lease.holder.clone().unwrap_or_default();
        self.sink
            .set_setting(LEASE_HOLDER_KEY, Value::from(holder))
            .await?;
        let since = lease.renewed_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        self.sink
            .set_setting(LEASE_SINCE_KEY, Value::from(since))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use chrono::TimeZone;
    use serde_json::json;

    fn settings() -> (Arc<MemorySink>, SinkSettings<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (sink.clone(), SinkSettings::new(sink))
    }

    #[test]
    fn test_decode_checkpoint() {
        let pos = Position::new(1_700_000_000, 9);
        assert_eq!(decode_checkpoint(&json!(pos.as_u64())), Some(pos));
        let whole = Position::new(1_700_000_000, 0);
        assert_eq!(decode_checkpoint(&json!(whole.as_u64() as f64)), Some(whole));
        assert_eq!(decode_checkpoint(&json!(pos.as_u64().to_string())), Some(pos));
        assert_eq!(decode_checkpoint(&json!(-1.0)), None);
        assert_eq!(decode_checkpoint(&json!(true)), None);
    }

    #[tokio::test]
    async fn test_fresh_sink_has_no_checkpoint() {
        let (_, settings) = settings();
        assert_eq!(settings.checkpoint().await.unwrap(), None);
        assert_eq!(settings.refresh().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreadable_checkpoint_is_none() {
        let (sink, settings) = settings();
        sink.put_setting(CHECKPOINT_KEY, json!({ "weird": true }));
        assert_eq!(settings.checkpoint().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_advance_is_monotonic() {
        let (sink, settings) = settings();
        let p1 = Position::new(10, 1);
        let p2 = Position::new(10, 2);

        assert!(settings.advance_checkpoint(p2).await.unwrap());
        assert!(!settings.advance_checkpoint(p1).await.unwrap());
        assert!(!settings.advance_checkpoint(p2).await.unwrap());
        assert_eq!(sink.setting(CHECKPOINT_KEY), Some(json!(p2.as_u64())));
        assert_eq!(settings.checkpoint().await.unwrap(), Some(p2));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_high_water() {
        let (sink, settings) = settings();
        sink.set_settings_unavailable(true);
        assert!(settings.advance_checkpoint(Position::new(5, 0)).await.is_err());
        assert_eq!(settings.high_water().await, None);

        sink.set_settings_unavailable(false);
        assert!(settings.advance_checkpoint(Position::new(5, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_adopts_stored_checkpoint() {
        let (sink, settings) = settings();
        settings.advance_checkpoint(Position::new(5, 0)).await.unwrap();

        // Another leader moved it further meanwhile.
        sink.put_setting(CHECKPOINT_KEY, json!(Position::new(9, 0).as_u64()));
        assert_eq!(settings.refresh().await.unwrap(), Some(Position::new(9, 0)));
        assert!(!settings.advance_checkpoint(Position::new(7, 0)).await.unwrap());
        assert_eq!(sink.setting(CHECKPOINT_KEY), Some(json!(Position::new(9, 0).as_u64())));
    }

    #[tokio::test]
    async fn test_refresh_never_lowers() {
        let (sink, settings) = settings();
        settings.advance_checkpoint(Position::new(9, 0)).await.unwrap();
        sink.put_setting(CHECKPOINT_KEY, json!(Position::new(3, 0).as_u64()));
        assert_eq!(settings.refresh().await.unwrap(), Some(Position::new(9, 0)));
    }

    #[tokio::test]
    async fn test_vacant_lease() {
        let (_, settings) = settings();
        let lease = settings.lease().await.unwrap();
        assert_eq!(lease, Lease::vacant());
    }

    #[tokio::test]
    async fn test_lease_roundtrip() {
        let (sink, settings) = settings();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        settings.set_lease(&Lease::new("node-a", at)).await.unwrap();

        assert_eq!(sink.setting(LEASE_HOLDER_KEY), Some(json!("node-a")));
        assert_eq!(sink.setting(LEASE_SINCE_KEY), Some(json!("2026-03-01T12:00:00.000Z")));
        assert_eq!(settings.lease().await.unwrap(), Lease::new("node-a", at));
    }

    #[tokio::test]
    async fn test_lease_since_keeps_milliseconds() {
        let (sink, settings) = settings();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 9).unwrap() + chrono::Duration::milliseconds(750);
        settings.set_lease(&Lease::new("node-a", at)).await.unwrap();

        assert_eq!(sink.setting(LEASE_SINCE_KEY), Some(json!("2026-03-01T12:00:09.750Z")));
        assert_eq!(settings.lease().await.unwrap().renewed_at, at);
    }

    #[tokio::test]
    async fn test_whole_second_since_still_reads() {
        let (sink, settings) = settings();
        sink.put_setting(LEASE_HOLDER_KEY, json!("node-a"));
        sink.put_setting(LEASE_SINCE_KEY, json!("2026-03-01T12:00:00Z"));
        let lease = settings.lease().await.unwrap();
        assert_eq!(lease.renewed_at, Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_unparsable_since_is_epoch() {
        let (sink, settings) = settings();
        sink.put_setting(LEASE_HOLDER_KEY, json!("node-a"));
        sink.put_setting(LEASE_SINCE_KEY, json!("yesterday"));
        let lease = settings.lease().await.unwrap();
        assert!(lease.is_held_by("node-a"));
        assert_eq!(lease.renewed_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_lease_expiry() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let lease = Lease::new("node-a", at);
        let ttl = Duration::from_secs(10);

        assert!(!lease.is_expired(at, ttl));
        assert!(!lease.is_expired(at + chrono::Duration::seconds(10), ttl));
        assert!(lease.is_expired(at + chrono::Duration::seconds(11), ttl));
        // Renewal ahead of our clock.
        assert!(!lease.is_expired(at - chrono::Duration::seconds(30), ttl));
        assert!(Lease::vacant().is_expired(at, ttl));
    }
}

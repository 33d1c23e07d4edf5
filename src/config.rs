// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the river.
//!
//! Configuration is passed explicitly to [`River::new()`](crate::River::new)
//! and to the adapters. It can be built programmatically, read from a JSON
//! file, or assembled from the environment by [`RiverConfig::load()`].
//!
//! # Quick Start
//!
//! ```rust
//! use oplog_river::config::RiverConfig;
//!
//! let config = RiverConfig::for_testing("shop", "orders");
//! assert_eq!(config.namespace(), "shop.orders");
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! RiverConfig
//! ├── source: SourceConfig      # MongoDB address, database, collection
//! ├── sink: SinkConfig          # Elasticsearch URLs, index, type, version
//! ├── river: RiverSettings      # skip_initial_import
//! ├── cluster: ClusterConfig    # lease TTL, tick, startup jitter
//! └── logging: LoggingConfig    # debug level switch
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "source": { "address": "mongodb://mongo:27017", "database": "shop", "collection": "orders" },
//!   "sink": { "url": "http://es1:9200;http://es2:9200", "index": "orders", "doc_type": "order", "version": 5 },
//!   "river": { "skip_initial_import": true },
//!   "cluster": { "lease_ttl": "10s", "tick_interval": "1s" }
//! }
//! ```
//!
//! # Environment Overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `OPLOG_RIVER_CONFIG` | path of a JSON file to start from |
//! | `RIVER_SOURCE_ADDRESS` | `source.address` |
//! | `RIVER_SOURCE_DATABASE` | `source.database` |
//! | `RIVER_SOURCE_COLLECTION` | `source.collection` |
//! | `RIVER_SINK_URL` | `sink.url` |
//! | `RIVER_SINK_INDEX` | `sink.index` |
//! | `RIVER_SINK_TYPE` | `sink.doc_type` |
//! | `RIVER_SINK_VERSION` | `sink.version` |
//! | `RIVER_SKIP_INITIAL_IMPORT` | `river.skip_initial_import` |
//! | `RIVER_CLUSTER_ENABLED` | `cluster.enabled` |
//! | `RIVER_DEBUG` | `logging.debug` |

use crate::error::{Result, RiverError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming a JSON config file.
pub const CONFIG_PATH_ENV: &str = "OPLOG_RIVER_CONFIG";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `River::new()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiverConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub river: RiverSettings,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RiverConfig {
    /// Create a minimal valid config for testing. Index and type are named
    /// after the collection.
    pub fn for_testing(database: &str, collection: &str) -> Self {
        Self {
            source: SourceConfig {
                database: database.to_string(),
                collection: collection.to_string(),
                ..Default::default()
            },
            sink: SinkConfig {
                index: collection.to_string(),
                doc_type: collection.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// The source namespace, `database.collection`.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.source.database, self.source.collection)
    }

    /// Check the configuration is usable before anything connects.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("source.address", &self.source.address),
            ("source.database", &self.source.database),
            ("source.collection", &self.source.collection),
            ("sink.url", &self.sink.url),
            ("sink.index", &self.sink.index),
            ("sink.doc_type", &self.sink.doc_type),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(RiverError::Config(format!("{} is empty", name)));
            }
        }

        if self.sink.urls().is_empty() {
            return Err(RiverError::Config("sink.url has no usable address".into()));
        }

        // Fails fast on unknown versions.
        self.sink.sink_version()?;

        let cluster = &self.cluster;
        if cluster.jitter_min_duration() > cluster.jitter_max_duration() {
            return Err(RiverError::Config(format!(
                "cluster.jitter_min ({}) exceeds cluster.jitter_max ({})",
                cluster.jitter_min, cluster.jitter_max
            )));
        }
        if cluster.enabled && cluster.tick_interval_duration() >= cluster.lease_ttl_duration() {
            return Err(RiverError::Config(format!(
                "cluster.tick_interval ({}) must be shorter than cluster.lease_ttl ({})",
                cluster.tick_interval, cluster.lease_ttl
            )));
        }
        Ok(())
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RiverError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| RiverError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Load from `$OPLOG_RIVER_CONFIG` (when set) and apply `RIVER_*`
    /// overrides from the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `RIVER_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RIVER_SOURCE_ADDRESS") {
            self.source.address = v;
        }
        if let Some(v) = lookup("RIVER_SOURCE_DATABASE") {
            self.source.database = v;
        }
        if let Some(v) = lookup("RIVER_SOURCE_COLLECTION") {
            self.source.collection = v;
        }
        if let Some(v) = lookup("RIVER_SINK_URL") {
            self.sink.url = v;
        }
        if let Some(v) = lookup("RIVER_SINK_INDEX") {
            self.sink.index = v;
        }
        if let Some(v) = lookup("RIVER_SINK_TYPE") {
            self.sink.doc_type = v;
        }
        if let Some(v) = lookup("RIVER_SINK_VERSION") {
            self.sink.version = v.trim().parse().map_err(|_| {
                RiverError::Config(format!("RIVER_SINK_VERSION is not a number: {}", v))
            })?;
        }
        if let Some(v) = lookup("RIVER_SKIP_INITIAL_IMPORT") {
            self.river.skip_initial_import = parse_bool("RIVER_SKIP_INITIAL_IMPORT", &v)?;
        }
        if let Some(v) = lookup("RIVER_CLUSTER_ENABLED") {
            self.cluster.enabled = parse_bool("RIVER_CLUSTER_ENABLED", &v)?;
        }
        if let Some(v) = lookup("RIVER_DEBUG") {
            self.logging.debug = parse_bool("RIVER_DEBUG", &v)?;
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RiverError::Config(format!(
            "{} is not a boolean: {}",
            name, other
        ))),
    }
}

fn parse_or(value: &str, default: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(default)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SourceConfig: MongoDB
// ═══════════════════════════════════════════════════════════════════════════════

/// Source store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// MongoDB connection string. Must point at a replica set member so the
    /// oplog exists.
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub collection: String,

    /// Server selection / connect timeout as a duration string (e.g., "15s").
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
}

fn default_address() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_connect_timeout() -> String {
    "15s".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            database: String::new(),
            collection: String::new(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl SourceConfig {
    pub fn connect_timeout_duration(&self) -> Duration {
        parse_or(&self.connect_timeout, Duration::from_secs(15))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SinkConfig: Elasticsearch
// ═══════════════════════════════════════════════════════════════════════════════

/// Sink adapter family, resolved once from [`SinkConfig::version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkVersion {
    /// 1.x: settings read back through `fields`
    V1,
    /// 2.x: same read path as 1.x
    V2,
    /// 3.x and 5.x: settings read back through `_source`
    V5,
}

/// Sink connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// One or more base URLs separated by `;`.
    #[serde(default = "default_sink_url")]
    pub url: String,

    #[serde(default)]
    pub index: String,

    /// Document type used in document paths.
    #[serde(default)]
    pub doc_type: String,

    /// Major version of the cluster (1, 2, 3 or 5).
    #[serde(default = "default_sink_version")]
    pub version: u32,

    /// Per-request timeout as a duration string (e.g., "10s").
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
}

fn default_sink_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_sink_version() -> u32 {
    5
}

fn default_request_timeout() -> String {
    "10s".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: default_sink_url(),
            index: String::new(),
            doc_type: String::new(),
            version: default_sink_version(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl SinkConfig {
    /// Base URLs, trimmed, empty entries dropped.
    pub fn urls(&self) -> Vec<String> {
        self.url
            .split(';')
            .map(|u| u.trim().trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Resolve the version selector.
    pub fn sink_version(&self) -> Result<SinkVersion> {
        match self.version {
            1 => Ok(SinkVersion::V1),
            2 => Ok(SinkVersion::V2),
            3 | 5 => Ok(SinkVersion::V5),
            other => Err(RiverError::UnsupportedSinkVersion(other.to_string())),
        }
    }

    pub fn request_timeout_duration(&self) -> Duration {
        parse_or(&self.request_timeout, Duration::from_secs(10))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RiverSettings: pipeline behaviour
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiverSettings {
    /// Skip the full-collection import when this instance becomes leader.
    #[serde(default)]
    pub skip_initial_import: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ClusterConfig: lease election
// ═══════════════════════════════════════════════════════════════════════════════

/// Lease election timings.
///
/// A lease is valid for `lease_ttl` after its last renewal. Every instance
/// evaluates the lease once per `tick_interval`, after an initial random
/// delay in `[jitter_min, jitter_max]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// When false the worker starts immediately and no lease is written.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_lease_ttl")]
    pub lease_ttl: String,

    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,

    #[serde(default = "default_jitter_min")]
    pub jitter_min: String,

    #[serde(default = "default_jitter_max")]
    pub jitter_max: String,
}

fn default_true() -> bool {
    true
}

fn default_lease_ttl() -> String {
    "10s".to_string()
}

fn default_tick_interval() -> String {
    "1s".to_string()
}

fn default_jitter_min() -> String {
    "100ms".to_string()
}

fn default_jitter_max() -> String {
    "300ms".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lease_ttl: default_lease_ttl(),
            tick_interval: default_tick_interval(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
        }
    }
}

impl ClusterConfig {
    pub fn lease_ttl_duration(&self) -> Duration {
        parse_or(&self.lease_ttl, Duration::from_secs(10))
    }

    pub fn tick_interval_duration(&self) -> Duration {
        parse_or(&self.tick_interval, Duration::from_secs(1))
    }

    pub fn jitter_min_duration(&self) -> Duration {
        parse_or(&self.jitter_min, Duration::from_millis(100))
    }

    pub fn jitter_max_duration(&self) -> Duration {
        parse_or(&self.jitter_max, Duration::from_millis(300))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LoggingConfig
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log at debug level when `RUST_LOG` is not set.
    #[serde(default)]
    pub debug: bool,
}

impl LoggingConfig {
    /// Filter directive used when `RUST_LOG` is absent.
    pub fn default_directive(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

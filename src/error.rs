// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the river.
//!
//! Errors are categorized by the collaborator they came from (the source
//! store, the sink) or by the stage that rejected the input.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Source` | Yes | MongoDB network errors, cursor loss, timeouts |
//! | `Sink` | Yes | Elasticsearch unreachable or write rejected |
//! | `Config` | No | Configuration invalid or missing |
//! | `UnsupportedSinkVersion` | No | Version selector has no adapter |
//! | `InvalidRecord` | No | Malformed oplog entry or document id |
//! | `InvalidState` | No | Engine state machine violation |
//!
//! # Retry Behavior
//!
//! Retryable errors make the tail and snapshot loops reconnect with backoff.
//! They never cause a record to be re-applied within the same run: a record
//! whose apply failed is only seen again after a restart re-tails from the
//! last checkpoint.

use thiserror::Error;

/// Result type alias for river operations.
pub type Result<T> = std::result::Result<T, RiverError>;

/// Errors that can occur while replicating.
#[derive(Error, Debug)]
pub enum RiverError {
    /// Source store (MongoDB) error.
    ///
    /// Occurs while connecting, tailing the oplog, or scanning the collection.
    #[error("Source error ({operation}): {message}")]
    Source {
        operation: String,
        message: String,
        #[source]
        source: Option<mongodb::error::Error>,
    },

    /// Sink (search index) error.
    ///
    /// Occurs when a document or settings write is rejected or the index
    /// cannot be reached. `status` carries the HTTP status when there was one.
    #[error("Sink error ({operation}): {message}")]
    Sink {
        operation: String,
        message: String,
        status: Option<u16>,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Invalid or missing configuration.
    ///
    /// Not retryable - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configured sink version has no adapter.
    #[error("Unsupported sink version: {0}")]
    UnsupportedSinkVersion(String),

    /// A log entry or document could not be turned into a change record.
    ///
    /// The entry is logged and skipped.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Engine state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., calling `start()` on an already-running engine).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl RiverError {
    /// Create a source error from a driver error.
    pub fn mongo(operation: impl Into<String>, source: mongodb::error::Error) -> Self {
        Self::Source {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a source error without an underlying driver error.
    pub fn source_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a sink error from an HTTP client error.
    pub fn http(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Sink {
            operation: operation.into(),
            message: source.to_string(),
            status: source.status().map(|s| s.as_u16()),
            source: Some(source),
        }
    }

    /// Create a sink error without an underlying client error.
    pub fn sink_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            operation: operation.into(),
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Create a sink error for a rejected HTTP response.
    pub fn sink_status(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Sink {
            operation: operation.into(),
            message: format!("HTTP {}: {}", status, body.into()),
            status: Some(status),
            source: None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source { .. } => true,
            Self::Sink { .. } => true,
            Self::Config(_) => false,
            Self::UnsupportedSinkVersion(_) => false,
            Self::InvalidRecord(_) => false,
            Self::InvalidState { .. } => false,
        }
    }
}

impl From<mongodb::error::Error> for RiverError {
    fn from(e: mongodb::error::Error) -> Self {
        Self::mongo("unknown", e)
    }
}

impl From<reqwest::Error> for RiverError {
    fn from(e: reqwest::Error) -> Self {
        Self::http("unknown", e)
    }
}

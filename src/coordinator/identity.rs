// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-process instance identity.
//!
//! Written into the lease as the holder. Two processes on the same host (or
//! a restarted process reusing a pid) still get distinct identities because
//! of the random component.

use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Hex SHA-256 of hostname, pid and a random nonce.
    pub fn generate() -> Self {
        Self::derive(&hostname(), std::process::id(), rand::random::<u64>())
    }

    /// Use a fixed identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    fn derive(host: &str, pid: u32, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update(b"-");
        hasher.update(pid.to_string().as_bytes());
        hasher.update(b"-");
        hasher.update(nonce.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

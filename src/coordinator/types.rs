// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine state and election role.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Running
//!    │                            │
//!    │ shutdown()                 │ shutdown()
//!    ↓                            ↓
//! Stopped ←─────────────── ShuttingDown
//!                                 │
//!                       (background task panicked)
//!                                 ↓
//!                              Failed
//! ```
//!
//! - **Created**: after `River::new()`. Nothing is running.
//! - **Running**: background loops spawned; the worker is driven by the
//!   election (or started directly when clustering is off).
//! - **ShuttingDown**: `shutdown()` called. In-flight applies finish.
//! - **Stopped**: every task exited cleanly.
//! - **Failed**: a task panicked; check the logs.

/// State of the river engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created but not started.
    ///
    /// Call [`start()`](super::River::start) to begin replicating.
    Created,

    /// Loops are running.
    Running,

    /// Shutting down gracefully.
    ShuttingDown,

    /// Shut down cleanly.
    Stopped,

    /// A background task died.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Outcome of the most recent election tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Holds the lease; the worker is active.
    Leader,
    /// Someone else holds the lease, or this tick could not confirm ours.
    Follower,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Leader => "leader",
            Role::Follower => "follower",
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

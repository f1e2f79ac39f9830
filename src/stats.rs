//! NAT handler statistics
//!
//! Word-sized atomic counters read by the platform's metrics pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic NAT statistics
#[derive(Debug, Default)]
pub struct NatStats {
    /// Sessions currently tracked
    active_sessions: AtomicU64,
    /// Sessions created over the handler's lifetime
    total_sessions: AtomicU64,
    /// Bytes copied through all flows, both directions
    total_bytes: AtomicU64,
    /// Flows that terminated with an error
    total_errors: AtomicU64,
}

impl NatStats {
    /// Create new statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session creation
    pub fn record_session_created(&self) {
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session removal (close, expiry, or eviction)
    pub fn record_session_removed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Add processed bytes
    pub fn add_bytes(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a flow error
    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Sessions currently tracked
    #[must_use]
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Sessions created over the handler's lifetime
    #[must_use]
    pub fn total_sessions_created(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }

    /// Total bytes processed
    #[must_use]
    pub fn total_bytes_processed(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Total flow errors
    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters
    #[must_use]
    pub fn snapshot(&self) -> NatStatsSnapshot {
        NatStatsSnapshot {
            active_sessions: self.active_sessions(),
            total_sessions_created: self.total_sessions_created(),
            total_bytes_processed: self.total_bytes_processed(),
            total_errors: self.total_errors(),
        }
    }
}

/// Snapshot of NAT statistics at a point in time
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NatStatsSnapshot {
    /// Sessions currently tracked
    pub active_sessions: u64,
    /// Sessions created over the handler's lifetime
    pub total_sessions_created: u64,
    /// Bytes copied through all flows
    pub total_bytes_processed: u64,
    /// Flows that terminated with an error
    pub total_errors: u64,
}

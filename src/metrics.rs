// =============================================================================
// SlideSync Room Sync Engine - Metrics Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Atomic counters for engine activity. No exporter is wired here; the
//   embedding server reads snapshots and publishes them however it likes.
//
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Engine activity counters
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total requests handled
    pub total_requests: AtomicU64,

    /// Currently registered sessions
    pub active_sessions: AtomicU64,

    /// Upstream events fanned out by the dispatcher
    pub events_dispatched: AtomicU64,

    /// List ops emitted across all responses
    pub ops_emitted: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub active_sessions: u64,
    pub events_dispatched: u64,
    pub ops_emitted: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            ops_emitted: self.ops_emitted.load(Ordering::Relaxed),
        }
    }
}

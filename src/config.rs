// =============================================================================
// SlideSync Room Sync Engine - Configuration Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Tunables for the per-session streaming engine: request limits, long-poll
//   timeouts, the per-session notification queue soft cap and idle session
//   reaping intervals.
//
// =============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum timeline events a list or subscription may request per room
    pub max_timeline_limit: usize,

    /// Timeline events delivered per room when a request does not say
    pub default_timeline_limit: usize,

    /// Long-poll wait when the request carries no timeout (milliseconds)
    pub default_timeout_ms: u64,

    /// Upper bound on any client-requested long-poll wait (milliseconds)
    pub max_timeout_ms: u64,

    /// Soft cap on the per-session update queue; overflow forces a resync
    pub session_queue_capacity: usize,

    /// Sessions idle for longer than this are reaped (seconds)
    pub idle_timeout_secs: u64,

    /// How often idle sessions are swept (seconds)
    pub cleanup_interval_secs: u64,

    /// Maximum number of lists a single request may declare
    pub max_lists: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_timeline_limit: 50,
            default_timeline_limit: 1,
            default_timeout_ms: 30_000,
            max_timeout_ms: 300_000,
            session_queue_capacity: 1024,
            idle_timeout_secs: 300,
            cleanup_interval_secs: 60,
            max_lists: 16,
        }
    }
}

impl EngineConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Resolve the effective long-poll budget for a request.
    pub fn clamp_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.default_timeout_ms)
            .min(self.max_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Resolve the effective per-room timeline limit for a request.
    pub fn clamp_timeline_limit(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_timeline_limit
        } else {
            requested.min(self.max_timeline_limit)
        }
    }
}

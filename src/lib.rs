// =============================================================================
// SlideSync Room Sync Engine - Library Crate
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Server-side engine of a sliding-window chat sync protocol. A user may be
//   joined to thousands of rooms; only a small window around what the client
//   is viewing is delivered in detail, patched incrementally with SYNC,
//   INSERT, DELETE and UPDATE deltas. The embedding server owns transport,
//   authentication and storage; this crate owns the caches, the dispatcher
//   and the per-session delta engines.
//
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use ruma::UserId;
use tracing::{debug, instrument};

pub mod cache;
pub mod config;
pub mod conn;
pub mod dispatcher;
pub mod error;
pub mod list;
pub mod metrics;
pub mod proto;
pub mod sort;
pub mod storage;
pub mod tracker;

pub use cache::{GlobalCache, JoinedRoomsLoader, RoomDataLoader, SortableRoom, UserCache, UserRoomData};
pub use config::EngineConfig;
pub use conn::{ConnId, ConnMap, ConnState};
pub use dispatcher::{Dispatcher, EventData, SessionUpdate};
pub use error::{Error, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use proto::{Request, RequestFilters, RequestList, Response, ResponseOp, Room, RoomSubscription, SliceRanges};
pub use sort::{SortKey, SORT_BY_NAME, SORT_BY_NOTIFICATION_COUNT, SORT_BY_RECENCY};
pub use storage::{LatestEvent, StateEvent, Storage};
pub use tracker::JoinedRoomsTracker;

/// Process-wide engine facade: global cache, dispatcher and session registry
/// behind one startup/serve lifecycle.
pub struct SyncEngine {
    config: EngineConfig,
    global_cache: Arc<GlobalCache>,
    dispatcher: Arc<Dispatcher>,
    conns: ConnMap,
    metrics: Arc<Metrics>,
}

impl SyncEngine {
    pub fn new(config: EngineConfig, store: Option<Arc<dyn Storage>>) -> Self {
        let global_cache = Arc::new(GlobalCache::new(store.clone()));
        let tracker = Arc::new(JoinedRoomsTracker::new());
        let metrics = Arc::new(Metrics::default());
        let dispatcher = Arc::new(Dispatcher::new(
            global_cache.clone(),
            tracker,
            store,
            metrics.clone(),
        ));
        Self {
            config,
            global_cache,
            dispatcher,
            conns: ConnMap::new(),
            metrics,
        }
    }

    /// Populate the global cache from storage. Must complete before any
    /// upstream poller is started.
    pub fn startup(&self) -> Result<()> {
        self.global_cache.startup()
    }

    /// The sink the upstream poll loops feed.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn global_cache(&self) -> &Arc<GlobalCache> {
        &self.global_cache
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Serve one client request on its session, creating the session on
    /// first contact.
    #[instrument(level = "debug", skip(self, req), fields(conn = %conn_id, user = %user_id))]
    pub async fn handle_incoming_request(
        &self,
        conn_id: &ConnId,
        user_id: &UserId,
        req: &Request,
    ) -> Result<Response> {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        let (conn, created) = self.conns.get_or_create(
            conn_id,
            user_id,
            &self.dispatcher,
            self.global_cache.clone(),
            &self.config,
        );
        if created {
            self.metrics.active_sessions.fetch_add(1, Ordering::Relaxed);
        }
        let response = conn.handle_incoming_request(req).await?;
        self.metrics
            .ops_emitted
            .fetch_add(response.ops.len() as u64, Ordering::Relaxed);
        Ok(response)
    }

    /// Reap sessions idle for longer than the configured timeout.
    pub fn cleanup_idle_connections(&self) -> usize {
        let removed = self.conns.cleanup_idle(self.config.idle_timeout(), &self.dispatcher);
        if removed > 0 {
            self.metrics
                .active_sessions
                .fetch_sub(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = self.conns.len(), "🧹 idle sessions cleaned up");
        }
        removed
    }
}

// =============================================================================
// SlideSync Room Sync Engine - Dispatcher Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Single-writer fan-out from the upstream sink to the caches and the live
//   sessions. For each event: the global cache is updated first, then every
//   joined user's cache, then every live session of those users is notified,
//   in that order. Sessions are addressed through a registry keyed by user so
//   no back-pointers exist between sessions and the dispatcher.
//
// Features:
//   • Event fan-out with per-event ordering guarantees
//   • Live membership maintenance from m.room.member state events
//   • Unread-count and account-data ingestion
//   • Lazy per-user cache creation
//
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};

use ruma::{OwnedRoomId, OwnedUserId, UserId};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{
    cache::{global::GlobalCache, user::UserCache},
    conn::{ConnId, ConnState},
    metrics::Metrics,
    storage::Storage,
    tracker::JoinedRoomsTracker,
};

/// Immutable message describing one upstream event, passed from the
/// dispatcher to caches and sessions.
#[derive(Debug, Clone)]
pub struct EventData {
    pub room_id: OwnedRoomId,
    pub event_type: String,
    pub state_key: Option<String>,
    /// Parsed view of the event content.
    pub content: Value,
    pub timestamp: u64,
    /// Monotone storage position of this event.
    pub event_nid: i64,
    /// The full event, as delivered to timelines.
    pub json: Value,
}

impl EventData {
    /// Build from a raw upstream event body.
    pub fn from_json(room_id: OwnedRoomId, json: Value, event_nid: i64) -> Self {
        let event_type = json
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let state_key = json
            .get("state_key")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        let content = json.get("content").cloned().unwrap_or(Value::Null);
        let timestamp = json
            .get("origin_server_ts")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Self {
            room_id,
            event_type,
            state_key,
            content,
            timestamp,
            event_nid,
            json,
        }
    }
}

/// One item on a session's update queue.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    Event(EventData),
    UnreadCounts {
        room_id: OwnedRoomId,
        notification_count: Option<u64>,
        highlight_count: Option<u64>,
    },
}

/// Fan-out hub between the upstream sink and the per-session engines.
pub struct Dispatcher {
    global_cache: Arc<GlobalCache>,
    tracker: Arc<JoinedRoomsTracker>,
    store: Option<Arc<dyn Storage>>,
    metrics: Arc<Metrics>,
    user_caches: RwLock<HashMap<OwnedUserId, Arc<UserCache>>>,
    sessions: RwLock<HashMap<OwnedUserId, Vec<Arc<ConnState>>>>,
}

impl Dispatcher {
    pub fn new(
        global_cache: Arc<GlobalCache>,
        tracker: Arc<JoinedRoomsTracker>,
        store: Option<Arc<dyn Storage>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            global_cache,
            tracker,
            store,
            metrics,
            user_caches: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<JoinedRoomsTracker> {
        &self.tracker
    }

    /// The user's cache, created lazily on first reference.
    pub fn user_cache(&self, user_id: &UserId) -> Arc<UserCache> {
        if let Some(cache) = self.user_caches.read().unwrap().get(user_id) {
            return cache.clone();
        }
        let mut caches = self.user_caches.write().unwrap();
        caches
            .entry(user_id.to_owned())
            .or_insert_with(|| Arc::new(UserCache::new(user_id.to_owned(), self.store.clone())))
            .clone()
    }

    /// Install a pre-built cache, e.g. one wired to fixture loaders.
    pub fn register_user_cache(&self, cache: Arc<UserCache>) {
        self.user_caches
            .write()
            .unwrap()
            .insert(cache.user_id().to_owned(), cache);
    }

    pub fn register_session(&self, conn: Arc<ConnState>) {
        let mut sessions = self.sessions.write().unwrap();
        let conns = sessions.entry(conn.user_id().to_owned()).or_default();
        conns.retain(|c| c.conn_id() != conn.conn_id());
        conns.push(conn);
    }

    pub fn unregister_session(&self, user_id: &UserId, conn_id: &ConnId) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(conns) = sessions.get_mut(user_id) {
            conns.retain(|c| c.conn_id() != conn_id);
            if conns.is_empty() {
                sessions.remove(user_id);
            }
        }
    }

    /// Fan one upstream event out. The global cache is updated before any
    /// user cache, and user caches before any session notification, so a
    /// session draining its queue always reads caches at least as new as the
    /// event it is processing.
    #[instrument(level = "debug", skip(self, ed), fields(room = %ed.room_id, nid = ed.event_nid))]
    pub fn on_new_event(&self, ed: EventData) {
        self.global_cache.on_new_event(&ed);

        // membership changes adjust the tracker before the fan-out set is read
        let mut leaver = None;
        if ed.event_type == "m.room.member" {
            if let (Some(state_key), Some(membership)) = (
                ed.state_key.as_deref(),
                ed.content.get("membership").and_then(Value::as_str),
            ) {
                if let Ok(target) = UserId::parse(state_key) {
                    match membership {
                        "join" => {
                            self.tracker.user_joined_room(&target, &ed.room_id);
                        }
                        "leave" | "ban" => {
                            self.tracker.user_left_room(&target, &ed.room_id);
                            leaver = Some(target);
                        }
                        _ => {}
                    }
                }
            }
        }

        let mut users = self.tracker.joined_users_for_room(&ed.room_id);
        // the leaving user still hears about their own leave event
        if let Some(leaver) = leaver {
            if !users.contains(&leaver) {
                users.push(leaver);
            }
        }

        {
            let caches = self.user_caches.read().unwrap();
            for user_id in &users {
                if let Some(cache) = caches.get(user_id) {
                    cache.on_new_event(&ed);
                }
            }
        }

        let sessions = self.sessions.read().unwrap();
        for user_id in &users {
            if let Some(conns) = sessions.get(user_id) {
                for conn in conns {
                    conn.enqueue(SessionUpdate::Event(ed.clone()));
                }
            }
        }
        self.metrics.events_dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(users = users.len(), "🔄 event dispatched");
    }

    /// Ingest an upstream unread-notifications block for one user and room.
    pub fn on_unread_counts(
        &self,
        user_id: &UserId,
        room_id: &OwnedRoomId,
        notification_count: Option<u64>,
        highlight_count: Option<u64>,
    ) {
        self.user_cache(user_id)
            .on_unread_counts(room_id, notification_count, highlight_count);
        let sessions = self.sessions.read().unwrap();
        if let Some(conns) = sessions.get(user_id) {
            for conn in conns {
                conn.enqueue(SessionUpdate::UnreadCounts {
                    room_id: room_id.clone(),
                    notification_count,
                    highlight_count,
                });
            }
        }
    }

    /// Ingest an account-data event for one user.
    pub fn on_account_data(&self, user_id: &UserId, event_type: &str, content: &Value) {
        let changed = self.user_cache(user_id).on_account_data(event_type, content);
        if !changed.is_empty() {
            debug!(user = %user_id, rooms = changed.len(), "📋 DM set updated");
        }
    }
}

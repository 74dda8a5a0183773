// =============================================================================
// SlideSync Room Sync Engine - User Cache Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Per-user overlay over the global cache: DM flags from `m.direct` account
//   data, unread and highlight counts from the upstream unread-notifications
//   blocks, and a lazily loaded timeline tail per room. The tail keeps the
//   largest limit any request has asked for this session.
//
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};
use serde_json::Value;
use tracing::warn;

use crate::{dispatcher::EventData, storage::Storage};

/// Per-(user, room) overlay data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserRoomData {
    /// Tail of the room timeline, oldest first.
    pub timeline: Vec<Value>,
    pub notification_count: u64,
    pub highlight_count: u64,
    pub is_dm: bool,
}

/// Test seam for the lazy timeline load. Production uses the storage path;
/// fixtures implement this (closures qualify) to skip the database.
pub trait RoomDataLoader: Send + Sync {
    fn load_room_data(
        &self,
        load_position: i64,
        room_ids: &[OwnedRoomId],
        max_timeline_events: usize,
    ) -> HashMap<OwnedRoomId, UserRoomData>;
}

impl<F> RoomDataLoader for F
where
    F: Fn(i64, &[OwnedRoomId], usize) -> HashMap<OwnedRoomId, UserRoomData> + Send + Sync,
{
    fn load_room_data(
        &self,
        load_position: i64,
        room_ids: &[OwnedRoomId],
        max_timeline_events: usize,
    ) -> HashMap<OwnedRoomId, UserRoomData> {
        self(load_position, room_ids, max_timeline_events)
    }
}

#[derive(Debug, Default)]
struct CachedRoom {
    data: UserRoomData,
    /// Largest timeline limit served so far; 0 means the timeline has never
    /// been loaded.
    timeline_limit: usize,
}

/// Per-user cache, created on first subscription and written only by the
/// dispatcher.
pub struct UserCache {
    user_id: OwnedUserId,
    store: Option<Arc<dyn Storage>>,
    loader: Option<Box<dyn RoomDataLoader>>,
    rooms: RwLock<HashMap<OwnedRoomId, CachedRoom>>,
}

impl UserCache {
    pub fn new(user_id: OwnedUserId, store: Option<Arc<dyn Storage>>) -> Self {
        Self {
            user_id,
            store,
            loader: None,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Override the timeline load with a fixture.
    pub fn set_room_data_loader(&mut self, loader: impl RoomDataLoader + 'static) {
        self.loader = Some(Box::new(loader));
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn is_dm(&self, room_id: &RoomId) -> bool {
        self.rooms
            .read()
            .unwrap()
            .get(room_id)
            .map(|c| c.data.is_dm)
            .unwrap_or(false)
    }

    /// Current overlay for one room; defaults when nothing is cached.
    pub fn room_data(&self, room_id: &RoomId) -> UserRoomData {
        self.rooms
            .read()
            .unwrap()
            .get(room_id)
            .map(|c| c.data.clone())
            .unwrap_or_default()
    }

    /// Timelines for the given rooms, at most `max_timeline_events` each.
    /// Rooms whose cached tail is long enough are served from memory; the
    /// rest are fetched and cached.
    pub fn lazy_load_timelines(
        &self,
        load_position: i64,
        room_ids: &[OwnedRoomId],
        max_timeline_events: usize,
    ) -> HashMap<OwnedRoomId, UserRoomData> {
        let mut result = HashMap::new();
        let mut missing = Vec::new();
        {
            let rooms = self.rooms.read().unwrap();
            for room_id in room_ids {
                match rooms.get(room_id) {
                    Some(cached) if cached.timeline_limit >= max_timeline_events => {
                        let mut data = cached.data.clone();
                        if data.timeline.len() > max_timeline_events {
                            data.timeline =
                                data.timeline[data.timeline.len() - max_timeline_events..].to_vec();
                        }
                        result.insert(room_id.clone(), data);
                    }
                    _ => missing.push(room_id.clone()),
                }
            }
        }
        if missing.is_empty() {
            return result;
        }
        let loaded = self.fetch_room_data(load_position, &missing, max_timeline_events);
        let mut rooms = self.rooms.write().unwrap();
        for room_id in missing {
            let fetched = loaded.get(&room_id).cloned().unwrap_or_default();
            let cached = rooms.entry(room_id.clone()).or_default();
            cached.data.timeline = fetched.timeline;
            cached.timeline_limit = cached.timeline_limit.max(max_timeline_events);
            result.insert(room_id, cached.data.clone());
        }
        result
    }

    fn fetch_room_data(
        &self,
        load_position: i64,
        room_ids: &[OwnedRoomId],
        max_timeline_events: usize,
    ) -> HashMap<OwnedRoomId, UserRoomData> {
        if let Some(loader) = &self.loader {
            return loader.load_room_data(load_position, room_ids, max_timeline_events);
        }
        let Some(store) = &self.store else {
            return HashMap::new();
        };
        room_ids
            .iter()
            .map(|room_id| {
                let timeline = store
                    .recent_events(room_id, load_position, max_timeline_events)
                    .unwrap_or_else(|err| {
                        warn!(user = %self.user_id, room = %room_id, error = %err, "failed to load timeline");
                        Vec::new()
                    });
                (
                    room_id.clone(),
                    UserRoomData {
                        timeline,
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    /// Dispatcher callback: append a live event to any loaded timeline tail.
    pub fn on_new_event(&self, ed: &EventData) {
        let mut rooms = self.rooms.write().unwrap();
        if let Some(cached) = rooms.get_mut(&ed.room_id) {
            if cached.timeline_limit > 0 {
                cached.data.timeline.push(ed.json.clone());
                let excess = cached.data.timeline.len().saturating_sub(cached.timeline_limit);
                if excess > 0 {
                    cached.data.timeline.drain(..excess);
                }
            }
        }
    }

    /// Dispatcher callback for upstream unread-notifications blocks.
    pub fn on_unread_counts(
        &self,
        room_id: &RoomId,
        notification_count: Option<u64>,
        highlight_count: Option<u64>,
    ) {
        let mut rooms = self.rooms.write().unwrap();
        let cached = rooms.entry(room_id.to_owned()).or_default();
        if let Some(count) = notification_count {
            cached.data.notification_count = count;
        }
        if let Some(count) = highlight_count {
            cached.data.highlight_count = count;
        }
    }

    /// Dispatcher callback for account data. Only `m.direct` is interesting:
    /// its content maps users to room lists, and the union of all values is
    /// the DM set. Returns the rooms whose flag flipped.
    pub fn on_account_data(&self, event_type: &str, content: &Value) -> Vec<OwnedRoomId> {
        if event_type != "m.direct" {
            return Vec::new();
        }
        let mut dm_rooms = HashSet::new();
        if let Some(map) = content.as_object() {
            for room_ids in map.values() {
                let Some(room_ids) = room_ids.as_array() else {
                    continue;
                };
                for room_id in room_ids {
                    if let Some(Ok(room_id)) = room_id.as_str().map(RoomId::parse) {
                        dm_rooms.insert(room_id);
                    }
                }
            }
        }
        let mut changed = Vec::new();
        let mut rooms = self.rooms.write().unwrap();
        for (room_id, cached) in rooms.iter_mut() {
            let is_dm = dm_rooms.contains(room_id);
            if cached.data.is_dm != is_dm {
                cached.data.is_dm = is_dm;
                changed.push(room_id.clone());
            }
        }
        for room_id in dm_rooms {
            if !rooms.contains_key(&room_id) {
                rooms.insert(
                    room_id.clone(),
                    CachedRoom {
                        data: UserRoomData {
                            is_dm: true,
                            ..Default::default()
                        },
                        timeline_limit: 0,
                    },
                );
                changed.push(room_id);
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ruma::{room_id, user_id};
    use serde_json::json;

    use super::*;

    fn cache_with_counted_loader(calls: Arc<AtomicUsize>) -> UserCache {
        let mut cache = UserCache::new(user_id!("@alice:localhost").to_owned(), None);
        cache.set_room_data_loader(
            move |_pos: i64, room_ids: &[OwnedRoomId], limit: usize| {
                calls.fetch_add(1, Ordering::SeqCst);
                room_ids
                    .iter()
                    .map(|id| {
                        (
                            id.clone(),
                            UserRoomData {
                                timeline: (0..limit).map(|i| json!({"i": i})).collect(),
                                ..Default::default()
                            },
                        )
                    })
                    .collect()
            },
        );
        cache
    }

    #[test]
    fn test_lazy_load_caches_per_room() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache_with_counted_loader(calls.clone());
        let rooms = vec![room_id!("!a:localhost").to_owned()];

        let first = cache.lazy_load_timelines(1, &rooms, 3);
        assert_eq!(first[&rooms[0]].timeline.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // a second request at the same or smaller limit is served from memory
        let second = cache.lazy_load_timelines(1, &rooms, 2);
        assert_eq!(second[&rooms[0]].timeline.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // asking for more than was ever loaded goes back to the loader
        cache.lazy_load_timelines(1, &rooms, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_live_events_append_to_loaded_tails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache_with_counted_loader(calls);
        let room = room_id!("!a:localhost");
        cache.lazy_load_timelines(1, &[room.to_owned()], 2);

        for nid in 0..4 {
            cache.on_new_event(&EventData::from_json(
                room.to_owned(),
                json!({"type": "m.room.message", "content": {"nid": nid}, "origin_server_ts": nid}),
                nid,
            ));
        }
        let data = cache.room_data(room);
        assert_eq!(data.timeline.len(), 2);
        assert_eq!(data.timeline[1]["content"]["nid"], 3);
    }

    #[test]
    fn test_unread_counts() {
        let cache = UserCache::new(user_id!("@alice:localhost").to_owned(), None);
        let room = room_id!("!a:localhost");
        cache.on_unread_counts(room, Some(4), Some(1));
        cache.on_unread_counts(room, None, Some(2));
        let data = cache.room_data(room);
        assert_eq!(data.notification_count, 4);
        assert_eq!(data.highlight_count, 2);
    }

    #[test]
    fn test_m_direct_union_parse_and_flip() {
        let cache = UserCache::new(user_id!("@alice:localhost").to_owned(), None);
        let dm_a = room_id!("!dm_a:localhost");
        let dm_b = room_id!("!dm_b:localhost");

        let mut changed = cache.on_account_data(
            "m.direct",
            &json!({
                "@bob:localhost": ["!dm_a:localhost"],
                "@carol:localhost": ["!dm_a:localhost", "!dm_b:localhost"],
            }),
        );
        changed.sort();
        assert_eq!(changed, vec![dm_a.to_owned(), dm_b.to_owned()]);
        assert!(cache.is_dm(dm_a));
        assert!(cache.is_dm(dm_b));

        // removing a room from m.direct clears its flag
        let changed = cache.on_account_data("m.direct", &json!({"@bob:localhost": ["!dm_a:localhost"]}));
        assert_eq!(changed, vec![dm_b.to_owned()]);
        assert!(!cache.is_dm(dm_b));
        assert!(cache.is_dm(dm_a));
    }

    #[test]
    fn test_other_account_data_ignored() {
        let cache = UserCache::new(user_id!("@alice:localhost").to_owned(), None);
        let changed = cache.on_account_data("m.push_rules", &json!({"global": {}}));
        assert!(changed.is_empty());
    }
}

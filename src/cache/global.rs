// =============================================================================
// SlideSync Room Sync Engine - Global Cache Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Process-wide canonical room summaries. Inserts are done by the upstream
//   ingest path via the dispatcher, reads by session request threads; many
//   sessions share the same keys, so everything goes through one
//   reader-writer lock and readers always get defensive copies.
//
// =============================================================================

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ruma::{OwnedRoomId, RoomId, UserId};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    dispatcher::EventData,
    storage::Storage,
    Error, Result,
};

/// Canonical room summary. At most one exists per room id; it is mutated only
/// by the dispatcher and never deleted once seen.
#[derive(Debug, Clone, PartialEq)]
pub struct SortableRoom {
    pub room_id: OwnedRoomId,
    pub name: String,
    pub last_message_timestamp: u64,
    pub last_event_json: Option<Value>,
    pub is_encrypted: bool,
}

impl SortableRoom {
    pub fn new(room_id: OwnedRoomId) -> Self {
        Self {
            room_id,
            name: String::new(),
            last_message_timestamp: 0,
            last_event_json: None,
            is_encrypted: false,
        }
    }
}

/// Test seam for the initial joined-rooms load. Production uses the storage
/// path; fixtures implement this (closures qualify) to skip the database.
pub trait JoinedRoomsLoader: Send + Sync {
    fn load_joined_rooms(&self, user_id: &UserId) -> Result<(i64, Vec<SortableRoom>)>;
}

impl<F> JoinedRoomsLoader for F
where
    F: Fn(&UserId) -> Result<(i64, Vec<SortableRoom>)> + Send + Sync,
{
    fn load_joined_rooms(&self, user_id: &UserId) -> Result<(i64, Vec<SortableRoom>)> {
        self(user_id)
    }
}

/// Process-wide room summary cache.
pub struct GlobalCache {
    rooms: RwLock<HashMap<OwnedRoomId, SortableRoom>>,
    store: Option<Arc<dyn Storage>>,
    loader: Option<Box<dyn JoinedRoomsLoader>>,
}

impl GlobalCache {
    pub fn new(store: Option<Arc<dyn Storage>>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            store,
            loader: None,
        }
    }

    /// Override the joined-rooms load with a fixture.
    pub fn set_joined_rooms_loader(&mut self, loader: impl JoinedRoomsLoader + 'static) {
        self.loader = Some(Box::new(loader));
    }

    /// Defensive copy of one room; callers must not expect shared mutation.
    pub fn load_room(&self, room_id: &RoomId) -> Option<SortableRoom> {
        self.rooms.read().unwrap().get(room_id).cloned()
    }

    pub fn assign_room(&self, room: SortableRoom) {
        self.rooms
            .write()
            .unwrap()
            .insert(room.room_id.clone(), room);
    }

    /// Snapshot the user's joined rooms together with the position the
    /// snapshot is valid at.
    pub fn load_joined_rooms(&self, user_id: &UserId) -> Result<(i64, Vec<SortableRoom>)> {
        if let Some(loader) = &self.loader {
            return loader.load_joined_rooms(user_id);
        }
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::Internal("global cache has no storage".to_owned()))?;
        let pos = store.latest_event_nid()?;
        let joined = store.joined_rooms_after_position(user_id, pos)?;
        let rooms = joined
            .iter()
            .filter_map(|room_id| self.load_room(room_id))
            .collect();
        Ok((pos, rooms))
    }

    /// Current state events matching `[event_type, state_key]` pairs, where
    /// `"*"` matches any state key. Failures are demoted to an empty result.
    pub fn load_room_state(
        &self,
        room_id: &RoomId,
        load_position: i64,
        required_state: &[[String; 2]],
    ) -> Vec<Value> {
        if required_state.is_empty() {
            return Vec::new();
        }
        let Some(store) = &self.store else {
            return Vec::new();
        };
        let mut wanted: HashMap<&str, Vec<&str>> = HashMap::new();
        for [event_type, state_key] in required_state {
            wanted
                .entry(event_type.as_str())
                .or_default()
                .push(state_key.as_str());
        }
        let event_types: Vec<String> = wanted.keys().map(|t| (*t).to_owned()).collect();
        let state = match store.room_state_after_event_position(room_id, load_position, &event_types)
        {
            Ok(state) => state,
            Err(err) => {
                warn!(room = %room_id, pos = load_position, error = %err, "failed to load room state");
                return Vec::new();
            }
        };
        state
            .into_iter()
            .filter(|ev| {
                wanted
                    .get(ev.event_type.as_str())
                    .is_some_and(|keys| keys.iter().any(|k| *k == "*" || *k == ev.state_key))
            })
            .map(|ev| ev.json)
            .collect()
    }

    /// Populate the cache by reading the store. Must complete before any
    /// upstream poller starts, otherwise an event can be counted both in the
    /// snapshot and in the live stream.
    pub fn startup(&self) -> Result<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::Internal("global cache has no storage".to_owned()))?;
        let latest = store
            .select_latest_event_in_all_rooms()
            .map_err(|err| Error::Storage(format!("loading latest events: {err}")))?;
        let room_count = latest.len();
        for ev in latest {
            let mut room = SortableRoom::new(ev.room_id.clone());
            room.last_message_timestamp = ev
                .json
                .get("origin_server_ts")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            room.last_event_json = Some(ev.json);
            self.assign_room(room);
        }
        let types = [
            "m.room.name".to_owned(),
            "m.room.canonical_alias".to_owned(),
            "m.room.encryption".to_owned(),
        ];
        let state = store
            .current_state_events_in_all_rooms(&types)
            .map_err(|err| Error::Storage(format!("loading state events: {err}")))?;
        for (room_id, events) in state {
            let Some(mut room) = self.load_room(&room_id) else {
                return Err(Error::Internal(format!(
                    "room {room_id} has state but no latest event"
                )));
            };
            for ev in &events {
                match (ev.event_type.as_str(), ev.state_key.as_str()) {
                    ("m.room.name", "") => {
                        room.name = content_str(&ev.json, "name");
                    }
                    ("m.room.canonical_alias", "") if room.name.is_empty() => {
                        room.name = content_str(&ev.json, "alias");
                    }
                    ("m.room.encryption", "") => {
                        room.is_encrypted = true;
                    }
                    _ => {}
                }
            }
            self.assign_room(room);
            debug!(room = %room_id, "🏠 room summary loaded");
        }
        info!(rooms = room_count, "✅ global cache populated");
        Ok(())
    }

    /// Dispatcher callback for each upstream event.
    pub fn on_new_event(&self, ed: &EventData) {
        let mut rooms = self.rooms.write().unwrap();
        let room = rooms
            .entry(ed.room_id.clone())
            .or_insert_with(|| SortableRoom::new(ed.room_id.clone()));
        if ed.state_key.as_deref() == Some("") {
            match ed.event_type.as_str() {
                "m.room.name" => {
                    room.name = ed
                        .content
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned();
                }
                "m.room.canonical_alias" if room.name.is_empty() => {
                    room.name = ed
                        .content
                        .get("alias")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned();
                }
                "m.room.encryption" => {
                    room.is_encrypted = true;
                }
                _ => {}
            }
        }
        room.last_message_timestamp = ed.timestamp;
        room.last_event_json = Some(ed.json.clone());
    }
}

fn content_str(event_json: &Value, field: &str) -> String {
    event_json
        .get("content")
        .and_then(|c| c.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use ruma::room_id;
    use serde_json::json;

    use super::*;

    fn name_event(room_id: &RoomId, name: &str, ts: u64, nid: i64) -> EventData {
        EventData::from_json(
            room_id.to_owned(),
            json!({
                "type": "m.room.name",
                "state_key": "",
                "content": {"name": name},
                "origin_server_ts": ts,
            }),
            nid,
        )
    }

    #[test]
    fn test_load_room_returns_defensive_copy() {
        let cache = GlobalCache::new(None);
        let room_id = room_id!("!a:localhost");
        cache.assign_room(SortableRoom::new(room_id.to_owned()));

        let mut copy = cache.load_room(room_id).unwrap();
        copy.name = "mutated".to_owned();
        assert_eq!(cache.load_room(room_id).unwrap().name, "");
    }

    #[test]
    fn test_on_new_event_updates_name_and_timestamp() {
        let cache = GlobalCache::new(None);
        let room_id = room_id!("!a:localhost");
        cache.on_new_event(&name_event(room_id, "Ops Room", 1000, 1));

        let room = cache.load_room(room_id).unwrap();
        assert_eq!(room.name, "Ops Room");
        assert_eq!(room.last_message_timestamp, 1000);
        assert!(room.last_event_json.is_some());
    }

    #[test]
    fn test_canonical_alias_is_a_fallback_only() {
        let cache = GlobalCache::new(None);
        let room_id = room_id!("!a:localhost");
        let alias = EventData::from_json(
            room_id.to_owned(),
            json!({
                "type": "m.room.canonical_alias",
                "state_key": "",
                "content": {"alias": "#ops:localhost"},
                "origin_server_ts": 1000,
            }),
            1,
        );
        cache.on_new_event(&alias);
        assert_eq!(cache.load_room(room_id).unwrap().name, "#ops:localhost");

        cache.on_new_event(&name_event(room_id, "Ops Room", 2000, 2));
        cache.on_new_event(&EventData::from_json(
            room_id.to_owned(),
            json!({
                "type": "m.room.canonical_alias",
                "state_key": "",
                "content": {"alias": "#other:localhost"},
                "origin_server_ts": 3000,
            }),
            3,
        ));
        assert_eq!(cache.load_room(room_id).unwrap().name, "Ops Room");
    }

    #[test]
    fn test_encryption_event_flips_flag() {
        let cache = GlobalCache::new(None);
        let room_id = room_id!("!a:localhost");
        cache.assign_room(SortableRoom::new(room_id.to_owned()));
        cache.on_new_event(&EventData::from_json(
            room_id.to_owned(),
            json!({
                "type": "m.room.encryption",
                "state_key": "",
                "content": {"algorithm": "m.megolm.v1.aes-sha2"},
                "origin_server_ts": 1000,
            }),
            1,
        ));
        assert!(cache.load_room(room_id).unwrap().is_encrypted);
    }

    #[test]
    fn test_timestamp_follows_arrival_order() {
        let cache = GlobalCache::new(None);
        let room_id = room_id!("!a:localhost");
        let msg = |ts, nid| {
            EventData::from_json(
                room_id.to_owned(),
                json!({"type": "m.room.message", "content": {}, "origin_server_ts": ts}),
                nid,
            )
        };
        cache.on_new_event(&msg(1000, 1));
        cache.on_new_event(&msg(2000, 2));
        assert_eq!(cache.load_room(room_id).unwrap().last_message_timestamp, 2000);
    }

    #[test]
    fn test_loader_override_bypasses_storage() {
        let mut cache = GlobalCache::new(None);
        let room = SortableRoom::new(room_id!("!a:localhost").to_owned());
        let snapshot = vec![room.clone()];
        cache.set_joined_rooms_loader(
            move |_: &UserId| -> crate::Result<(i64, Vec<SortableRoom>)> {
                Ok((7, snapshot.clone()))
            },
        );

        let (pos, rooms) = cache
            .load_joined_rooms(<&UserId>::try_from("@alice:localhost").unwrap())
            .unwrap();
        assert_eq!(pos, 7);
        assert_eq!(rooms, vec![room]);
    }
}

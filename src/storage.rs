// =============================================================================
// SlideSync Room Sync Engine - Storage Interface Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Read-only view of the persistent event/state store. The engine never
//   writes through this interface; the upstream ingest pipeline owns all
//   mutation. Production wires this to the database layer, tests wire it to
//   in-memory fixtures.
//
// =============================================================================

use std::collections::HashMap;

use ruma::{OwnedRoomId, RoomId, UserId};
use serde_json::Value;

use crate::Result;

/// A state event as returned by the store.
#[derive(Debug, Clone)]
pub struct StateEvent {
    pub event_type: String,
    pub state_key: String,
    pub json: Value,
}

/// The most recent event in a room, as returned by the store.
#[derive(Debug, Clone)]
pub struct LatestEvent {
    pub room_id: OwnedRoomId,
    pub json: Value,
}

/// Read-only storage collaborator.
///
/// Positions are event NIDs: monotone integers assigned by the store to each
/// ingested event. They double as the opaque cursor handed to clients.
pub trait Storage: Send + Sync {
    /// NID of the most recently ingested event.
    fn latest_event_nid(&self) -> Result<i64>;

    /// Rooms the user was joined to as of `pos`.
    fn joined_rooms_after_position(&self, user_id: &UserId, pos: i64) -> Result<Vec<OwnedRoomId>>;

    /// Current state events of the given types in one room as of `pos`.
    fn room_state_after_event_position(
        &self,
        room_id: &RoomId,
        pos: i64,
        event_types: &[String],
    ) -> Result<Vec<StateEvent>>;

    /// The most recent event of every known room.
    fn select_latest_event_in_all_rooms(&self) -> Result<Vec<LatestEvent>>;

    /// Current state events of the given types across all rooms.
    fn current_state_events_in_all_rooms(
        &self,
        event_types: &[String],
    ) -> Result<HashMap<OwnedRoomId, Vec<StateEvent>>>;

    /// The `limit` most recent timeline events of a room as of `pos`, oldest
    /// first.
    fn recent_events(&self, room_id: &RoomId, pos: i64, limit: usize) -> Result<Vec<Value>>;
}

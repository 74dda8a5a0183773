// =============================================================================
// SlideSync Room Sync Engine - Membership Tracker Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   In-memory membership set: which users are joined to which rooms, plus the
//   inverse index the dispatcher fans out over. Writes come from the
//   dispatcher only; the upstream sink keeps it live after startup.
//
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};

/// Membership set with both directions indexed.
#[derive(Debug, Default)]
pub struct JoinedRoomsTracker {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    user_to_rooms: HashMap<OwnedUserId, HashSet<OwnedRoomId>>,
    room_to_users: HashMap<OwnedRoomId, HashSet<OwnedUserId>>,
}

impl JoinedRoomsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this membership was not already known.
    pub fn user_joined_room(&self, user_id: &UserId, room_id: &RoomId) -> bool {
        let mut inner = self.inner.write().unwrap();
        let fresh = inner
            .user_to_rooms
            .entry(user_id.to_owned())
            .or_default()
            .insert(room_id.to_owned());
        inner
            .room_to_users
            .entry(room_id.to_owned())
            .or_default()
            .insert(user_id.to_owned());
        fresh
    }

    pub fn user_left_room(&self, user_id: &UserId, room_id: &RoomId) {
        let mut inner = self.inner.write().unwrap();
        if let Some(rooms) = inner.user_to_rooms.get_mut(user_id) {
            rooms.remove(room_id);
        }
        if let Some(users) = inner.room_to_users.get_mut(room_id) {
            users.remove(user_id);
        }
    }

    pub fn joined_rooms_for_user(&self, user_id: &UserId) -> Vec<OwnedRoomId> {
        let inner = self.inner.read().unwrap();
        inner
            .user_to_rooms
            .get(user_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn joined_users_for_room(&self, room_id: &RoomId) -> Vec<OwnedUserId> {
        let inner = self.inner.read().unwrap();
        inner
            .room_to_users
            .get(room_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }
}

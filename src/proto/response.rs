// =============================================================================
// SlideSync Room Sync Engine - Response Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Response shapes: the four list ops as an internally tagged variant, and
//   the wire Room with every field optional so unchanged data stays off the
//   wire. Ops are grouped by list index; the client applies each list's ops
//   in emission order.
//
// =============================================================================

use std::collections::BTreeMap;

use ruma::OwnedRoomId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One response, covering every list the session tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Opaque cursor to echo in the next request.
    pub pos: i64,

    /// Per-list total size after filtering, not the tracked size.
    pub counts: Vec<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<ResponseOp>,

    /// Event deliveries for explicitly subscribed rooms.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rooms: BTreeMap<OwnedRoomId, Room>,

    /// Full room payloads for subscriptions made (or changed) this request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub room_subscriptions: BTreeMap<OwnedRoomId, Room>,
}

/// A single list delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ResponseOp {
    /// Full content for a range: initial load or re-sync.
    #[serde(rename = "SYNC")]
    Sync {
        list: usize,
        /// The requested range; `rooms` holds only the indices that exist.
        range: [i64; 2],
        rooms: Vec<Room>,
    },

    #[serde(rename = "INSERT")]
    Insert { list: usize, index: i64, room: Room },

    #[serde(rename = "DELETE")]
    Delete { list: usize, index: i64 },

    #[serde(rename = "UPDATE")]
    Update { list: usize, index: i64, room: Room },
}

impl ResponseOp {
    pub fn list(&self) -> usize {
        match self {
            Self::Sync { list, .. }
            | Self::Insert { list, .. }
            | Self::Delete { list, .. }
            | Self::Update { list, .. } => *list,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Self::Sync { .. } => "SYNC",
            Self::Insert { .. } => "INSERT",
            Self::Delete { .. } => "DELETE",
            Self::Update { .. } => "UPDATE",
        }
    }
}

/// Wire form of a room. Fields are omitted when unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: OwnedRoomId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeline: Vec<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_state: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_count: Option<u64>,
}

impl Room {
    pub fn new(room_id: OwnedRoomId) -> Self {
        Self {
            room_id,
            name: None,
            timeline: Vec::new(),
            required_state: Vec::new(),
            highlight_count: None,
            notification_count: None,
        }
    }
}

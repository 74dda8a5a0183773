// =============================================================================
// SlideSync Room Sync Engine - Cache Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   The two cache layers: the process-wide canonical room summaries and the
//   per-user overlay of DM flags, unread counts and lazily loaded timelines.
//
// =============================================================================

pub mod global;
pub mod user;

pub use global::{GlobalCache, JoinedRoomsLoader, SortableRoom};
pub use user::{RoomDataLoader, UserCache, UserRoomData};

// =============================================================================
// SlideSync Room Sync Engine - Sort Key Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Registry of recognized sort keys and the composite comparator used by
//   sorted room lists. Keys compose lexicographically in the order the client
//   lists them; RoomID ascending breaks all remaining ties so every list is a
//   total order.
//
// =============================================================================

use std::cmp::Ordering;

use crate::{list::ListEntry, Error, Result};

pub const SORT_BY_RECENCY: &str = "by_recency";
pub const SORT_BY_NAME: &str = "by_name";
pub const SORT_BY_NOTIFICATION_COUNT: &str = "by_notification_count";

/// A recognized sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Last message timestamp, newest first
    Recency,
    /// Room name, lexicographic
    Name,
    /// Notification count, highest first
    NotificationCount,
}

impl SortKey {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            SORT_BY_RECENCY => Ok(Self::Recency),
            SORT_BY_NAME => Ok(Self::Name),
            SORT_BY_NOTIFICATION_COUNT => Ok(Self::NotificationCount),
            other => Err(Error::InvalidRequest(format!("unknown sort key '{other}'"))),
        }
    }

    pub fn parse_all(names: &[String]) -> Result<Vec<Self>> {
        names.iter().map(|n| Self::parse(n)).collect()
    }
}

/// Compare two list entries under a composite sort.
pub fn compare(keys: &[SortKey], a: &ListEntry, b: &ListEntry) -> Ordering {
    for key in keys {
        let ord = match key {
            SortKey::Recency => b
                .room
                .last_message_timestamp
                .cmp(&a.room.last_message_timestamp),
            SortKey::Name => a.room.name.cmp(&b.room.name),
            SortKey::NotificationCount => b.notification_count.cmp(&a.notification_count),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.room.room_id.cmp(&b.room.room_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::global::SortableRoom;

    fn entry(room_id: &str, ts: u64, name: &str, notifs: u64) -> ListEntry {
        let room_id = <&ruma::RoomId>::try_from(room_id).unwrap().to_owned();
        ListEntry {
            room: SortableRoom {
                name: name.to_owned(),
                last_message_timestamp: ts,
                ..SortableRoom::new(room_id)
            },
            notification_count: notifs,
            highlight_count: 0,
        }
    }

    #[test]
    fn test_parse_known_keys() {
        assert_eq!(SortKey::parse("by_recency").unwrap(), SortKey::Recency);
        assert_eq!(SortKey::parse("by_name").unwrap(), SortKey::Name);
        assert_eq!(
            SortKey::parse("by_notification_count").unwrap(),
            SortKey::NotificationCount
        );
    }

    #[test]
    fn test_parse_unknown_key_is_client_error() {
        let err = SortKey::parse("by_vibes").unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("by_vibes"));
    }

    #[test]
    fn test_recency_newest_first() {
        let newer = entry("!a:localhost", 200, "A", 0);
        let older = entry("!b:localhost", 100, "B", 0);
        assert_eq!(
            compare(&[SortKey::Recency], &newer, &older),
            Ordering::Less
        );
    }

    #[test]
    fn test_room_id_breaks_ties() {
        let a = entry("!a:localhost", 100, "Same", 0);
        let b = entry("!b:localhost", 100, "Same", 0);
        assert_eq!(compare(&[SortKey::Recency], &a, &b), Ordering::Less);
        assert_eq!(compare(&[SortKey::Name], &b, &a), Ordering::Greater);
    }

    #[test]
    fn test_composite_keys_apply_in_order() {
        let quiet_new = entry("!a:localhost", 200, "A", 0);
        let loud_old = entry("!b:localhost", 100, "B", 5);
        assert_eq!(
            compare(&[SortKey::NotificationCount, SortKey::Recency], &loud_old, &quiet_new),
            Ordering::Less
        );
        assert_eq!(
            compare(&[SortKey::Recency, SortKey::NotificationCount], &quiet_new, &loud_old),
            Ordering::Less
        );
    }
}

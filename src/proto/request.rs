// =============================================================================
// SlideSync Room Sync Engine - Request Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Client request shapes. One request per HTTP round-trip: list definitions
//   with tracked ranges, explicit room subscriptions, and the opaque position
//   cursor from the previous response. Sort and filter fields are sticky: a
//   subsequent request that omits them keeps the list's previous values.
//
// =============================================================================

use std::collections::BTreeMap;

use ruma::OwnedRoomId;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One client request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub lists: Vec<RequestList>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub room_subscriptions: BTreeMap<OwnedRoomId, RoomSubscription>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsubscribe_rooms: Vec<OwnedRoomId>,

    /// Opaque cursor from the previous response; absent on the first request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<i64>,

    /// Long-poll timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Client-supplied definition of one list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestList {
    /// Sort keys, composed lexicographically. Empty means "keep the previous
    /// sort", or `by_recency` for a list seen for the first time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<String>,

    #[serde(default, skip_serializing_if = "SliceRanges::is_empty")]
    pub ranges: SliceRanges,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<RequestFilters>,

    /// Per-room payload settings applied to rooms delivered through this list.
    #[serde(default, skip_serializing_if = "RoomSubscription::is_default")]
    pub room_subscription: RoomSubscription,
}

/// Recognized list filters. Unknown keys are a request error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_dm: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_encrypted: Option<bool>,
}

impl RequestFilters {
    pub fn matches(&self, is_dm: bool, is_encrypted: bool) -> bool {
        if let Some(want) = self.is_dm {
            if want != is_dm {
                return false;
            }
        }
        if let Some(want) = self.is_encrypted {
            if want != is_encrypted {
                return false;
            }
        }
        true
    }
}

/// Payload settings for a room: how much timeline and which state to deliver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSubscription {
    #[serde(default)]
    pub timeline_limit: usize,

    /// `[event_type, state_key]` pairs; `"*"` matches any state key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_state: Vec<[String; 2]>,
}

impl RoomSubscription {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Inclusive index ranges into a sorted filtered list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRanges(pub Vec<[i64; 2]>);

impl SliceRanges {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        for &[lo, hi] in &self.0 {
            if lo < 0 || hi < lo {
                return Err(Error::InvalidRequest(format!(
                    "malformed range [{lo},{hi}]"
                )));
            }
        }
        Ok(())
    }

    /// Whether `index` falls inside any tracked range.
    pub fn inside(&self, index: i64) -> bool {
        self.0.iter().any(|&[lo, hi]| lo <= index && index <= hi)
    }

    /// Greatest tracked index `<= index`, if any.
    pub fn upper_clamp(&self, index: i64) -> Option<i64> {
        self.0
            .iter()
            .filter(|&&[lo, _]| lo <= index)
            .map(|&[_, hi]| hi.min(index))
            .max()
    }

    /// Smallest tracked index `>= index`, if any.
    pub fn lower_clamp(&self, index: i64) -> Option<i64> {
        self.0
            .iter()
            .filter(|&&[_, hi]| hi >= index)
            .map(|&[lo, _]| lo.max(index))
            .min()
    }

    /// Whether any tracked index lies within `[lo, hi]` inclusive.
    pub fn intersects_span(&self, lo: i64, hi: i64) -> bool {
        self.0.iter().any(|&[rlo, rhi]| rlo <= hi && lo <= rhi)
    }

    /// Sub-ranges of `self` not covered by `prev`: the indices that became
    /// tracked with this request.
    pub fn subtract(&self, prev: &SliceRanges) -> Vec<[i64; 2]> {
        let mut covered = prev.0.clone();
        covered.sort_unstable_by_key(|r| r[0]);
        let mut fresh = Vec::new();
        for &[lo, hi] in &self.0 {
            let mut cursor = lo;
            for &[plo, phi] in &covered {
                if phi < cursor || plo > hi {
                    continue;
                }
                if plo > cursor {
                    fresh.push([cursor, plo - 1]);
                }
                cursor = cursor.max(phi + 1);
                if cursor > hi {
                    break;
                }
            }
            if cursor <= hi {
                fresh.push([cursor, hi]);
            }
        }
        fresh
    }

    pub fn iter(&self) -> impl Iterator<Item = [i64; 2]> + '_ {
        self.0.iter().copied()
    }
}

// =============================================================================
// SlideSync Room Sync Engine - Protocol Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Stable wire shapes: requests with sliced ranges, filters and room
//   subscriptions; responses carrying the four list ops and room payloads.
//
// =============================================================================

pub mod request;
pub mod response;

pub use request::{Request, RequestFilters, RequestList, RoomSubscription, SliceRanges};
pub use response::{Response, ResponseOp, Room};

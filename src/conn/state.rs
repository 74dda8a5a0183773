// =============================================================================
// SlideSync Room Sync Engine - Connection State Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Per-connection engine. Holds the filtered, sorted room lists with their
//   tracked ranges and the explicit room subscriptions, drains the update
//   queue the dispatcher feeds, and computes the minimal ordered delta that
//   reconciles the client's windows with server state. Requests with nothing
//   to say block until an update arrives or the long-poll budget runs out.
//
// Features:
//   • Initial SYNC seeding from the joined-rooms snapshot
//   • Incremental DELETE/INSERT/UPDATE deltas with window-edge clamping
//   • Sticky list parameters across requests
//   • Out-of-sync recovery via full rebuild when the update queue overflows
//
// =============================================================================

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};
use serde_json::Value;
use tokio::sync::{
    broadcast,
    broadcast::error::{RecvError, TryRecvError},
    Mutex,
};
use tracing::{debug, instrument, warn};

use super::ConnId;
use crate::{
    cache::{
        global::{GlobalCache, SortableRoom},
        user::UserCache,
    },
    config::EngineConfig,
    dispatcher::{EventData, SessionUpdate},
    list::{ListEntry, SortedRoomList},
    proto::{
        request::{Request, RequestFilters, RoomSubscription, SliceRanges},
        response::{Response, ResponseOp, Room},
    },
    sort::SortKey,
    Error, Result,
};

/// Server-side state of one client-declared list.
struct ListState {
    filters: RequestFilters,
    rooms: SortedRoomList,
    ranges: SliceRanges,
    /// List-level payload settings for rooms delivered through this list.
    subscription: RoomSubscription,
}

struct ConnStateInner {
    rx: broadcast::Receiver<SessionUpdate>,
    initialized: bool,
    out_of_sync: bool,
    load_position: i64,
    joined: HashSet<OwnedRoomId>,
    lists: Vec<ListState>,
    room_subscriptions: HashMap<OwnedRoomId, RoomSubscription>,
}

/// Response sections accumulated while a request is processed.
#[derive(Default)]
struct ResponseState {
    ops: Vec<ResponseOp>,
    rooms: BTreeMap<OwnedRoomId, Room>,
    room_subscriptions: BTreeMap<OwnedRoomId, Room>,
}

impl ResponseState {
    fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.rooms.is_empty() && self.room_subscriptions.is_empty()
    }
}

/// Per-connection streaming engine.
///
/// The dispatcher only ever touches the update queue's sending half; all
/// other state is owned by the in-flight request, which the inner mutex
/// limits to one at a time per connection.
pub struct ConnState {
    conn_id: ConnId,
    user_id: OwnedUserId,
    user_cache: Arc<UserCache>,
    global_cache: Arc<GlobalCache>,
    config: EngineConfig,
    tx: broadcast::Sender<SessionUpdate>,
    inner: Mutex<ConnStateInner>,
    last_activity: StdMutex<Instant>,
}

impl ConnState {
    pub fn new(
        conn_id: ConnId,
        user_id: OwnedUserId,
        user_cache: Arc<UserCache>,
        global_cache: Arc<GlobalCache>,
        config: EngineConfig,
    ) -> Self {
        let (tx, rx) = broadcast::channel(config.session_queue_capacity.max(1));
        Self {
            conn_id,
            user_id,
            user_cache,
            global_cache,
            config,
            tx,
            inner: Mutex::new(ConnStateInner {
                rx,
                initialized: false,
                out_of_sync: false,
                load_position: 0,
                joined: HashSet::new(),
                lists: Vec::new(),
                room_subscriptions: HashMap::new(),
            }),
            last_activity: StdMutex::new(Instant::now()),
        }
    }

    pub fn conn_id(&self) -> &ConnId {
        &self.conn_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// Dispatcher entry point. If the queue is full the oldest update is
    /// dropped and the receiving side observes the lag, forcing a resync.
    pub(crate) fn enqueue(&self, update: SessionUpdate) {
        let _ = self.tx.send(update);
    }

    /// Serve one request: reconcile list definitions, drain pending updates
    /// into deltas, and long-poll when there is nothing to report.
    #[instrument(level = "debug", skip(self, req), fields(conn = %self.conn_id, user = %self.user_id))]
    pub async fn handle_incoming_request(&self, req: &Request) -> Result<Response> {
        self.validate(req)?;
        *self.last_activity.lock().unwrap() = Instant::now();
        let mut inner = self.inner.lock().await;
        let mut out = ResponseState::default();
        let mut changed = false;

        let stale_pos = matches!(req.pos, Some(pos) if pos != inner.load_position);
        if !inner.initialized || inner.out_of_sync || stale_pos {
            if stale_pos {
                debug!(conn = %self.conn_id, pos = ?req.pos, "unknown position, rebuilding");
            }
            self.initialize(&mut inner, req, &mut out)?;
            changed = true;
        } else {
            changed |= self.reconcile_lists(&mut inner, req, &mut out)?;
            changed |= self.apply_subscriptions(&mut inner, req, &mut out);
        }

        loop {
            match inner.rx.try_recv() {
                Ok(update) => self.process_update(&mut inner, update, &mut out),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(conn = %self.conn_id, missed, "⚠️ update queue overflowed, resyncing");
                    self.resync(&mut inner, &mut out)?;
                    changed = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if !changed && out.is_empty() {
            let deadline = tokio::time::Instant::now() + self.config.clamp_timeout(req.timeout);
            while out.is_empty() {
                let update = tokio::time::timeout_at(deadline, inner.rx.recv()).await;
                match update {
                    Ok(Ok(update)) => self.process_update(&mut inner, update, &mut out),
                    Ok(Err(RecvError::Lagged(missed))) => {
                        warn!(conn = %self.conn_id, missed, "⚠️ update queue overflowed, resyncing");
                        self.resync(&mut inner, &mut out)?;
                        break;
                    }
                    Ok(Err(RecvError::Closed)) => break,
                    // deadline elapsed: an empty response, not an error
                    Err(_) => break,
                }
            }
        }

        let response = Response {
            pos: inner.load_position,
            counts: inner.lists.iter().map(|l| l.rooms.len() as u64).collect(),
            ops: out.ops,
            rooms: out.rooms,
            room_subscriptions: out.room_subscriptions,
        };
        debug!(ops = response.ops.len(), pos = response.pos, "✅ request served");
        Ok(response)
    }

    fn validate(&self, req: &Request) -> Result<()> {
        if req.lists.len() > self.config.max_lists {
            return Err(Error::InvalidRequest(format!(
                "{} lists exceed the maximum of {}",
                req.lists.len(),
                self.config.max_lists
            )));
        }
        for list in &req.lists {
            SortKey::parse_all(&list.sort)?;
            list.ranges.validate()?;
            self.validate_subscription(&list.room_subscription)?;
        }
        for subscription in req.room_subscriptions.values() {
            self.validate_subscription(subscription)?;
        }
        Ok(())
    }

    fn validate_subscription(&self, subscription: &RoomSubscription) -> Result<()> {
        if subscription.timeline_limit > self.config.max_timeline_limit {
            return Err(Error::InvalidRequest(format!(
                "timeline limit {} exceeds the maximum of {}",
                subscription.timeline_limit, self.config.max_timeline_limit
            )));
        }
        Ok(())
    }

    /// First call, unknown position or post-overflow recovery: snapshot the
    /// joined rooms, build every list from the request and answer with SYNC.
    fn initialize(
        &self,
        inner: &mut ConnStateInner,
        req: &Request,
        out: &mut ResponseState,
    ) -> Result<()> {
        self.drain_queue(inner);
        let (pos, joined_rooms) = self.global_cache.load_joined_rooms(&self.user_id)?;
        out.ops.clear();
        out.rooms.clear();
        out.room_subscriptions.clear();
        inner.load_position = pos;
        inner.joined = joined_rooms.iter().map(|r| r.room_id.clone()).collect();
        inner.lists.clear();
        for (index, list_req) in req.lists.iter().enumerate() {
            let sort = if list_req.sort.is_empty() {
                vec![SortKey::Recency]
            } else {
                SortKey::parse_all(&list_req.sort)?
            };
            let list = self.build_list(
                sort,
                list_req.filters.clone().unwrap_or_default(),
                list_req.ranges.clone(),
                list_req.room_subscription.clone(),
                &joined_rooms,
            );
            let ranges: Vec<[i64; 2]> = list.ranges.0.clone();
            self.emit_sync_ops(index, &list, &ranges, pos, out);
            inner.lists.push(list);
        }
        inner.room_subscriptions.clear();
        self.apply_subscriptions(inner, req, out);
        inner.initialized = true;
        inner.out_of_sync = false;
        debug!(conn = %self.conn_id, pos, rooms = inner.joined.len(), "🔄 session initialized");
        Ok(())
    }

    /// Queue overflow recovery: rebuild every list in place from its current
    /// definition and answer with SYNC over the tracked ranges.
    fn resync(&self, inner: &mut ConnStateInner, out: &mut ResponseState) -> Result<()> {
        self.drain_queue(inner);
        let (pos, joined_rooms) = self.global_cache.load_joined_rooms(&self.user_id)?;
        out.ops.clear();
        out.rooms.clear();
        inner.load_position = pos;
        inner.joined = joined_rooms.iter().map(|r| r.room_id.clone()).collect();
        for (index, list) in inner.lists.iter_mut().enumerate() {
            let entries = self.filtered_entries(&list.filters, &joined_rooms);
            let mut rooms = SortedRoomList::new(list.rooms.sort_keys().to_vec());
            rooms.populate(entries);
            list.rooms = rooms;
            let ranges: Vec<[i64; 2]> = list.ranges.0.clone();
            self.emit_sync_ops(index, list, &ranges, pos, out);
        }
        inner.out_of_sync = false;
        Ok(())
    }

    fn drain_queue(&self, inner: &mut ConnStateInner) {
        loop {
            match inner.rx.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Reconcile the request's list definitions against the existing ones by
    /// index. Sort and filters are sticky; changing either rebuilds the list.
    fn reconcile_lists(
        &self,
        inner: &mut ConnStateInner,
        req: &Request,
        out: &mut ResponseState,
    ) -> Result<bool> {
        let mut changed = false;
        let load_position = inner.load_position;
        for (index, list_req) in req.lists.iter().enumerate() {
            if index >= inner.lists.len() {
                // newly added list
                let sort = if list_req.sort.is_empty() {
                    vec![SortKey::Recency]
                } else {
                    SortKey::parse_all(&list_req.sort)?
                };
                let snapshot = self.joined_room_snapshot(inner);
                let list = self.build_list(
                    sort,
                    list_req.filters.clone().unwrap_or_default(),
                    list_req.ranges.clone(),
                    list_req.room_subscription.clone(),
                    &snapshot,
                );
                let ranges: Vec<[i64; 2]> = list.ranges.0.clone();
                self.emit_sync_ops(index, &list, &ranges, load_position, out);
                inner.lists.push(list);
                changed = true;
                continue;
            }

            let new_sort = if list_req.sort.is_empty() {
                None
            } else {
                Some(SortKey::parse_all(&list_req.sort)?)
            };
            let sort_changed = new_sort
                .as_ref()
                .is_some_and(|s| s.as_slice() != inner.lists[index].rooms.sort_keys());
            let filters_changed = list_req
                .filters
                .as_ref()
                .is_some_and(|f| *f != inner.lists[index].filters);
            if sort_changed || filters_changed {
                let current = &inner.lists[index];
                let sort = new_sort.unwrap_or_else(|| current.rooms.sort_keys().to_vec());
                let filters = list_req
                    .filters
                    .clone()
                    .unwrap_or_else(|| current.filters.clone());
                let ranges = if list_req.ranges.is_empty() {
                    current.ranges.clone()
                } else {
                    list_req.ranges.clone()
                };
                let subscription = if list_req.room_subscription.is_default() {
                    current.subscription.clone()
                } else {
                    list_req.room_subscription.clone()
                };
                let snapshot = self.joined_room_snapshot(inner);
                let list = self.build_list(sort, filters, ranges, subscription, &snapshot);
                let ranges: Vec<[i64; 2]> = list.ranges.0.clone();
                self.emit_sync_ops(index, &list, &ranges, load_position, out);
                inner.lists[index] = list;
                changed = true;
                continue;
            }

            if !list_req.ranges.is_empty() && list_req.ranges != inner.lists[index].ranges {
                let fresh = list_req.ranges.subtract(&inner.lists[index].ranges);
                inner.lists[index].ranges = list_req.ranges.clone();
                self.emit_sync_ops(index, &inner.lists[index], &fresh, load_position, out);
                changed = true;
            }
            if !list_req.room_subscription.is_default()
                && list_req.room_subscription != inner.lists[index].subscription
            {
                inner.lists[index].subscription = list_req.room_subscription.clone();
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Process new subscriptions and unsubscriptions. New subscriptions get a
    /// full room payload.
    fn apply_subscriptions(
        &self,
        inner: &mut ConnStateInner,
        req: &Request,
        out: &mut ResponseState,
    ) -> bool {
        let mut changed = false;
        for room_id in &req.unsubscribe_rooms {
            if inner.room_subscriptions.remove(room_id).is_some() {
                changed = true;
            }
        }
        let load_position = inner.load_position;
        for (room_id, subscription) in &req.room_subscriptions {
            if inner.room_subscriptions.get(room_id) == Some(subscription) {
                continue;
            }
            if !inner.joined.contains(room_id) {
                warn!(conn = %self.conn_id, room = %room_id, "⚠️ subscription to a non-joined room ignored");
                continue;
            }
            let Some(entry) = self.build_entry(room_id) else {
                continue;
            };
            let room = self.full_room(load_position, &entry, subscription);
            out.room_subscriptions.insert(room_id.clone(), room);
            inner.room_subscriptions.insert(room_id.clone(), subscription.clone());
            changed = true;
        }
        changed
    }

    fn process_update(
        &self,
        inner: &mut ConnStateInner,
        update: SessionUpdate,
        out: &mut ResponseState,
    ) {
        match update {
            SessionUpdate::Event(ed) => self.process_live_event(inner, &ed, out),
            SessionUpdate::UnreadCounts { room_id, .. } => {
                self.process_unread_counts(inner, &room_id, out)
            }
        }
    }

    /// Apply one dispatched event to every list and to the subscription
    /// deliveries.
    fn process_live_event(
        &self,
        inner: &mut ConnStateInner,
        ed: &EventData,
        out: &mut ResponseState,
    ) {
        if ed.event_nid > inner.load_position {
            inner.load_position = ed.event_nid;
        }
        if ed.event_type == "m.room.member"
            && ed.state_key.as_deref() == Some(self.user_id.as_str())
        {
            match ed.content.get("membership").and_then(Value::as_str) {
                Some("join") => {
                    inner.joined.insert(ed.room_id.clone());
                }
                Some("leave") | Some("ban") => {
                    inner.joined.remove(&ed.room_id);
                    inner.room_subscriptions.remove(&ed.room_id);
                }
                _ => {}
            }
        }
        let joined = inner.joined.contains(&ed.room_id);
        let load_position = inner.load_position;
        let is_dm = self.user_cache.is_dm(&ed.room_id);
        if let Some(entry) = self.build_entry(&ed.room_id) {
            for (index, list) in inner.lists.iter_mut().enumerate() {
                self.apply_event_to_list(index, list, joined, is_dm, &entry, ed, load_position, out);
            }
        }
        if inner.room_subscriptions.contains_key(&ed.room_id) {
            let room = out
                .rooms
                .entry(ed.room_id.clone())
                .or_insert_with(|| Room::new(ed.room_id.clone()));
            room.timeline.push(ed.json.clone());
        }
    }

    /// Counts changed for one room: reorder where the sort depends on them,
    /// otherwise an in-place UPDATE at the tracked index.
    fn process_unread_counts(
        &self,
        inner: &mut ConnStateInner,
        room_id: &RoomId,
        out: &mut ResponseState,
    ) {
        let Some(entry) = self.build_entry(room_id) else {
            return;
        };
        let load_position = inner.load_position;
        for (index, list) in inner.lists.iter_mut().enumerate() {
            if !list.rooms.contains(room_id) {
                continue;
            }
            if let Some((from, to)) = list.rooms.reorder(entry.clone()) {
                if from != to {
                    self.emit_move_ops(index, list, from as i64, to as i64, load_position, None, out);
                } else if list.ranges.inside(from as i64) {
                    let room = Room {
                        highlight_count: Some(entry.highlight_count),
                        notification_count: Some(entry.notification_count),
                        ..Room::new(room_id.to_owned())
                    };
                    out.ops.push(ResponseOp::Update {
                        list: index,
                        index: from as i64,
                        room,
                    });
                }
            }
        }
        if inner.room_subscriptions.contains_key(room_id) {
            let room = out
                .rooms
                .entry(room_id.to_owned())
                .or_insert_with(|| Room::new(room_id.to_owned()));
            room.highlight_count = Some(entry.highlight_count);
            room.notification_count = Some(entry.notification_count);
        }
    }

    /// Classify a room's transition against one list and emit the delta.
    #[allow(clippy::too_many_arguments)]
    fn apply_event_to_list(
        &self,
        index: usize,
        list: &mut ListState,
        joined: bool,
        is_dm: bool,
        entry: &ListEntry,
        ed: &EventData,
        load_position: i64,
        out: &mut ResponseState,
    ) {
        let passes = joined && list.filters.matches(is_dm, entry.room.is_encrypted);
        let present = list.rooms.contains(&entry.room.room_id);
        match (present, passes) {
            (false, false) => {}
            (false, true) => {
                let to = list.rooms.insert(entry.clone()) as i64;
                self.emit_insert_ops(index, list, to, load_position, out);
            }
            (true, false) => {
                if let Some(from) = list.rooms.remove(&entry.room.room_id) {
                    self.emit_remove_ops(index, list, from as i64, load_position, out);
                }
            }
            (true, true) => {
                if let Some((from, to)) = list.rooms.reorder(entry.clone()) {
                    self.emit_move_ops(
                        index,
                        list,
                        from as i64,
                        to as i64,
                        load_position,
                        Some(ed),
                        out,
                    );
                }
            }
        }
    }

    /// Delta for a room moving `from → to` within a list whose membership did
    /// not change. Indices outside every tracked range are clamped to the
    /// nearest window edge in the direction the shift happened, so the
    /// client's windows stay equal to the server's slices without the moved
    /// room's id leaking into windows it never entered.
    fn emit_move_ops(
        &self,
        index: usize,
        list: &ListState,
        from: i64,
        to: i64,
        load_position: i64,
        ed: Option<&EventData>,
        out: &mut ResponseState,
    ) {
        if from == to {
            if list.ranges.inside(from) {
                if let Some(entry) = list.rooms.get(from as usize) {
                    out.ops.push(ResponseOp::Update {
                        list: index,
                        index: from,
                        room: self.delta_room(entry, ed),
                    });
                }
            }
            return;
        }
        if !list.ranges.intersects_span(from.min(to), from.max(to)) {
            return;
        }
        let (delete_index, insert_index) = if to < from {
            // moved towards the head; everything in between shifts down one
            (
                if list.ranges.inside(from) {
                    from
                } else {
                    list.ranges.upper_clamp(from).unwrap_or(from)
                },
                if list.ranges.inside(to) {
                    to
                } else {
                    list.ranges.lower_clamp(to).unwrap_or(to)
                },
            )
        } else {
            // moved towards the tail; everything in between shifts up one
            (
                if list.ranges.inside(from) {
                    from
                } else {
                    list.ranges.lower_clamp(from).unwrap_or(from)
                },
                if list.ranges.inside(to) {
                    to
                } else {
                    list.ranges.upper_clamp(to).unwrap_or(to)
                },
            )
        };
        out.ops.push(ResponseOp::Delete {
            list: index,
            index: delete_index,
        });
        if let Some(entry) = list.rooms.get(insert_index as usize) {
            out.ops.push(ResponseOp::Insert {
                list: index,
                index: insert_index,
                room: self.full_room(load_position, entry, &list.subscription),
            });
        }
    }

    /// Delta for a room that entered the list at `to`. The list has already
    /// grown; the client evicts the last tracked element to make space.
    fn emit_insert_ops(
        &self,
        index: usize,
        list: &ListState,
        to: i64,
        load_position: i64,
        out: &mut ResponseState,
    ) {
        let bottom = list.rooms.len() as i64 - 1;
        if !list.ranges.intersects_span(to, bottom) {
            return;
        }
        if to == bottom {
            // grew at the tail: nothing shifts
            if let Some(entry) = list.rooms.get(to as usize) {
                out.ops.push(ResponseOp::Insert {
                    list: index,
                    index: to,
                    room: self.full_room(load_position, entry, &list.subscription),
                });
            }
            return;
        }
        let Some(delete_index) = list.ranges.upper_clamp(bottom) else {
            return;
        };
        out.ops.push(ResponseOp::Delete {
            list: index,
            index: delete_index,
        });
        let insert_index = if list.ranges.inside(to) {
            to
        } else {
            list.ranges.lower_clamp(to).unwrap_or(to)
        };
        if let Some(entry) = list.rooms.get(insert_index as usize) {
            out.ops.push(ResponseOp::Insert {
                list: index,
                index: insert_index,
                room: self.full_room(load_position, entry, &list.subscription),
            });
        }
    }

    /// Delta for a room that left the list from `from`. The list has already
    /// shrunk; whatever shifted into the last tracked index is delivered, and
    /// the evicted room's id never appears.
    fn emit_remove_ops(
        &self,
        index: usize,
        list: &ListState,
        from: i64,
        load_position: i64,
        out: &mut ResponseState,
    ) {
        let bottom_old = list.rooms.len() as i64;
        if !list.ranges.intersects_span(from, bottom_old) {
            return;
        }
        let delete_index = if list.ranges.inside(from) {
            from
        } else {
            list.ranges.lower_clamp(from).unwrap_or(from)
        };
        out.ops.push(ResponseOp::Delete {
            list: index,
            index: delete_index,
        });
        if let Some(insert_index) = list.ranges.upper_clamp(bottom_old) {
            if let Some(entry) = list.rooms.get(insert_index as usize) {
                out.ops.push(ResponseOp::Insert {
                    list: index,
                    index: insert_index,
                    room: self.full_room(load_position, entry, &list.subscription),
                });
            }
        }
    }

    /// SYNC the given ranges of one list. The reported range is the requested
    /// one; rooms are delivered only for the indices that exist.
    fn emit_sync_ops(
        &self,
        index: usize,
        list: &ListState,
        ranges: &[[i64; 2]],
        load_position: i64,
        out: &mut ResponseState,
    ) {
        for &[lo, hi] in ranges {
            let slice = list.rooms.slice(lo as usize, hi as usize);
            if slice.is_empty() {
                continue;
            }
            let room_ids: Vec<OwnedRoomId> =
                slice.iter().map(|e| e.room.room_id.clone()).collect();
            let limit = self.config.clamp_timeline_limit(list.subscription.timeline_limit);
            let timelines = self
                .user_cache
                .lazy_load_timelines(load_position, &room_ids, limit);
            let rooms = slice
                .into_iter()
                .map(|entry| {
                    let timeline = timelines
                        .get(&entry.room.room_id)
                        .map(|d| d.timeline.clone())
                        .unwrap_or_default();
                    self.room_payload(load_position, entry, timeline, &list.subscription)
                })
                .collect();
            out.ops.push(ResponseOp::Sync {
                list: index,
                range: [lo, hi],
                rooms,
            });
        }
    }

    fn build_list(
        &self,
        sort: Vec<SortKey>,
        filters: RequestFilters,
        ranges: SliceRanges,
        subscription: RoomSubscription,
        joined_rooms: &[SortableRoom],
    ) -> ListState {
        let entries = self.filtered_entries(&filters, joined_rooms);
        let mut rooms = SortedRoomList::new(sort);
        rooms.populate(entries);
        ListState {
            filters,
            rooms,
            ranges,
            subscription,
        }
    }

    fn filtered_entries(
        &self,
        filters: &RequestFilters,
        joined_rooms: &[SortableRoom],
    ) -> Vec<ListEntry> {
        joined_rooms
            .iter()
            .filter_map(|room| {
                let is_dm = self.user_cache.is_dm(&room.room_id);
                if !filters.matches(is_dm, room.is_encrypted) {
                    return None;
                }
                let data = self.user_cache.room_data(&room.room_id);
                Some(ListEntry {
                    room: room.clone(),
                    notification_count: data.notification_count,
                    highlight_count: data.highlight_count,
                })
            })
            .collect()
    }

    fn joined_room_snapshot(&self, inner: &ConnStateInner) -> Vec<SortableRoom> {
        inner
            .joined
            .iter()
            .filter_map(|room_id| self.global_cache.load_room(room_id))
            .collect()
    }

    fn build_entry(&self, room_id: &RoomId) -> Option<ListEntry> {
        let room = self.global_cache.load_room(room_id)?;
        let data = self.user_cache.room_data(room_id);
        Some(ListEntry {
            room,
            notification_count: data.notification_count,
            highlight_count: data.highlight_count,
        })
    }

    /// Full wire form: name, timeline tail, required state and counts.
    fn full_room(
        &self,
        load_position: i64,
        entry: &ListEntry,
        subscription: &RoomSubscription,
    ) -> Room {
        let limit = self.config.clamp_timeline_limit(subscription.timeline_limit);
        let timelines = self.user_cache.lazy_load_timelines(
            load_position,
            std::slice::from_ref(&entry.room.room_id),
            limit,
        );
        let timeline = timelines
            .get(&entry.room.room_id)
            .map(|d| d.timeline.clone())
            .unwrap_or_default();
        self.room_payload(load_position, entry, timeline, subscription)
    }

    fn room_payload(
        &self,
        load_position: i64,
        entry: &ListEntry,
        timeline: Vec<Value>,
        subscription: &RoomSubscription,
    ) -> Room {
        let required_state = self.global_cache.load_room_state(
            &entry.room.room_id,
            load_position,
            &subscription.required_state,
        );
        Room {
            room_id: entry.room.room_id.clone(),
            name: (!entry.room.name.is_empty()).then(|| entry.room.name.clone()),
            timeline,
            required_state,
            highlight_count: (entry.highlight_count > 0).then_some(entry.highlight_count),
            notification_count: (entry.notification_count > 0).then_some(entry.notification_count),
        }
    }

    /// Reduced wire form for in-place updates: the triggering event and any
    /// nonzero counts.
    fn delta_room(&self, entry: &ListEntry, ed: Option<&EventData>) -> Room {
        Room {
            room_id: entry.room.room_id.clone(),
            name: None,
            timeline: ed.map(|e| vec![e.json.clone()]).unwrap_or_default(),
            required_state: Vec::new(),
            highlight_count: (entry.highlight_count > 0).then_some(entry.highlight_count),
            notification_count: (entry.notification_count > 0).then_some(entry.notification_count),
        }
    }
}

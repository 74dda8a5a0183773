// =============================================================================
// SlideSync Room Sync Engine - Connection State Scenario Tests
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   End-to-end session scenarios driven through the dispatcher: initial SYNC,
//   recency bumps inside and outside tracked windows, multiple disjoint
//   windows, and explicit room subscriptions.
//
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use ruma::{device_id, user_id, OwnedRoomId, RoomId, UserId};
use serde_json::json;
use slidesync::{
    ConnId, ConnState, Dispatcher, EngineConfig, EventData, GlobalCache, JoinedRoomsTracker,
    Metrics, Request, RequestList, Response, ResponseOp, RoomSubscription, SliceRanges,
    SortableRoom, UserCache, UserRoomData,
};

const NOW: u64 = 1_632_131_678_061;

fn sortable_room(room_id: &RoomId, ts: u64) -> SortableRoom {
    SortableRoom {
        name: format!("Room {room_id}"),
        last_message_timestamp: ts,
        last_event_json: Some(json!({
            "type": "m.room.message",
            "content": {"body": "hello"},
            "origin_server_ts": ts,
        })),
        ..SortableRoom::new(room_id.to_owned())
    }
}

fn message(room_id: &RoomId, ts: u64, nid: i64) -> EventData {
    EventData::from_json(
        room_id.to_owned(),
        json!({
            "type": "m.room.message",
            "content": {"body": "ping"},
            "origin_server_ts": ts,
        }),
        nid,
    )
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    conn: Arc<ConnState>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A session over fixture caches: the joined-rooms load and the lazy
/// timeline load are overridden, the dispatcher pipeline is real.
fn harness(user: &UserId, rooms: &[SortableRoom]) -> Harness {
    init_tracing();
    let mut global = GlobalCache::new(None);
    for room in rooms {
        global.assign_room(room.clone());
    }
    let snapshot: Vec<SortableRoom> = rooms.to_vec();
    global.set_joined_rooms_loader(
        move |_: &UserId| -> slidesync::Result<(i64, Vec<SortableRoom>)> {
            Ok((1, snapshot.clone()))
        },
    );
    let global = Arc::new(global);

    let mut ucache = UserCache::new(user.to_owned(), None);
    let gc = global.clone();
    ucache.set_room_data_loader(move |_pos: i64, ids: &[OwnedRoomId], _max: usize| {
        ids.iter()
            .map(|id| {
                let timeline = gc
                    .load_room(id)
                    .and_then(|r| r.last_event_json)
                    .map(|ev| vec![ev])
                    .unwrap_or_default();
                (
                    id.clone(),
                    UserRoomData {
                        timeline,
                        ..Default::default()
                    },
                )
            })
            .collect::<HashMap<_, _>>()
    });
    let ucache = Arc::new(ucache);

    let tracker = Arc::new(JoinedRoomsTracker::new());
    for room in rooms {
        tracker.user_joined_room(user, &room.room_id);
    }
    let dispatcher = Arc::new(Dispatcher::new(
        global.clone(),
        tracker,
        None,
        Arc::new(Metrics::default()),
    ));
    dispatcher.register_user_cache(ucache.clone());

    let conn = Arc::new(ConnState::new(
        ConnId {
            session_id: "s".to_owned(),
            device_id: device_id!("DEV").to_owned(),
        },
        user.to_owned(),
        ucache,
        global,
        EngineConfig::default(),
    ));
    dispatcher.register_session(conn.clone());
    Harness { dispatcher, conn }
}

fn list_request(sort: &[&str], ranges: &[[i64; 2]]) -> RequestList {
    RequestList {
        sort: sort.iter().map(|s| (*s).to_owned()).collect(),
        ranges: SliceRanges(ranges.to_vec()),
        ..Default::default()
    }
}

fn request(lists: Vec<RequestList>) -> Request {
    Request {
        lists,
        ..Default::default()
    }
}

#[track_caller]
fn assert_sync_op(res: &Response, op_index: usize, range: [i64; 2], want_rooms: &[&RoomId]) {
    match &res.ops[op_index] {
        ResponseOp::Sync {
            range: got_range,
            rooms,
            ..
        } => {
            assert_eq!(*got_range, range);
            let got: Vec<&str> = rooms.iter().map(|r| r.room_id.as_str()).collect();
            let want: Vec<&str> = want_rooms.iter().map(|r| r.as_str()).collect();
            assert_eq!(got, want);
        }
        other => panic!("expected SYNC, got {other:?}"),
    }
}

#[track_caller]
fn assert_delete_insert(res: &Response, delete_index: i64, insert_index: i64, room_id: &RoomId) {
    assert_eq!(res.ops.len(), 2, "ops: {:?}", res.ops);
    match &res.ops[0] {
        ResponseOp::Delete { index, .. } => assert_eq!(*index, delete_index),
        other => panic!("expected DELETE, got {other:?}"),
    }
    match &res.ops[1] {
        ResponseOp::Insert { index, room, .. } => {
            assert_eq!(*index, insert_index);
            assert_eq!(room.room_id.as_str(), room_id.as_str());
        }
        other => panic!("expected INSERT, got {other:?}"),
    }
}

// Three rooms sorted by recency, then a bump from the bottom and a repeated
// bump at the top.
#[tokio::test]
async fn test_initial_sync_then_bump_then_update() {
    let alice = user_id!("@alice:localhost");
    let room_a = sortable_room(<&RoomId>::try_from("!a:localhost").unwrap(), NOW - 8000);
    let room_b = sortable_room(<&RoomId>::try_from("!b:localhost").unwrap(), NOW);
    let room_c = sortable_room(<&RoomId>::try_from("!c:localhost").unwrap(), NOW - 4000);
    let h = harness(alice, &[room_a.clone(), room_b.clone(), room_c.clone()]);

    let req = request(vec![list_request(&["by_recency"], &[[0, 9]])]);
    let res = h.conn.handle_incoming_request(&req).await.unwrap();
    assert_eq!(res.counts, vec![3]);
    assert_eq!(res.ops.len(), 1);
    assert_sync_op(&res, 0, [0, 9], &[&room_b.room_id, &room_c.room_id, &room_a.room_id]);
    match &res.ops[0] {
        ResponseOp::Sync { rooms, .. } => {
            assert_eq!(rooms[0].name.as_deref(), Some("Room !b:localhost"));
            assert_eq!(rooms[0].timeline, vec![room_b.last_event_json.clone().unwrap()]);
        }
        other => panic!("expected SYNC, got {other:?}"),
    }

    // bump A to the top
    h.dispatcher.on_new_event(message(&room_a.room_id, NOW + 1000, 2));
    let res = h.conn.handle_incoming_request(&req).await.unwrap();
    assert_eq!(res.counts, vec![3]);
    assert_delete_insert(&res, 2, 0, &room_a.room_id);
    assert_eq!(res.pos, 2);

    // another message in A just updates in place
    h.dispatcher.on_new_event(message(&room_a.room_id, NOW + 2000, 3));
    let res = h.conn.handle_incoming_request(&req).await.unwrap();
    assert_eq!(res.ops.len(), 1);
    match &res.ops[0] {
        ResponseOp::Update { index, room, .. } => {
            assert_eq!(*index, 0);
            assert_eq!(room.room_id, room_a.room_id);
            assert_eq!(room.timeline.len(), 1);
        }
        other => panic!("expected UPDATE, got {other:?}"),
    }
    assert_eq!(res.pos, 3);
}

// Two disjoint windows over ten rooms; bumps shift rooms across window edges.
#[tokio::test]
async fn test_multiple_ranges() {
    let alice = user_id!("@alice:localhost");
    let rooms: Vec<SortableRoom> = (0..10)
        .map(|i| {
            sortable_room(
                <&RoomId>::try_from(format!("!r{i}:localhost").as_str()).unwrap(),
                NOW - i as u64 * 1000,
            )
        })
        .collect();
    let h = harness(alice, &rooms);

    let res = h
        .conn
        .handle_incoming_request(&request(vec![list_request(&["by_recency"], &[[0, 2]])]))
        .await
        .unwrap();
    assert_eq!(res.counts, vec![10]);
    assert_sync_op(&res, 0, [0, 2], &[&rooms[0].room_id, &rooms[1].room_id, &rooms[2].room_id]);

    // add a second non-overlapping window; the sort stays sticky
    let both_windows = request(vec![list_request(&[], &[[0, 2], [4, 6]])]);
    let res = h.conn.handle_incoming_request(&both_windows).await.unwrap();
    assert_eq!(res.ops.len(), 1);
    assert_sync_op(&res, 0, [4, 6], &[&rooms[4].room_id, &rooms[5].room_id, &rooms[6].room_id]);

    // pull room 8 to the top: the second window's edge gives way
    // 0,1,2,3,4,5,6,7,8,9  ->  8,0,1,2,3,4,5,6,7,9
    h.dispatcher.on_new_event(message(&rooms[8].room_id, NOW + 2000, 2));
    let res = h.conn.handle_incoming_request(&both_windows).await.unwrap();
    assert_eq!(res.counts, vec![10]);
    assert_delete_insert(&res, 6, 0, &rooms[8].room_id);

    // pull room 9 into the gap between the windows: the second window now
    // starts at a different room
    // 8,0,1,2,3,4,5,6,7,9  ->  8,0,1,9,2,3,4,5,6,7
    let mid = (rooms[1].last_message_timestamp + rooms[2].last_message_timestamp) / 2;
    h.dispatcher.on_new_event(message(&rooms[9].room_id, mid, 3));
    let res = h.conn.handle_incoming_request(&both_windows).await.unwrap();
    assert_delete_insert(&res, 6, 4, &rooms[2].room_id);
}

// A bump that stays outside every tracked window is silent.
#[tokio::test]
async fn test_bump_outside_range_is_silent() {
    let alice = user_id!("@alice:localhost");
    let room_a = sortable_room(<&RoomId>::try_from("!a:localhost").unwrap(), NOW);
    let room_b = sortable_room(<&RoomId>::try_from("!b:localhost").unwrap(), NOW - 1000);
    let room_c = sortable_room(<&RoomId>::try_from("!c:localhost").unwrap(), NOW - 2000);
    let room_d = sortable_room(<&RoomId>::try_from("!d:localhost").unwrap(), NOW - 3000);
    let h = harness(alice, &[room_a, room_b, room_c.clone(), room_d.clone()]);

    let req = request(vec![list_request(&["by_recency"], &[[0, 1]])]);
    let res = h.conn.handle_incoming_request(&req).await.unwrap();
    assert_eq!(res.counts, vec![4]);
    assert_eq!(res.ops.len(), 1);

    // D overtakes C but both stay outside [0,1]
    h.dispatcher
        .on_new_event(message(&room_d.room_id, room_c.last_message_timestamp + 2, 2));
    let mut req = req.clone();
    req.timeout = Some(10);
    let res = h.conn.handle_incoming_request(&req).await.unwrap();
    assert!(res.ops.is_empty(), "ops: {:?}", res.ops);
    assert_eq!(res.counts, vec![4]);
}

// Explicit subscriptions deliver events for rooms outside every window, and
// can be swapped for another room later.
#[tokio::test]
async fn test_room_subscriptions() {
    let alice = user_id!("@alice:localhost");
    let room_a = sortable_room(<&RoomId>::try_from("!a:localhost").unwrap(), NOW);
    let room_b = sortable_room(<&RoomId>::try_from("!b:localhost").unwrap(), NOW - 1000);
    let room_c = sortable_room(<&RoomId>::try_from("!c:localhost").unwrap(), NOW - 2000);
    let room_d = sortable_room(<&RoomId>::try_from("!d:localhost").unwrap(), NOW - 3000);
    let h = harness(
        alice,
        &[room_a.clone(), room_b.clone(), room_c.clone(), room_d.clone()],
    );

    let mut req = request(vec![list_request(&["by_recency"], &[[0, 1]])]);
    req.room_subscriptions.insert(
        room_d.room_id.clone(),
        RoomSubscription {
            timeline_limit: 20,
            ..Default::default()
        },
    );
    let res = h.conn.handle_incoming_request(&req).await.unwrap();
    assert_eq!(res.counts, vec![4]);
    assert_sync_op(&res, 0, [0, 1], &[&room_a.room_id, &room_b.room_id]);
    let sub = &res.room_subscriptions[&room_d.room_id];
    assert_eq!(sub.name.as_deref(), Some("Room !d:localhost"));
    assert_eq!(sub.timeline, vec![room_d.last_event_json.clone().unwrap()]);

    // an event lands in D, far outside the window
    let ed = message(&room_d.room_id, NOW + 2000, 2);
    h.dispatcher.on_new_event(ed.clone());
    let res = h
        .conn
        .handle_incoming_request(&request(vec![list_request(&[], &[[0, 1]])]))
        .await
        .unwrap();
    let delivered = &res.rooms[&room_d.room_id];
    assert_eq!(delivered.timeline, vec![ed.json.clone()]);
    assert!(res.room_subscriptions.is_empty());

    // swap the subscription over to C
    let mut req = request(vec![list_request(&[], &[[0, 1]])]);
    req.room_subscriptions.insert(
        room_c.room_id.clone(),
        RoomSubscription {
            timeline_limit: 20,
            ..Default::default()
        },
    );
    req.unsubscribe_rooms.push(room_d.room_id.clone());
    let res = h.conn.handle_incoming_request(&req).await.unwrap();
    assert_eq!(res.room_subscriptions.len(), 1);
    let sub = &res.room_subscriptions[&room_c.room_id];
    assert_eq!(sub.name.as_deref(), Some("Room !c:localhost"));

    // D is no longer subscribed: its events are not delivered
    h.dispatcher.on_new_event(message(&room_d.room_id, NOW + 3000, 3));
    let mut req = request(vec![list_request(&[], &[[0, 1]])]);
    req.timeout = Some(10);
    let res = h.conn.handle_incoming_request(&req).await.unwrap();
    assert!(!res.rooms.contains_key(&room_d.room_id));
}

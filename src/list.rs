// =============================================================================
// SlideSync Room Sync Engine - Sorted List Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Ordered room list for one client-declared list, backed by a treap keyed
//   by the composite sort key and annotated with subtree sizes. Rank lookups,
//   splices and range reads all run in O(log n); a reorder excises the old
//   entry and reinserts it rather than rebuilding the list. The comparator's
//   RoomID tiebreak makes the order total, so every entry has exactly one
//   position.
//
// =============================================================================

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use ruma::{OwnedRoomId, RoomId};

use crate::{
    cache::global::SortableRoom,
    sort::{compare, SortKey},
};

/// One room as it appears in a session's list: the global summary plus the
/// per-user counters that can participate in sort order.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub room: SortableRoom,
    pub notification_count: u64,
    pub highlight_count: u64,
}

impl ListEntry {
    pub fn room_id(&self) -> &RoomId {
        &self.room.room_id
    }
}

type Link = Option<Box<Node>>;

/// Treap node. Only the room id lives in the tree; the entry data stays in
/// the list's map so each entry is stored once.
#[derive(Debug)]
struct Node {
    room_id: OwnedRoomId,
    priority: u64,
    size: usize,
    left: Link,
    right: Link,
}

/// Sorted, filtered room list.
#[derive(Debug)]
pub struct SortedRoomList {
    sort: Vec<SortKey>,
    root: Link,
    entries: HashMap<OwnedRoomId, ListEntry>,
}

impl SortedRoomList {
    pub fn new(sort: Vec<SortKey>) -> Self {
        Self {
            sort,
            root: None,
            entries: HashMap::new(),
        }
    }

    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn len(&self) -> usize {
        node_size(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.entries.contains_key(room_id)
    }

    pub fn entry(&self, room_id: &RoomId) -> Option<&ListEntry> {
        self.entries.get(room_id)
    }

    pub fn get(&self, index: usize) -> Option<&ListEntry> {
        select_node(&self.root, index).map(|node| &self.entries[&node.room_id])
    }

    /// Replace the whole list with `entries`.
    pub fn populate(&mut self, entries: Vec<ListEntry>) {
        self.root = None;
        self.entries.clear();
        for entry in entries {
            self.insert(entry);
        }
    }

    pub fn index_of(&self, room_id: &RoomId) -> Option<usize> {
        let entry = self.entries.get(room_id)?;
        rank_node(&self.root, entry, &self.sort, &self.entries)
    }

    /// Insert a room that is not present. Returns its index.
    pub fn insert(&mut self, entry: ListEntry) -> usize {
        debug_assert!(!self.entries.contains_key(&entry.room.room_id));
        let room_id = entry.room.room_id.clone();
        let priority = priority_for(&room_id);
        self.entries.insert(room_id.clone(), entry);
        let new = Box::new(Node {
            room_id: room_id.clone(),
            priority,
            size: 1,
            left: None,
            right: None,
        });
        let mut rank = 0;
        let target = &self.entries[&room_id];
        let root = insert_node(self.root.take(), new, target, &self.sort, &self.entries, &mut rank);
        self.root = Some(root);
        rank
    }

    /// Remove a room. Returns the index it held.
    pub fn remove(&mut self, room_id: &RoomId) -> Option<usize> {
        let entry = self.entries.get(room_id)?;
        let index = rank_node(&self.root, entry, &self.sort, &self.entries)?;
        let (root, removed) = remove_node(self.root.take(), entry, &self.sort, &self.entries);
        self.root = root;
        debug_assert!(removed);
        self.entries.remove(room_id);
        Some(index)
    }

    /// Excise the room and reinsert it with fresh sort keys. Returns
    /// `(old_index, new_index)`.
    pub fn reorder(&mut self, entry: ListEntry) -> Option<(usize, usize)> {
        let from = self.remove(&entry.room.room_id)?;
        let to = self.insert(entry);
        Some((from, to))
    }

    /// Entries in `[lo, hi]` inclusive, clamped to the list length.
    pub fn slice(&self, lo: usize, hi: usize) -> Vec<&ListEntry> {
        if self.is_empty() || lo >= self.len() {
            return Vec::new();
        }
        let hi = hi.min(self.len() - 1);
        if hi < lo {
            return Vec::new();
        }
        let mut ids = Vec::with_capacity(hi - lo + 1);
        collect_range(&self.root, lo, hi, &mut ids);
        ids.into_iter().map(|id| &self.entries[id]).collect()
    }
}

/// Stable pseudo-random heap priority derived from the room id.
fn priority_for(room_id: &RoomId) -> u64 {
    let mut hasher = DefaultHasher::new();
    room_id.hash(&mut hasher);
    hasher.finish()
}

fn node_size(link: &Link) -> usize {
    link.as_ref().map_or(0, |node| node.size)
}

fn refresh(node: &mut Node) {
    node.size = 1 + node_size(&node.left) + node_size(&node.right);
}

fn rotate_right(mut node: Box<Node>) -> Box<Node> {
    let mut pivot = node.left.take().expect("rotate_right requires a left child");
    node.left = pivot.right.take();
    refresh(&mut node);
    pivot.right = Some(node);
    refresh(&mut pivot);
    pivot
}

fn rotate_left(mut node: Box<Node>) -> Box<Node> {
    let mut pivot = node.right.take().expect("rotate_left requires a right child");
    node.right = pivot.left.take();
    refresh(&mut node);
    pivot.left = Some(node);
    refresh(&mut pivot);
    pivot
}

/// Insert `new` below `link`, comparing `target` (the new room's entry)
/// against each visited node. `rank` accumulates the inserted position;
/// rotations preserve in-order rank so the accumulated value stays valid.
fn insert_node(
    link: Link,
    new: Box<Node>,
    target: &ListEntry,
    sort: &[SortKey],
    entries: &HashMap<OwnedRoomId, ListEntry>,
    rank: &mut usize,
) -> Box<Node> {
    let Some(mut node) = link else {
        return new;
    };
    if compare(sort, target, &entries[&node.room_id]) == Ordering::Less {
        let left = insert_node(node.left.take(), new, target, sort, entries, rank);
        node.left = Some(left);
        refresh(&mut node);
        if node.left.as_ref().is_some_and(|l| l.priority > node.priority) {
            node = rotate_right(node);
        }
    } else {
        *rank += node_size(&node.left) + 1;
        let right = insert_node(node.right.take(), new, target, sort, entries, rank);
        node.right = Some(right);
        refresh(&mut node);
        if node.right.as_ref().is_some_and(|r| r.priority > node.priority) {
            node = rotate_left(node);
        }
    }
    node
}

fn remove_node(
    link: Link,
    target: &ListEntry,
    sort: &[SortKey],
    entries: &HashMap<OwnedRoomId, ListEntry>,
) -> (Link, bool) {
    let Some(mut node) = link else {
        return (None, false);
    };
    match compare(sort, target, &entries[&node.room_id]) {
        Ordering::Less => {
            let (left, removed) = remove_node(node.left.take(), target, sort, entries);
            node.left = left;
            refresh(&mut node);
            (Some(node), removed)
        }
        Ordering::Greater => {
            let (right, removed) = remove_node(node.right.take(), target, sort, entries);
            node.right = right;
            refresh(&mut node);
            (Some(node), removed)
        }
        Ordering::Equal => (merge_nodes(node.left.take(), node.right.take()), true),
    }
}

fn merge_nodes(a: Link, b: Link) -> Link {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(mut a), Some(b)) if a.priority >= b.priority => {
            a.right = merge_nodes(a.right.take(), Some(b));
            refresh(&mut a);
            Some(a)
        }
        (a, Some(mut b)) => {
            b.left = merge_nodes(a, b.left.take());
            refresh(&mut b);
            Some(b)
        }
    }
}

fn rank_node(
    link: &Link,
    target: &ListEntry,
    sort: &[SortKey],
    entries: &HashMap<OwnedRoomId, ListEntry>,
) -> Option<usize> {
    let node = link.as_ref()?;
    match compare(sort, target, &entries[&node.room_id]) {
        Ordering::Less => rank_node(&node.left, target, sort, entries),
        Ordering::Equal => Some(node_size(&node.left)),
        Ordering::Greater => rank_node(&node.right, target, sort, entries)
            .map(|rank| node_size(&node.left) + 1 + rank),
    }
}

fn select_node<'a>(link: &'a Link, index: usize) -> Option<&'a Node> {
    let node = link.as_ref()?;
    let left_size = node_size(&node.left);
    match index.cmp(&left_size) {
        Ordering::Less => select_node(&node.left, index),
        Ordering::Equal => Some(node),
        Ordering::Greater => select_node(&node.right, index - left_size - 1),
    }
}

/// In-order walk of the subtree-local index range `[lo, hi]`.
fn collect_range<'a>(link: &'a Link, lo: usize, hi: usize, out: &mut Vec<&'a OwnedRoomId>) {
    let Some(node) = link.as_ref() else {
        return;
    };
    let left_size = node_size(&node.left);
    if lo < left_size {
        collect_range(&node.left, lo, hi.min(left_size - 1), out);
    }
    if lo <= left_size && left_size <= hi {
        out.push(&node.room_id);
    }
    if hi > left_size {
        collect_range(&node.right, lo.saturating_sub(left_size + 1), hi - left_size - 1, out);
    }
}

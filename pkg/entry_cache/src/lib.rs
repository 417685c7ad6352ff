//! Reference-counted, size-bounded buffer cache keyed by `Position`.
//!
//! Grounded on `datastore::meta::watchers::Watchers`'s shape: a small
//! `Arc<async_std::sync::Mutex<State>>` wrapper exposing a handful of async
//! methods, generalized from a watcher registry to an LRU cache. The
//! reference counting itself needs no bespoke bookkeeping: `Entry` wraps its
//! payload in a plain `std::sync::Arc`, so `Entry::clone()` *is* "take a
//! reference" and `Drop` *is* "release a reference", with `Arc::strong_count`
//! telling the cache whether anyone besides itself still holds a copy before
//! it evicts.

use std::collections::HashMap;
use std::sync::Arc;

use mlog_common::async_std::sync::Mutex;
use mlog_common::bytes::Bytes;
use mlog_position::Position;

/// A single cached payload, reference-counted via `Arc`. Cloning an `Entry`
/// takes a reference; dropping the last clone releases it.
#[derive(Clone, Debug)]
pub struct Entry {
    position: Position,
    payload: Arc<Bytes>,
}

impl Entry {
    pub fn new(position: Position, payload: Bytes) -> Self {
        Self {
            position,
            payload: Arc::new(payload),
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Number of outstanding references to this entry's payload, including
    /// the cache's own retained copy if it is still cached.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.payload)
    }
}

struct Node {
    entry: Entry,
    size: u64,
    prev: Option<Position>,
    next: Option<Position>,
}

struct State {
    nodes: HashMap<Position, Node>,
    /// Most recently used.
    head: Option<Position>,
    /// Least recently used; the next eviction candidate.
    tail: Option<Position>,
    used_bytes: u64,
}

impl State {
    fn unlink(&mut self, position: Position) {
        let (prev, next) = {
            let node = self.nodes.get(&position).expect("unlink of missing node");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes.get_mut(&p).unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes.get_mut(&n).unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, position: Position) {
        let old_head = self.head;
        if let Some(node) = self.nodes.get_mut(&position) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.nodes.get_mut(&h).unwrap().prev = Some(position);
        }
        self.head = Some(position);
        if self.tail.is_none() {
            self.tail = Some(position);
        }
    }

    fn touch(&mut self, position: Position) {
        if self.head == Some(position) {
            return;
        }
        self.unlink(position);
        self.push_front(position);
    }
}

/// Size-bounded cache of entry payloads shared by every cursor of one
/// managed log. A capacity of zero makes the cache a pure pass-through:
/// nothing is ever retained, so every read is a cache miss.
pub struct EntryCache {
    capacity_bytes: u64,
    state: Mutex<State>,
}

impl EntryCache {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            state: Mutex::new(State {
                nodes: HashMap::new(),
                head: None,
                tail: None,
                used_bytes: 0,
            }),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        self.capacity_bytes == 0
    }

    /// Looks up `position`, marking it most-recently-used on a hit.
    pub async fn get(&self, position: Position) -> Option<Entry> {
        if self.is_pass_through() {
            return None;
        }
        let mut state = self.state.lock().await;
        let entry = state.nodes.get(&position).map(|n| n.entry.clone());
        if entry.is_some() {
            state.touch(position);
        }
        entry
    }

    /// Inserts `entry`, evicting least-recently-used entries (that nothing
    /// else still references) until the cache is back under capacity. A
    /// no-op in pass-through mode.
    pub async fn put(&self, entry: Entry, size: u64) {
        if self.is_pass_through() {
            return;
        }

        let mut state = self.state.lock().await;
        let position = entry.position();
        if state.nodes.contains_key(&position) {
            state.touch(position);
            return;
        }

        state.nodes.insert(
            position,
            Node {
                entry,
                size,
                prev: None,
                next: None,
            },
        );
        state.push_front(position);
        state.used_bytes += size;

        while state.used_bytes > self.capacity_bytes {
            let victim = match state.tail {
                Some(p) => p,
                None => break,
            };
            // An entry still externally referenced (strong_count > 1, since
            // the cache itself holds one) is skipped for this pass rather
            // than evicted out from under a reader; it will be retried on
            // the next insert.
            let evictable = state
                .nodes
                .get(&victim)
                .map(|n| n.entry.strong_count() <= 1)
                .unwrap_or(false);
            if !evictable {
                break;
            }
            state.unlink(victim);
            if let Some(node) = state.nodes.remove(&victim) {
                state.used_bytes -= node.size;
            }
        }
    }

    pub async fn invalidate(&self, position: Position) {
        let mut state = self.state.lock().await;
        if state.nodes.contains_key(&position) {
            state.unlink(position);
            if let Some(node) = state.nodes.remove(&position) {
                state.used_bytes -= node.size;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.nodes.len()
    }
}

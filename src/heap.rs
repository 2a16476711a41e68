//! Priority queue with dead-event cancellation (C3).
//!
//! Cancellation never deletes from the heap — deleting an arbitrary interior
//! node would require re-sifting and a way to locate it. Instead `mark_dead`
//! flips a bit on the event's arena record; the heap keeps a bare index
//! ("handle") per entry and skips dead records when they reach the root.
//! The min-heap property over live+dead records together is preserved by
//! every operation, so skipping dead roots on extraction never corrupts it.

use crate::event::{Event, EventArena, EventKind};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Sort key: strict min over `timestamp`, ties broken by `bar_index`, then by
/// `id` (insertion order) so replays on identical input are byte-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey {
    timestamp: i64,
    bar_index: u32,
    id: u64,
}

pub struct EventQueue {
    arena: EventArena,
    heap: BinaryHeap<Reverse<HeapKey>>,
    live_count: usize,
    dead_skips: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            arena: EventArena::new(),
            heap: BinaryHeap::new(),
            live_count: 0,
            dead_skips: 0,
        }
    }

    /// Total dead roots discarded across all `pop`/`peek` calls so far.
    pub fn dead_skips(&self) -> u64 {
        self.dead_skips
    }

    /// Allocates and schedules one event. O(log n).
    pub fn push(&mut self, timestamp: i64, bar_index: u32, kind: EventKind) -> u64 {
        let id = self.arena.push(timestamp, bar_index, kind);
        self.heap.push(Reverse(HeapKey {
            timestamp,
            bar_index,
            id,
        }));
        self.live_count += 1;
        tracing::trace!(id, timestamp, bar_index, "push");
        id
    }

    /// Bulk-loads a batch of events, e.g. C4's initial extraction output.
    /// O(n) heapify rather than n sequential O(log n) pushes.
    pub fn push_all(&mut self, events: impl IntoIterator<Item = (i64, u32, EventKind)>) -> Vec<u64> {
        let mut ids = Vec::new();
        let mut keys = Vec::new();
        for (timestamp, bar_index, kind) in events {
            let id = self.arena.push(timestamp, bar_index, kind);
            keys.push(Reverse(HeapKey {
                timestamp,
                bar_index,
                id,
            }));
            ids.push(id);
        }
        self.live_count += ids.len();
        let mut incoming = BinaryHeap::from(keys);
        self.heap.append(&mut incoming);
        ids
    }

    /// Pops and returns the earliest live event, discarding any dead roots
    /// along the way. Amortized O(log n).
    pub fn pop(&mut self) -> Option<Event> {
        while let Some(Reverse(key)) = self.heap.pop() {
            let event = self.arena.get(key.id).expect("heap key without arena record");
            if event.is_dead {
                self.dead_skips += 1;
                continue;
            }
            let event = event.clone();
            self.live_count -= 1;
            tracing::trace!(id = event.id, timestamp = event.timestamp, "pop");
            return Some(event);
        }
        None
    }

    /// Like `pop` but does not remove the returned live event; still discards
    /// any dead roots found along the way.
    pub fn peek(&mut self) -> Option<&Event> {
        loop {
            let Reverse(key) = self.heap.peek()?;
            let id = key.id;
            let is_dead = self.arena.get(id).expect("heap key without arena record").is_dead;
            if is_dead {
                self.heap.pop();
                self.dead_skips += 1;
                continue;
            }
            return self.arena.get(id);
        }
    }

    /// O(1) cancellation via the arena side index. Idempotent: a second call
    /// on an already-dead id still returns `true`, since the id is known.
    pub fn mark_dead(&mut self, id: u64) -> bool {
        let was_live = self.arena.get(id).map(|e| !e.is_dead).unwrap_or(false);
        let known = self.arena.mark_dead(id);
        if was_live {
            self.live_count -= 1;
        }
        tracing::trace!(id, was_live, known, "mark_dead");
        known
    }

    /// Total entries still physically in the heap array, live or dead.
    pub fn size(&self) -> usize {
        self.heap.len()
    }

    /// Entries that are live and have not yet been popped.
    pub fn live_size(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_size() == 0
    }

    pub fn clear(&mut self) {
        self.arena = EventArena::new();
        self.heap.clear();
        self.live_count = 0;
    }
}

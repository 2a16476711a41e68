//! Event model and arena (C2).
//!
//! Events are a tagged sum type, not a class hierarchy: dispatch in the
//! simulator is a pattern match over [`EventKind`], never a virtual call.
//! Every event additionally carries the shared envelope fields
//! (`id`, `timestamp`, `bar_index`, `is_dead`) that the heap sorts and
//! cancels on.

use serde::{Deserialize, Serialize};

/// Trade direction. Carried as a field of the POSITION state rather than
/// splitting CASH/POSITION into four direction-specific states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

/// Which of the four named conditions an event or signal reference belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    LongEntry,
    LongExit,
    ShortEntry,
    ShortExit,
}

impl ConditionType {
    pub fn direction(self) -> Direction {
        match self {
            ConditionType::LongEntry | ConditionType::LongExit => Direction::Long,
            ConditionType::ShortEntry | ConditionType::ShortExit => Direction::Short,
        }
    }

    pub fn is_entry(self) -> bool {
        matches!(self, ConditionType::LongEntry | ConditionType::ShortEntry)
    }
}

/// The payload carried by an [`Event`], tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    SignalCrossing {
        indicator_key: String,
        condition_type: ConditionType,
        is_required: bool,
        prev: bool,
        new: bool,
    },
    ConditionMet {
        condition_type: ConditionType,
        triggering_indicator_key: String,
    },
    ConditionUnmet {
        condition_type: ConditionType,
        triggering_indicator_key: String,
    },
    SlTrigger {
        trigger_price: f64,
        entry_price: f64,
        direction: Direction,
        trade_id: u64,
        sl_level: f64,
        sub_bar_index: usize,
        checkpoint_index: u8,
    },
    TpTrigger {
        trigger_price: f64,
        entry_price: f64,
        direction: Direction,
        trade_id: u64,
        tp_level: f64,
        sub_bar_index: usize,
        checkpoint_index: u8,
    },
    TrailingTrigger {
        trigger_price: f64,
        entry_price: f64,
        direction: Direction,
        trade_id: u64,
        trailing_level: f64,
        peak_price: f64,
        sub_bar_index: usize,
        checkpoint_index: u8,
    },
    TimeoutExpired {
        trade_id: u64,
        timeout_start_bar: u32,
        cooldown_bars: u32,
    },
}

/// A single scheduled event: the shared envelope plus its tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub timestamp: i64,
    pub bar_index: u32,
    pub is_dead: bool,
    pub kind: EventKind,
}

/// Append-only store of events. `id` is the arena index, so id→record lookup
/// is O(1) and the heap can store bare indices instead of owning events itself.
#[derive(Debug, Default)]
pub struct EventArena {
    events: Vec<Event>,
}

impl EventArena {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Allocates a new event, assigning it the next monotonic id.
    pub fn push(&mut self, timestamp: i64, bar_index: u32, kind: EventKind) -> u64 {
        let id = self.events.len() as u64;
        self.events.push(Event {
            id,
            timestamp,
            bar_index,
            is_dead: false,
            kind,
        });
        id
    }

    pub fn get(&self, id: u64) -> Option<&Event> {
        self.events.get(id as usize)
    }

    /// Flips the `is_dead` bit in place; idempotent, returns `true` iff the id exists.
    pub fn mark_dead(&mut self, id: u64) -> bool {
        match self.events.get_mut(id as usize) {
            Some(event) => {
                event.is_dead = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

//! Entry/exit condition declarations and the met/unmet evaluation used by C4.

use crate::event::ConditionType;
use crate::value::ValueConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A condition is met iff every required indicator is true AND (the optional
/// set is empty OR at least one optional indicator is true).
pub fn is_met(required: &[String], optional: &[String], state: &BTreeMap<String, bool>) -> bool {
    let required_ok = required.iter().all(|k| state.get(k).copied().unwrap_or(false));
    if !required_ok {
        return false;
    }
    optional.is_empty() || optional.iter().any(|k| state.get(k).copied().unwrap_or(false))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryCondition {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitCondition {
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub stop_loss: Option<ValueConfig>,
    pub take_profit: Option<ValueConfig>,
    pub trailing_sl: bool,
}

/// Per-`ConditionType` state used by C4 stage 2 to fold signal crossings into
/// met/unmet edges. Iterates its indicator keys in sorted order so that
/// re-running on identical input produces byte-identical event streams,
/// per the determinism discipline in the design notes.
#[derive(Debug, Clone)]
pub struct ConditionTracker {
    pub condition_type: ConditionType,
    required: Vec<String>,
    optional: Vec<String>,
    state: BTreeMap<String, bool>,
    prev_met: bool,
}

impl ConditionTracker {
    pub fn new(condition_type: ConditionType, required: Vec<String>, optional: Vec<String>) -> Self {
        let mut state = BTreeMap::new();
        for key in required.iter().chain(optional.iter()) {
            state.entry(key.clone()).or_insert(false);
        }
        Self {
            condition_type,
            required,
            optional,
            state,
            prev_met: false,
        }
    }

    /// Absorbs one crossing at `key` and re-evaluates. Returns `Some(true)` on
    /// a false→true edge, `Some(false)` on a true→false edge, `None` if the
    /// met/unmet value did not change.
    pub fn absorb(&mut self, key: &str, new_value: bool) -> Option<bool> {
        if let Some(slot) = self.state.get_mut(key) {
            *slot = new_value;
        } else {
            return None; // not a key this condition tracks
        }
        let met = is_met(&self.required, &self.optional, &self.state);
        if met == self.prev_met {
            return None;
        }
        self.prev_met = met;
        Some(met)
    }

    pub fn is_met(&self) -> bool {
        self.prev_met
    }
}

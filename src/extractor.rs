//! Event extraction from pre-computed boolean signal arrays (C4).
//!
//! Two stages: scan each signal array for rising/falling edges
//! ("crossings"), then fold crossings per [`ConditionType`] into met/unmet
//! edges via [`ConditionTracker`]. The extractor never computes an
//! indicator's value itself — it only reads the boolean arrays handed to it.

use crate::config::SimulationInput;
use crate::condition::ConditionTracker;
use crate::event::{ConditionType, EventKind};
use serde::{Deserialize, Serialize};

pub type EventDraft = (i64, u32, EventKind);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionEdgeCounts {
    pub met: u32,
    pub unmet: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorStats {
    pub indicators_processed: usize,
    pub bars_processed: usize,
    pub signal_crossings: usize,
    pub long_entry: ConditionEdgeCounts,
    pub long_exit: ConditionEdgeCounts,
    pub short_entry: ConditionEdgeCounts,
    pub short_exit: ConditionEdgeCounts,
}

impl ExtractorStats {
    fn counts_mut(&mut self, ct: ConditionType) -> &mut ConditionEdgeCounts {
        match ct {
            ConditionType::LongEntry => &mut self.long_entry,
            ConditionType::LongExit => &mut self.long_exit,
            ConditionType::ShortEntry => &mut self.short_entry,
            ConditionType::ShortExit => &mut self.short_exit,
        }
    }
}

/// Reads `values[index]`, defaulting to `false` when out of range — mismatched
/// signal-array lengths are tolerated, not a fault.
fn at(values: &[bool], index: usize) -> bool {
    values.get(index).copied().unwrap_or(false)
}

/// Runs both extraction stages and returns the full initial event batch,
/// sorted by `(timestamp, bar_index, insertion order)` and ready for
/// `EventQueue::push_all`.
pub fn extract(input: &SimulationInput) -> (Vec<EventDraft>, ExtractorStats) {
    let mut stats = ExtractorStats {
        bars_processed: input.bars.len(),
        ..Default::default()
    };

    let usages = input.algo_params.indicator_usages();
    let start = input.warmup_bars.min(input.bars.len());

    // Stage 1: signal crossings, iterated in signal_cache's sorted key order
    // (a BTreeMap) so replays on identical input are deterministic.
    let mut crossings: Vec<EventDraft> = Vec::new();
    for (key, values) in &input.signal_cache {
        let uses: Vec<(ConditionType, bool)> = usages
            .iter()
            .filter(|(_, k, _)| k == key)
            .map(|(ct, _, required)| (*ct, *required))
            .collect();
        if uses.is_empty() {
            continue; // indicator belongs to no condition: silently skipped
        }
        stats.indicators_processed += 1;

        if start >= input.bars.len() {
            continue;
        }
        let mut prev = at(values, start);
        if prev {
            emit_crossing(input, &mut crossings, &mut stats, start, key, &uses, false, true);
        }
        for i in (start + 1)..input.bars.len() {
            let now = at(values, i);
            if now != prev {
                emit_crossing(input, &mut crossings, &mut stats, i, key, &uses, prev, now);
                prev = now;
            }
        }
    }
    crossings.sort_by_key(|(ts, bar, _)| (*ts, *bar));

    // Stage 2: fold crossings into per-condition met/unmet edges.
    let mut trackers = [
        tracker_for(input, ConditionType::LongEntry),
        tracker_for(input, ConditionType::LongExit),
        tracker_for(input, ConditionType::ShortEntry),
        tracker_for(input, ConditionType::ShortExit),
    ];

    let mut condition_events: Vec<EventDraft> = Vec::new();
    for (ts, bar_index, kind) in &crossings {
        let EventKind::SignalCrossing {
            indicator_key,
            condition_type,
            new,
            ..
        } = kind
        else {
            unreachable!("stage 1 only emits SignalCrossing drafts")
        };
        let tracker = trackers
            .iter_mut()
            .find(|t| t.condition_type == *condition_type)
            .expect("tracker exists for every ConditionType");
        if let Some(met) = tracker.absorb(indicator_key, *new) {
            let edge_kind = if met {
                stats.counts_mut(*condition_type).met += 1;
                EventKind::ConditionMet {
                    condition_type: *condition_type,
                    triggering_indicator_key: indicator_key.clone(),
                }
            } else {
                stats.counts_mut(*condition_type).unmet += 1;
                EventKind::ConditionUnmet {
                    condition_type: *condition_type,
                    triggering_indicator_key: indicator_key.clone(),
                }
            };
            condition_events.push((*ts, *bar_index, edge_kind));
        }
    }

    let mut out = crossings;
    out.append(&mut condition_events);
    out.sort_by_key(|(ts, bar, _)| (*ts, *bar));
    (out, stats)
}

fn tracker_for(input: &SimulationInput, ct: ConditionType) -> ConditionTracker {
    let (required, optional) = match ct {
        ConditionType::LongEntry => (
            input.algo_params.long_entry.required.clone(),
            input.algo_params.long_entry.optional.clone(),
        ),
        ConditionType::LongExit => (
            input.algo_params.long_exit.required.clone(),
            input.algo_params.long_exit.optional.clone(),
        ),
        ConditionType::ShortEntry => (
            input.algo_params.short_entry.required.clone(),
            input.algo_params.short_entry.optional.clone(),
        ),
        ConditionType::ShortExit => (
            input.algo_params.short_exit.required.clone(),
            input.algo_params.short_exit.optional.clone(),
        ),
    };
    ConditionTracker::new(ct, required, optional)
}

#[allow(clippy::too_many_arguments)]
fn emit_crossing(
    input: &SimulationInput,
    out: &mut Vec<EventDraft>,
    stats: &mut ExtractorStats,
    bar_index: usize,
    key: &str,
    uses: &[(ConditionType, bool)],
    prev: bool,
    new: bool,
) {
    let timestamp = input.bars[bar_index].bucket;
    for (condition_type, is_required) in uses {
        stats.signal_crossings += 1;
        out.push((
            timestamp,
            bar_index as u32,
            EventKind::SignalCrossing {
                indicator_key: key.to_string(),
                condition_type: *condition_type,
                is_required: *is_required,
                prev,
                new,
            },
        ));
    }
}

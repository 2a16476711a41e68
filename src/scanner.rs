//! SL/TP/trailing forward scanner (C5).
//!
//! Given a freshly opened position, walks forward through sub-bar checkpoints
//! (C1) to find the first price that would trigger a stop-loss/trailing stop,
//! and separately the first price that would trigger a take-profit, so the
//! simulator can pre-schedule both trigger events instead of re-examining
//! price on every bar. The two sides are scanned independently — each scan
//! returns at most one hit — so both a pending SL/trailing id and a pending
//! TP id can sit in the heap at once, as the dead-marking rules in the state
//! machine require.

use crate::condition::ExitCondition;
use crate::config::SimulationInput;
use crate::event::{Direction, EventKind};
use crate::extractor::EventDraft;
use crate::path::{generate_checkpoints, generate_checkpoints_for_bar};
use crate::value::{ValueConfig, ValueKind};
use std::collections::BTreeMap;

fn sl_level(entry_price: f64, direction: Direction, cfg: &ValueConfig, factor: f64) -> f64 {
    match (cfg.kind, direction) {
        (ValueKind::Abs, Direction::Long) => entry_price - cfg.value * factor,
        (ValueKind::Abs, Direction::Short) => entry_price + cfg.value * factor,
        (ValueKind::Rel | ValueKind::Dyn, Direction::Long) => entry_price * (1.0 - cfg.value * factor),
        (ValueKind::Rel | ValueKind::Dyn, Direction::Short) => entry_price * (1.0 + cfg.value * factor),
    }
}

fn tp_level(entry_price: f64, direction: Direction, cfg: &ValueConfig, factor: f64) -> f64 {
    match (cfg.kind, direction) {
        (ValueKind::Abs, Direction::Long) => entry_price + cfg.value * factor,
        (ValueKind::Abs, Direction::Short) => entry_price - cfg.value * factor,
        (ValueKind::Rel | ValueKind::Dyn, Direction::Long) => entry_price * (1.0 + cfg.value * factor),
        (ValueKind::Rel | ValueKind::Dyn, Direction::Short) => entry_price * (1.0 - cfg.value * factor),
    }
}

fn sl_hit(direction: Direction, price: f64, level: f64) -> bool {
    match direction {
        Direction::Long => price <= level,
        Direction::Short => price >= level,
    }
}

fn tp_hit(direction: Direction, price: f64, level: f64) -> bool {
    match direction {
        Direction::Long => price >= level,
        Direction::Short => price <= level,
    }
}

/// Updates a DYN level from `lookup` at `timestamp`, retaining the previous
/// value when the lookup has nothing for this checkpoint. Non-DYN configs are
/// never touched here — their level is fixed at entry.
fn refresh_dyn_level(
    current: &mut Option<f64>,
    cfg: &ValueConfig,
    lookup: &BTreeMap<i64, f64>,
    timestamp: i64,
    entry_price: f64,
    direction: Direction,
    is_stop_loss: bool,
) {
    if cfg.kind != ValueKind::Dyn {
        return;
    }
    if let Some(factor) = lookup.get(&timestamp) {
        *current = Some(if is_stop_loss {
            sl_level(entry_price, direction, cfg, *factor)
        } else {
            tp_level(entry_price, direction, cfg, *factor)
        });
    } else {
        tracing::warn!(timestamp, "missing DYN factor lookup value, retaining last level");
    }
}

fn checkpoints_for_bar(input: &SimulationInput, bar_index: usize) -> Vec<crate::path::Checkpoint> {
    match input.sub_bar_candles.get(&bar_index) {
        Some(subs) => generate_checkpoints(subs, input.execution.default_sub_bar_duration_seconds),
        None => {
            tracing::warn!(bar_index, "no sub-bar candles, falling back to OHLC path reconstruction");
            generate_checkpoints_for_bar(&input.bars[bar_index], input.execution.default_sub_bar_duration_seconds)
        }
    }
}

/// Default cap on how many bars the forward scan walks before giving up.
pub const DEFAULT_MAX_BARS_TO_SCAN: usize = usize::MAX;

/// Forward-scans from `entry_bar + 1` for the first stop-loss or trailing-stop
/// hit. Returns at most one trigger event; if `trailing_sl` is set the scan
/// tracks the trailing level instead of the fixed SL level.
pub fn scan_stop(
    input: &SimulationInput,
    entry_bar: usize,
    entry_price: f64,
    direction: Direction,
    trade_id: u64,
    exit: &ExitCondition,
    max_bars_to_scan: usize,
) -> Option<EventDraft> {
    let stop_loss = exit.stop_loss.as_ref()?;

    let mut level = sl_level(entry_price, direction, stop_loss, stop_loss.initial_factor());
    let mut trailing_level = if exit.trailing_sl { Some(level) } else { None };
    let mut extreme_price = entry_price;

    let end = input.bars.len().min(entry_bar.saturating_add(1).saturating_add(max_bars_to_scan));
    for bar_index in (entry_bar + 1)..end {
        for cp in checkpoints_for_bar(input, bar_index) {
            let mut current = Some(level);
            refresh_dyn_level(
                &mut current,
                stop_loss,
                &input.sl_factor_lookup,
                cp.timestamp,
                entry_price,
                direction,
                true,
            );
            level = current.expect("refresh_dyn_level never clears a Some");

            if exit.trailing_sl {
                let favorable = match direction {
                    Direction::Long => cp.price > extreme_price,
                    Direction::Short => cp.price < extreme_price,
                };
                if favorable {
                    extreme_price = cp.price;
                    trailing_level = Some(sl_level(extreme_price, direction, stop_loss, 1.0));
                }
                if let Some(tl) = trailing_level {
                    if sl_hit(direction, cp.price, tl) {
                        return Some((
                            cp.timestamp,
                            bar_index as u32,
                            EventKind::TrailingTrigger {
                                trigger_price: cp.price,
                                entry_price,
                                direction,
                                trade_id,
                                trailing_level: tl,
                                peak_price: extreme_price,
                                sub_bar_index: cp.sub_bar_index,
                                checkpoint_index: cp.checkpoint_index,
                            },
                        ));
                    }
                }
            } else if sl_hit(direction, cp.price, level) {
                return Some((
                    cp.timestamp,
                    bar_index as u32,
                    EventKind::SlTrigger {
                        trigger_price: cp.price,
                        entry_price,
                        direction,
                        trade_id,
                        sl_level: level,
                        sub_bar_index: cp.sub_bar_index,
                        checkpoint_index: cp.checkpoint_index,
                    },
                ));
            }
        }
    }
    None
}

/// Forward-scans from `entry_bar + 1` for the first take-profit hit,
/// independently of any stop-loss/trailing scan. Returns at most one event.
pub fn scan_take_profit(
    input: &SimulationInput,
    entry_bar: usize,
    entry_price: f64,
    direction: Direction,
    trade_id: u64,
    exit: &ExitCondition,
    max_bars_to_scan: usize,
) -> Option<EventDraft> {
    let take_profit = exit.take_profit.as_ref()?;

    let mut level = tp_level(entry_price, direction, take_profit, take_profit.initial_factor());

    let end = input.bars.len().min(entry_bar.saturating_add(1).saturating_add(max_bars_to_scan));
    for bar_index in (entry_bar + 1)..end {
        for cp in checkpoints_for_bar(input, bar_index) {
            let mut current = Some(level);
            refresh_dyn_level(
                &mut current,
                take_profit,
                &input.tp_factor_lookup,
                cp.timestamp,
                entry_price,
                direction,
                false,
            );
            level = current.expect("refresh_dyn_level never clears a Some");

            if tp_hit(direction, cp.price, level) {
                return Some((
                    cp.timestamp,
                    bar_index as u32,
                    EventKind::TpTrigger {
                        trigger_price: cp.price,
                        entry_price,
                        direction,
                        trade_id,
                        tp_level: level,
                        sub_bar_index: cp.sub_bar_index,
                        checkpoint_index: cp.checkpoint_index,
                    },
                ));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::Bar;
    use crate::config::{AlgoParams, ExecutionParams};

    fn bars_with_low_dip(dip_bar: usize, low: f64) -> Vec<Bar> {
        (0..10)
            .map(|i| {
                let close = 100.0 + i as f64;
                if i == dip_bar {
                    Bar::new(i as i64 * 60, close - 1.0, close + 1.0, low, close, 0.0)
                } else {
                    Bar::new(i as i64 * 60, close - 1.0, close + 1.0, close - 2.0, close, 0.0)
                }
            })
            .collect()
    }

    fn input_with(bars: Vec<Bar>) -> SimulationInput {
        SimulationInput::new(bars, AlgoParams::default(), ExecutionParams::default())
    }

    #[test]
    fn no_trigger_when_stop_not_configured() {
        let input = input_with(bars_with_low_dip(5, 50.0));
        let exit = ExitCondition::default();
        assert!(scan_stop(&input, 0, 100.0, Direction::Long, 1, &exit, usize::MAX).is_none());
        assert!(scan_take_profit(&input, 0, 100.0, Direction::Long, 1, &exit, usize::MAX).is_none());
    }

    #[test]
    fn sl_fires_on_dip() {
        let input = input_with(bars_with_low_dip(3, 95.0));
        let exit = ExitCondition {
            stop_loss: Some(ValueConfig::rel(0.02)),
            ..Default::default()
        };
        let trigger = scan_stop(&input, 0, 101.0, Direction::Long, 1, &exit, usize::MAX);
        match trigger {
            Some((_, bar_index, EventKind::SlTrigger { .. })) => assert_eq!(bar_index, 3),
            other => panic!("expected SlTrigger at bar 3, got {other:?}"),
        }
    }

    #[test]
    fn tp_fires_on_spike() {
        let bars: Vec<Bar> = vec![
            Bar::new(0, 100.0, 101.0, 99.0, 100.0, 0.0),
            Bar::new(60, 100.0, 108.0, 99.0, 102.0, 0.0), // high spikes through TP level
        ];
        let input = input_with(bars);
        let exit = ExitCondition {
            take_profit: Some(ValueConfig::rel(0.05)),
            ..Default::default()
        };
        let trigger = scan_take_profit(&input, 0, 100.0, Direction::Long, 1, &exit, usize::MAX);
        assert!(matches!(trigger, Some((_, 1, EventKind::TpTrigger { .. }))));
    }

    #[test]
    fn tp_never_fires_when_level_out_of_range() {
        let input = input_with(bars_with_low_dip(3, 98.0));
        let exit = ExitCondition {
            take_profit: Some(ValueConfig::rel(0.9)),
            ..Default::default()
        };
        assert!(scan_take_profit(&input, 0, 101.0, Direction::Long, 1, &exit, usize::MAX).is_none());
    }

    #[test]
    fn trailing_tightens_and_fires_on_pullback() {
        let bars: Vec<Bar> = vec![
            Bar::new(0, 100.0, 100.0, 100.0, 100.0, 0.0),
            Bar::new(60, 100.0, 110.0, 100.0, 110.0, 0.0), // rallies, extreme updates
            Bar::new(120, 110.0, 110.0, 104.0, 104.0, 0.0), // pulls back
        ];
        let input = input_with(bars);
        let exit = ExitCondition {
            stop_loss: Some(ValueConfig::rel(0.05)),
            trailing_sl: true,
            ..Default::default()
        };
        let trigger = scan_stop(&input, 0, 100.0, Direction::Long, 1, &exit, usize::MAX);
        assert!(matches!(trigger, Some((_, 2, EventKind::TrailingTrigger { .. }))));
    }

    #[test]
    fn sl_and_tp_scans_are_independent_and_both_schedulable() {
        let bars: Vec<Bar> = vec![
            Bar::new(0, 100.0, 101.0, 99.0, 100.0, 0.0),
            Bar::new(60, 100.0, 100.0, 95.0, 96.0, 0.0), // dips through SL, never near TP
        ];
        let input = input_with(bars);
        let exit = ExitCondition {
            stop_loss: Some(ValueConfig::rel(0.02)),
            take_profit: Some(ValueConfig::rel(0.5)),
            ..Default::default()
        };
        let sl = scan_stop(&input, 0, 100.0, Direction::Long, 1, &exit, usize::MAX);
        let tp = scan_take_profit(&input, 0, 100.0, Direction::Long, 1, &exit, usize::MAX);
        assert!(matches!(sl, Some((_, 1, EventKind::SlTrigger { .. }))));
        assert!(tp.is_none());
    }
}

//! State machine / simulator (C6).
//!
//! Pops events from the priority queue in order and drives a 3-state
//! automaton over them: `CASH` (no position), `POSITION` (direction carried
//! as a field rather than splitting into LONG/SHORT states), `TIMEOUT`
//! (post-exit cooldown). Entries schedule SL/TP triggers via C5; exits
//! dead-mark whichever of those never fired.

use crate::condition::ExitCondition;
use crate::config::{SimulationInput, TimeoutMode};
use crate::error::{Result, SimError};
use crate::event::{ConditionType, Direction, Event, EventKind};
use crate::extractor::{self, ExtractorStats};
use crate::heap::EventQueue;
use crate::scanner;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Boundary precondition check (§7/§12). Must pass before `Simulator::run`
/// is ever called — the engine loop itself is infallible once these hold.
pub fn validate_input(input: &SimulationInput) -> Result<()> {
    if input.bars.is_empty() {
        return Err(SimError::EmptyBars);
    }
    if input.execution.bar_duration_seconds <= 0 {
        return Err(SimError::NonPositiveBarDuration(input.execution.bar_duration_seconds));
    }
    for (bar_index, pair) in input.bars.windows(2).enumerate() {
        if pair[1].bucket <= pair[0].bucket {
            return Err(SimError::UnorderedBars { bar_index: bar_index + 1 });
        }
    }
    for (bar_index, bar) in input.bars.iter().enumerate() {
        if bar.has_non_finite() {
            return Err(SimError::NonFiniteBar { bar_index });
        }
    }
    Ok(())
}

/// The three-state automaton. Direction lives on `Position` itself so there
/// is no separate LONG/SHORT split, per the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimState {
    Cash,
    Position(Direction),
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    ExitSignal,
    EndOfBacktest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapEvent {
    pub id: u64,
    pub timestamp: i64,
    pub bar_index: u32,
    pub from_asset: String,
    pub to_asset: String,
    pub from_amount: f64,
    pub to_amount: f64,
    pub price: f64,
    pub fee_usd: f64,
    pub slippage_usd: f64,
    pub is_entry: bool,
    pub trade_direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: u64,
    pub direction: Direction,
    pub entry: SwapEvent,
    pub exit: SwapEvent,
    pub exit_reason: ExitReason,
    pub pnl_usd: f64,
    pub pnl_pct: f64,
    pub duration_bars: u32,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub bar_index: u32,
    pub equity: f64,
    pub drawdown_pct: f64,
    pub position: SimState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub timestamp: i64,
    pub bar_index: u32,
    pub from: SimState,
    pub to: SimState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimStats {
    pub events_processed: u64,
    pub dead_skips: u64,
    pub entries: u32,
    pub exits: u32,
    pub sl_triggered: u32,
    pub tp_triggered: u32,
    pub trailing_triggered: u32,
    pub signal_exits: u32,
    pub timeout_completions: u32,
    pub trade_pairing_anomalies: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorResult {
    pub swap_events: Vec<SwapEvent>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub state_transitions: Vec<StateTransition>,
    pub final_state: SimState,
    pub final_equity: f64,
    pub stats: SimStats,
    pub extractor_stats: ExtractorStats,
}

/// Per-position bookkeeping carried only while `state == Position(_)`.
#[derive(Debug, Clone)]
struct PositionInfo {
    direction: Direction,
    entry_price: f64,
    trade_id: u64,
    position_size: f64,
    entry_value: f64,
    pending_sl_event_id: Option<u64>,
    pending_tp_event_id: Option<u64>,
}

/// Per-cooldown bookkeeping carried only while `state == Timeout`.
#[derive(Debug, Clone, Copy)]
struct TimeoutInfo {
    timeout_direction: Direction,
    cooldown_end_bar: u32,
    cooldown_complete: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct ConditionFlags {
    long_entry: bool,
    long_exit: bool,
    short_entry: bool,
    short_exit: bool,
}

impl ConditionFlags {
    fn get(&self, ct: ConditionType) -> bool {
        match ct {
            ConditionType::LongEntry => self.long_entry,
            ConditionType::LongExit => self.long_exit,
            ConditionType::ShortEntry => self.short_entry,
            ConditionType::ShortExit => self.short_exit,
        }
    }

    fn set(&mut self, ct: ConditionType, value: bool) {
        match ct {
            ConditionType::LongEntry => self.long_entry = value,
            ConditionType::LongExit => self.long_exit = value,
            ConditionType::ShortEntry => self.short_entry = value,
            ConditionType::ShortExit => self.short_exit = value,
        }
    }
}

fn opposite(direction: Direction) -> Direction {
    match direction {
        Direction::Long => Direction::Short,
        Direction::Short => Direction::Long,
    }
}

fn entry_condition_type(direction: Direction) -> ConditionType {
    match direction {
        Direction::Long => ConditionType::LongEntry,
        Direction::Short => ConditionType::ShortEntry,
    }
}

fn exit_condition_type(direction: Direction) -> ConditionType {
    match direction {
        Direction::Long => ConditionType::LongExit,
        Direction::Short => ConditionType::ShortExit,
    }
}

fn direction_permitted(input: &SimulationInput, direction: Direction) -> bool {
    match direction {
        Direction::Long => input.algo_params.trade_type.long_permitted(),
        Direction::Short => input.algo_params.trade_type.short_permitted(),
    }
}

fn exit_condition_for<'a>(input: &'a SimulationInput, direction: Direction) -> &'a ExitCondition {
    match direction {
        Direction::Long => &input.algo_params.long_exit,
        Direction::Short => &input.algo_params.short_exit,
    }
}

/// Resolves the price to attribute to a popped event: the event's own
/// `trigger_price` for price events, else the referenced bar's close.
fn price_for(input: &SimulationInput, event: &Event) -> f64 {
    match &event.kind {
        EventKind::SlTrigger { trigger_price, .. }
        | EventKind::TpTrigger { trigger_price, .. }
        | EventKind::TrailingTrigger { trigger_price, .. } => *trigger_price,
        _ => {
            let idx = (event.bar_index as usize).min(input.bars.len().saturating_sub(1));
            input.bars[idx].close
        }
    }
}

struct EntryExecution {
    swap: SwapEvent,
    position: PositionInfo,
}

#[allow(clippy::too_many_arguments)]
fn execute_entry(
    input: &SimulationInput,
    direction: Direction,
    timestamp: i64,
    bar_index: u32,
    price: f64,
    equity: f64,
    trade_id: u64,
    swap_id: u64,
) -> EntryExecution {
    let position_value = input.algo_params.position_size.position_value(equity);
    let fee_usd = position_value * input.execution.fee_bps / 10_000.0;
    let slippage_usd = position_value * input.execution.slippage_bps / 10_000.0;
    let asset_amount = (position_value - fee_usd - slippage_usd) / price;
    let swap = SwapEvent {
        id: swap_id,
        timestamp,
        bar_index,
        from_asset: "USD".to_string(),
        to_asset: input.execution.symbol.clone(),
        from_amount: position_value,
        to_amount: asset_amount,
        price,
        fee_usd,
        slippage_usd,
        is_entry: true,
        trade_direction: direction,
    };
    let position = PositionInfo {
        direction,
        entry_price: price,
        trade_id,
        position_size: asset_amount,
        entry_value: position_value,
        pending_sl_event_id: None,
        pending_tp_event_id: None,
    };
    EntryExecution { swap, position }
}

struct ExitExecution {
    swap: SwapEvent,
    new_equity: f64,
}

fn execute_exit(
    input: &SimulationInput,
    position: &PositionInfo,
    timestamp: i64,
    bar_index: u32,
    price: f64,
    equity: f64,
    swap_id: u64,
) -> ExitExecution {
    let gross = position.position_size * price;
    let fee_usd = gross * input.execution.fee_bps / 10_000.0;
    let slippage_usd = gross * input.execution.slippage_bps / 10_000.0;
    let net = gross - fee_usd - slippage_usd;
    let swap = SwapEvent {
        id: swap_id,
        timestamp,
        bar_index,
        from_asset: input.execution.symbol.clone(),
        to_asset: "USD".to_string(),
        from_amount: position.position_size,
        to_amount: net,
        price,
        fee_usd,
        slippage_usd,
        is_entry: false,
        trade_direction: position.direction,
    };
    let new_equity = (equity - position.entry_value) + net;
    ExitExecution { swap, new_equity }
}

fn pair_trade(entry: SwapEvent, exit: SwapEvent, exit_reason: ExitReason, trade_id: u64) -> Trade {
    let pnl_usd = exit.to_amount - entry.from_amount;
    let pnl_pct = if entry.from_amount != 0.0 {
        pnl_usd / entry.from_amount * 100.0
    } else {
        0.0
    };
    let duration_bars = exit.bar_index.saturating_sub(entry.bar_index);
    let duration_seconds = exit.timestamp - entry.timestamp;
    Trade {
        trade_id,
        direction: entry.trade_direction,
        entry,
        exit,
        exit_reason,
        pnl_usd,
        pnl_pct,
        duration_bars,
        duration_seconds,
    }
}

/// Namespace for the engine's single public entry point. A unit struct
/// rather than a free function so call sites read `Simulator::run(...)`.
pub struct Simulator;

impl Simulator {
    /// Runs the full event-driven simulation over `input` and returns every
    /// observable output. Infallible: boundary faults are caught by
    /// `validate_input` before this is ever called.
    pub fn run(input: &SimulationInput) -> SimulatorResult {
        let span = tracing::info_span!("simulate", bars = input.bars.len());
        let _enter = span.enter();

        let (drafts, extractor_stats) = extractor::extract(input);
        let mut queue = EventQueue::new();
        queue.push_all(drafts);

        let mut state = SimState::Cash;
        let mut position: Option<PositionInfo> = None;
        let mut timeout: Option<TimeoutInfo> = None;
        let mut flags = ConditionFlags::default();

        let mut equity = input.execution.initial_capital;
        let mut peak_equity = equity;
        let mut entries_count: u32 = 0;
        let mut next_swap_id: u64 = 0;
        let mut next_trade_id: u64 = 1;

        let mut swap_events: Vec<SwapEvent> = Vec::new();
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();
        let mut state_transitions: Vec<StateTransition> = Vec::new();
        let mut unpaired_entries: VecDeque<SwapEvent> = VecDeque::new();
        let mut stats = SimStats::default();

        let trades_limit = input.execution.trades_limit.unwrap_or(u32::MAX);

        while let Some(event) = queue.pop() {
            stats.events_processed += 1;
            stats.dead_skips = queue.dead_skips();

            let timestamp = event.timestamp;
            let bar_index = event.bar_index;
            let current_price = price_for(input, &event);

            if let EventKind::ConditionMet { condition_type, .. } = &event.kind {
                flags.set(*condition_type, true);
            } else if let EventKind::ConditionUnmet { condition_type, .. } = &event.kind {
                flags.set(*condition_type, false);
            }

            let before = state;

            match state {
                SimState::Cash => {
                    if let EventKind::ConditionMet { condition_type, .. } = &event.kind {
                        let direction = match condition_type {
                            ConditionType::LongEntry => Some(Direction::Long),
                            ConditionType::ShortEntry => Some(Direction::Short),
                            _ => None,
                        };
                        if let Some(direction) = direction {
                            if direction_permitted(input, direction) && entries_count < trades_limit {
                                open_position(
                                    input,
                                    direction,
                                    timestamp,
                                    bar_index,
                                    current_price,
                                    &mut equity,
                                    &mut next_swap_id,
                                    &mut next_trade_id,
                                    &mut entries_count,
                                    &mut swap_events,
                                    &mut unpaired_entries,
                                    &mut queue,
                                    &mut position,
                                    &mut stats,
                                );
                                state = SimState::Position(direction);
                            }
                        }
                    }
                }
                SimState::Position(direction) => {
                    let exit_ct = exit_condition_type(direction);
                    let reason = match &event.kind {
                        EventKind::SlTrigger { .. } => Some(ExitReason::StopLoss),
                        EventKind::TrailingTrigger { .. } => Some(ExitReason::TrailingStop),
                        EventKind::TpTrigger { .. } => Some(ExitReason::TakeProfit),
                        EventKind::ConditionMet { condition_type, .. } if *condition_type == exit_ct => {
                            Some(ExitReason::ExitSignal)
                        }
                        _ => None,
                    };
                    if let Some(reason) = reason {
                        let pos = position.take().expect("POSITION state implies a stored position");
                        dead_mark_pending(&mut queue, &pos, reason);
                        let next_state = close_position(
                            input,
                            pos,
                            reason,
                            timestamp,
                            bar_index,
                            current_price,
                            &mut equity,
                            &mut peak_equity,
                            &mut next_swap_id,
                            &mut swap_events,
                            &mut trades,
                            &mut equity_curve,
                            &mut unpaired_entries,
                            &mut queue,
                            &mut timeout,
                            input.algo_params.timeout.cooldown_bars,
                            &mut stats,
                        );
                        state = next_state;
                    }
                }
                SimState::Timeout => {
                    let t = timeout.as_mut().expect("TIMEOUT state implies stored cooldown info");
                    let expired_here = matches!(event.kind, EventKind::TimeoutExpired { .. });
                    if expired_here || bar_index >= t.cooldown_end_bar {
                        t.cooldown_complete = true;
                    }
                    if t.cooldown_complete {
                        let resolved = resolve_timeout(
                            input,
                            *t,
                            &event,
                            &flags,
                            timestamp,
                            bar_index,
                            current_price,
                            &mut equity,
                            &mut next_swap_id,
                            &mut next_trade_id,
                            &mut entries_count,
                            &mut swap_events,
                            &mut unpaired_entries,
                            &mut queue,
                            &mut position,
                            &mut stats,
                        );
                        if let Some(next_state) = resolved {
                            stats.timeout_completions += 1;
                            timeout = None;
                            state = next_state;
                        }
                    }
                }
            }

            if before != state {
                tracing::debug!(?before, ?state, bar_index, "state transition");
                state_transitions.push(StateTransition {
                    timestamp,
                    bar_index,
                    from: before,
                    to: state,
                });
            }
        }

        if input.execution.close_position_on_exit {
            if let SimState::Position(_) = state {
                if let Some(last_bar) = input.bars.last() {
                    let pos = position.take().expect("POSITION state implies a stored position");
                    dead_mark_pending(&mut queue, &pos, ExitReason::EndOfBacktest);
                    let bar_index = (input.bars.len() - 1) as u32;
                    close_position(
                        input,
                        pos,
                        ExitReason::EndOfBacktest,
                        last_bar.bucket,
                        bar_index,
                        last_bar.close,
                        &mut equity,
                        &mut peak_equity,
                        &mut next_swap_id,
                        &mut swap_events,
                        &mut trades,
                        &mut equity_curve,
                        &mut unpaired_entries,
                        &mut queue,
                        &mut None,
                        0,
                        &mut stats,
                    );
                    tracing::debug!(bar_index, "forced close at end of backtest");
                    state_transitions.push(StateTransition {
                        timestamp: last_bar.bucket,
                        bar_index,
                        from: SimState::Position(pos_direction(&state)),
                        to: SimState::Cash,
                    });
                    state = SimState::Cash;
                }
            }
        }

        stats.dead_skips = queue.dead_skips();

        SimulatorResult {
            swap_events,
            trades,
            equity_curve,
            state_transitions,
            final_state: state,
            final_equity: equity,
            stats,
            extractor_stats,
        }
    }
}

fn pos_direction(state: &SimState) -> Direction {
    match state {
        SimState::Position(d) => *d,
        _ => Direction::Long,
    }
}

#[allow(clippy::too_many_arguments)]
fn open_position(
    input: &SimulationInput,
    direction: Direction,
    timestamp: i64,
    bar_index: u32,
    price: f64,
    equity: &mut f64,
    next_swap_id: &mut u64,
    next_trade_id: &mut u64,
    entries_count: &mut u32,
    swap_events: &mut Vec<SwapEvent>,
    unpaired_entries: &mut VecDeque<SwapEvent>,
    queue: &mut EventQueue,
    position_slot: &mut Option<PositionInfo>,
    stats: &mut SimStats,
) {
    let trade_id = *next_trade_id;
    *next_trade_id += 1;
    let swap_id = *next_swap_id;
    *next_swap_id += 1;

    let execution = execute_entry(input, direction, timestamp, bar_index, price, *equity, trade_id, swap_id);
    let mut pos = execution.position;

    let exit = exit_condition_for(input, direction);
    let entry_bar = bar_index as usize;
    if let Some((ts, bi, kind)) =
        scanner::scan_stop(input, entry_bar, price, direction, trade_id, exit, scanner::DEFAULT_MAX_BARS_TO_SCAN)
    {
        pos.pending_sl_event_id = Some(queue.push(ts, bi, kind));
    }
    if let Some((ts, bi, kind)) = scanner::scan_take_profit(
        input,
        entry_bar,
        price,
        direction,
        trade_id,
        exit,
        scanner::DEFAULT_MAX_BARS_TO_SCAN,
    ) {
        pos.pending_tp_event_id = Some(queue.push(ts, bi, kind));
    }

    tracing::debug!(?direction, bar_index, price, trade_id, "entry executed");
    swap_events.push(execution.swap.clone());
    unpaired_entries.push_back(execution.swap);
    *position_slot = Some(pos);
    *entries_count += 1;
    stats.entries += 1;
}

fn dead_mark_pending(queue: &mut EventQueue, pos: &PositionInfo, reason: ExitReason) {
    match reason {
        ExitReason::StopLoss | ExitReason::TrailingStop => {
            if let Some(id) = pos.pending_tp_event_id {
                queue.mark_dead(id);
            }
        }
        ExitReason::TakeProfit => {
            if let Some(id) = pos.pending_sl_event_id {
                queue.mark_dead(id);
            }
        }
        ExitReason::ExitSignal | ExitReason::EndOfBacktest => {
            if let Some(id) = pos.pending_sl_event_id {
                queue.mark_dead(id);
            }
            if let Some(id) = pos.pending_tp_event_id {
                queue.mark_dead(id);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn close_position(
    input: &SimulationInput,
    pos: PositionInfo,
    reason: ExitReason,
    timestamp: i64,
    bar_index: u32,
    price: f64,
    equity: &mut f64,
    peak_equity: &mut f64,
    next_swap_id: &mut u64,
    swap_events: &mut Vec<SwapEvent>,
    trades: &mut Vec<Trade>,
    equity_curve: &mut Vec<EquityPoint>,
    unpaired_entries: &mut VecDeque<SwapEvent>,
    queue: &mut EventQueue,
    timeout_slot: &mut Option<TimeoutInfo>,
    cooldown_bars: u32,
    stats: &mut SimStats,
) -> SimState {
    let swap_id = *next_swap_id;
    *next_swap_id += 1;
    let direction = pos.direction;
    let trade_id = pos.trade_id;

    let execution = execute_exit(input, &pos, timestamp, bar_index, price, *equity, swap_id);
    *equity = execution.new_equity;
    *peak_equity = peak_equity.max(*equity);

    swap_events.push(execution.swap.clone());
    match unpaired_entries.pop_front() {
        Some(entry) => trades.push(pair_trade(entry, execution.swap, reason, trade_id)),
        None => {
            tracing::warn!(trade_id, "exit with no preceding entry, trade pairing anomaly");
            stats.trade_pairing_anomalies += 1;
        }
    }

    let drawdown_pct = if *peak_equity > 0.0 {
        ((*peak_equity - *equity) / *peak_equity * 100.0).max(0.0)
    } else {
        0.0
    };

    match reason {
        ExitReason::StopLoss => stats.sl_triggered += 1,
        ExitReason::TakeProfit => stats.tp_triggered += 1,
        ExitReason::TrailingStop => stats.trailing_triggered += 1,
        ExitReason::ExitSignal => stats.signal_exits += 1,
        ExitReason::EndOfBacktest => {}
    }
    stats.exits += 1;

    tracing::debug!(?direction, bar_index, ?reason, equity = *equity, "exit executed");

    let next_state = if cooldown_bars > 0 && !matches!(reason, ExitReason::EndOfBacktest) {
        let cooldown_end_bar = bar_index + cooldown_bars;
        let cooldown_timestamp = timestamp + cooldown_bars as i64 * input.execution.bar_duration_seconds;
        queue.push(
            cooldown_timestamp,
            cooldown_end_bar,
            EventKind::TimeoutExpired {
                trade_id,
                timeout_start_bar: bar_index,
                cooldown_bars,
            },
        );
        *timeout_slot = Some(TimeoutInfo {
            timeout_direction: direction,
            cooldown_end_bar,
            cooldown_complete: false,
        });
        SimState::Timeout
    } else {
        SimState::Cash
    };

    equity_curve.push(EquityPoint {
        timestamp,
        bar_index,
        equity: *equity,
        drawdown_pct,
        position: next_state,
    });

    next_state
}

#[allow(clippy::too_many_arguments)]
fn resolve_timeout(
    input: &SimulationInput,
    t: TimeoutInfo,
    event: &Event,
    flags: &ConditionFlags,
    timestamp: i64,
    bar_index: u32,
    price: f64,
    equity: &mut f64,
    next_swap_id: &mut u64,
    next_trade_id: &mut u64,
    entries_count: &mut u32,
    swap_events: &mut Vec<SwapEvent>,
    unpaired_entries: &mut VecDeque<SwapEvent>,
    queue: &mut EventQueue,
    position_slot: &mut Option<PositionInfo>,
    stats: &mut SimStats,
) -> Option<SimState> {
    let current_entry_type = match &event.kind {
        EventKind::ConditionMet { condition_type, .. } if condition_type.is_entry() => Some(*condition_type),
        _ => None,
    };
    let trades_limit = input.execution.trades_limit.unwrap_or(u32::MAX);

    match input.algo_params.timeout.mode {
        TimeoutMode::CooldownOnly => {
            let same_ct = entry_condition_type(t.timeout_direction);
            if current_entry_type == Some(same_ct) && direction_permitted(input, t.timeout_direction) && *entries_count < trades_limit {
                open_position(
                    input,
                    t.timeout_direction,
                    timestamp,
                    bar_index,
                    price,
                    equity,
                    next_swap_id,
                    next_trade_id,
                    entries_count,
                    swap_events,
                    unpaired_entries,
                    queue,
                    position_slot,
                    stats,
                );
                Some(SimState::Position(t.timeout_direction))
            } else {
                Some(SimState::Cash)
            }
        }
        TimeoutMode::Regular => {
            let opp = opposite(t.timeout_direction);
            let opp_ct = entry_condition_type(opp);
            if current_entry_type == Some(opp_ct) && direction_permitted(input, opp) && *entries_count < trades_limit {
                open_position(
                    input,
                    opp,
                    timestamp,
                    bar_index,
                    price,
                    equity,
                    next_swap_id,
                    next_trade_id,
                    entries_count,
                    swap_events,
                    unpaired_entries,
                    queue,
                    position_slot,
                    stats,
                );
                Some(SimState::Position(opp))
            } else if !flags.get(entry_condition_type(t.timeout_direction)) {
                Some(SimState::Cash)
            } else {
                None
            }
        }
        TimeoutMode::Strict => {
            if !flags.get(ConditionType::LongEntry) && !flags.get(ConditionType::ShortEntry) {
                Some(SimState::Cash)
            } else {
                None
            }
        }
    }
}

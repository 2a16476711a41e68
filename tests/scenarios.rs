//! Golden scenarios — literal, hand-computed expected values for the six
//! concrete cases named in the design notes (S1-S6). Each test constructs a
//! tiny deterministic bar set and checks exact entry/exit prices, pnl, and
//! state-machine transitions. If any of these change, the engine's observable
//! behavior changed — investigate before updating the expected values.

use backtest_engine::config::{AlgoParams, ExecutionParams, SimulationInput, TimeoutConfig, TimeoutMode};
use backtest_engine::bar::Bar;
use backtest_engine::condition::{EntryCondition, ExitCondition};
use backtest_engine::config::TradeType;
use backtest_engine::simulator::{ExitReason, SimState, Simulator};
use backtest_engine::value::ValueConfig;

fn linear_bars(n: usize, start: f64) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = start + i as f64;
            Bar::new(i as i64 * 60, close - 1.0, close + 0.5, close - 1.5, close, 0.0)
        })
        .collect()
}

fn long_only_algo(entry_required: &[&str], exit_required: &[&str]) -> AlgoParams {
    let mut p = AlgoParams::default().with_trade_type(TradeType::Long);
    p.long_entry = EntryCondition {
        required: entry_required.iter().map(|s| s.to_string()).collect(),
        optional: vec![],
    };
    p.long_exit = ExitCondition {
        required: exit_required.iter().map(|s| s.to_string()).collect(),
        optional: vec![],
        stop_loss: None,
        take_profit: None,
        trailing_sl: false,
    };
    p
}

fn rising_from(n: usize, true_from: usize) -> Vec<bool> {
    (0..n).map(|i| i >= true_from).collect()
}

/// S1 - single long trade, signal exit.
#[test]
fn s1_single_long_trade_signal_exit() {
    let bars = linear_bars(10, 100.0);
    let algo = long_only_algo(&["entry"], &["exit"]).with_position_size(ValueConfig::rel(1.0));
    let exec = ExecutionParams::default()
        .with_initial_capital(10_000.0)
        .with_fees(10.0, 5.0);
    let input = SimulationInput::new(bars, algo, exec)
        .with_signal("entry", rising_from(10, 1))
        .with_signal("exit", rising_from(10, 5));

    let result = Simulator::run(&input);
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert!((trade.entry.price - 101.0).abs() < 1e-9);
    assert!((trade.exit.price - 105.0).abs() < 1e-9);
    assert!((trade.pnl_pct - 3.6487487623762354).abs() < 1e-6);
    assert_eq!(result.final_state, SimState::Cash);
    assert_eq!(result.stats.signal_exits, 1);
}

/// S2 - SL trigger pre-empts signal exit.
#[test]
fn s2_sl_preempts_signal_exit() {
    let mut bars = linear_bars(10, 100.0);
    bars[3] = Bar::new(3 * 60, 102.0, 103.5, 95.0, 103.0, 0.0); // dip through SL
    let mut algo = long_only_algo(&["entry"], &["exit"]);
    algo.long_exit.stop_loss = Some(ValueConfig::rel(0.02));

    let input = SimulationInput::new(bars, algo, ExecutionParams::default())
        .with_signal("entry", rising_from(10, 1))
        .with_signal("exit", rising_from(10, 5));

    let result = Simulator::run(&input);
    assert_eq!(result.stats.sl_triggered, 1);
    assert_eq!(result.stats.signal_exits, 0);
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert!((trade.entry.price - 101.0).abs() < 1e-9);
    assert!((trade.exit.price - 95.0).abs() < 1e-9);
    assert!((trade.pnl_pct - (-5.94059405940594)).abs() < 1e-6);
}

/// S3 - TP trigger pre-empts SL (mirror of S2).
#[test]
fn s3_tp_preempts_sl() {
    let mut bars = linear_bars(10, 100.0);
    bars[3] = Bar::new(3 * 60, 102.0, 110.0, 100.5, 103.0, 0.0); // spike through TP
    let mut algo = long_only_algo(&["entry"], &["exit"]);
    algo.long_exit.stop_loss = Some(ValueConfig::rel(0.1)); // far away, never hit here
    algo.long_exit.take_profit = Some(ValueConfig::rel(0.05));

    let input = SimulationInput::new(bars, algo, ExecutionParams::default())
        .with_signal("entry", rising_from(10, 1))
        .with_signal("exit", rising_from(10, 5));

    let result = Simulator::run(&input);
    assert_eq!(result.stats.tp_triggered, 1);
    assert_eq!(result.stats.sl_triggered, 0);
    assert_eq!(result.stats.signal_exits, 0);
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
    assert!((trade.entry.price - 101.0).abs() < 1e-9);
    assert!((trade.exit.price - 110.0).abs() < 1e-9);
    assert!((trade.pnl_pct - 8.910891089108917).abs() < 1e-6);
}

/// S4 - dead-event cancellation via signal exit: SL and TP are both
/// scheduled at entry, but their hits lie further out than the signal exit,
/// so both must be dead-marked and silently skipped when the heap reaches them.
#[test]
fn s4_dead_event_cancellation_via_signal_exit() {
    let mut bars = linear_bars(6, 100.0);
    bars.extend([
        Bar::new(6 * 60, 105.0, 106.5, 104.5, 106.0, 0.0), // would hit TP later
        Bar::new(7 * 60, 105.0, 106.0, 90.0, 95.0, 0.0),   // would hit SL later
        Bar::new(8 * 60, 96.0, 115.0, 95.0, 110.0, 0.0),
        Bar::new(9 * 60, 110.0, 111.0, 109.0, 111.0, 0.0),
    ]);
    let mut algo = long_only_algo(&["entry"], &["exit"]);
    algo.long_exit.stop_loss = Some(ValueConfig::rel(0.02));
    algo.long_exit.take_profit = Some(ValueConfig::rel(0.05));

    let input = SimulationInput::new(bars, algo, ExecutionParams::default())
        .with_signal("entry", rising_from(10, 1))
        .with_signal("exit", rising_from(10, 5));

    let result = Simulator::run(&input);
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].exit_reason, ExitReason::ExitSignal);
    assert_eq!(result.stats.sl_triggered, 0);
    assert_eq!(result.stats.tp_triggered, 0);
    assert_eq!(result.stats.signal_exits, 1);
    // both pre-scheduled trigger events were reached after being dead-marked
    assert!(result.stats.dead_skips >= 2);
}

/// S5 - COOLDOWN_ONLY immediate re-entry: the second LONG_ENTRY edge lands
/// exactly on `cooldown_end_bar`, so the handler re-enters same-bar rather
/// than waiting for a later bar.
#[test]
fn s5_cooldown_only_same_bar_reentry() {
    let bars = linear_bars(10, 100.0);
    let mut algo = long_only_algo(&["entry"], &["exit"]);
    algo.timeout = TimeoutConfig {
        mode: TimeoutMode::CooldownOnly,
        cooldown_bars: 3,
    };
    let mut entry_sig = vec![false; 10];
    entry_sig[1] = true; // first rising edge
    entry_sig[2] = false;
    entry_sig[6] = true; // second rising edge, exactly at cooldown_end_bar (3 + 3)

    let mut exit_sig = vec![false; 10];
    exit_sig[3] = true;

    let exec = ExecutionParams::default().with_close_position_on_exit(true);
    let input = SimulationInput::new(bars, algo, exec)
        .with_signal("entry", entry_sig)
        .with_signal("exit", exit_sig);

    let result = Simulator::run(&input);
    assert_eq!(result.trades.len(), 2);
    assert_eq!(result.trades[0].entry.bar_index, 1);
    assert_eq!(result.trades[0].exit.bar_index, 3);
    assert_eq!(result.trades[1].entry.bar_index, 6);
    assert!((result.trades[1].entry.price - 106.0).abs() < 1e-9);
    assert_eq!(result.final_state, SimState::Cash);
}

/// S6 - REGULAR mode opposite-direction hand-off: after a LONG exit, a
/// SHORT_ENTRY edge arriving once cooldown is complete hands off directly
/// from TIMEOUT to POSITION(Short), with no intervening CASH state. The
/// LONG_ENTRY condition stays met throughout and never causes a re-entry.
#[test]
fn s6_regular_mode_opposite_direction_handoff() {
    let bars = linear_bars(8, 100.0);
    let mut algo = AlgoParams::default().with_trade_type(TradeType::Both);
    algo.long_entry = EntryCondition {
        required: vec!["long_entry".into()],
        optional: vec![],
    };
    algo.long_exit = ExitCondition {
        required: vec!["long_exit".into()],
        optional: vec![],
        stop_loss: None,
        take_profit: None,
        trailing_sl: false,
    };
    algo.short_entry = EntryCondition {
        required: vec!["short_entry".into()],
        optional: vec![],
    };
    algo.timeout = TimeoutConfig {
        mode: TimeoutMode::Regular,
        cooldown_bars: 2,
    };

    let long_entry_sig = rising_from(8, 1); // edge at bar1, stays true
    let long_exit_sig = rising_from(8, 3); // edge at bar3, stays true
    let short_entry_sig = rising_from(8, 6); // edge at bar6, stays true

    let exec = ExecutionParams::default().with_close_position_on_exit(true);
    let input = SimulationInput::new(bars, algo, exec)
        .with_signal("long_entry", long_entry_sig)
        .with_signal("long_exit", long_exit_sig)
        .with_signal("short_entry", short_entry_sig);

    let result = Simulator::run(&input);

    assert_eq!(result.state_transitions.len(), 3);
    assert_eq!(result.state_transitions[0].to, SimState::Position(backtest_engine::event::Direction::Long));
    assert_eq!(result.state_transitions[1].to, SimState::Timeout);
    assert_eq!(
        result.state_transitions[2].to,
        SimState::Position(backtest_engine::event::Direction::Short)
    );
    assert_eq!(result.state_transitions[2].bar_index, 6);

    assert_eq!(result.trades.len(), 2);
    assert_eq!(result.trades[0].direction, backtest_engine::event::Direction::Long);
    assert_eq!(result.trades[1].direction, backtest_engine::event::Direction::Short);
    assert_eq!(result.trades[1].entry.bar_index, 6);
}

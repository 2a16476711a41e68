//! Strategy configuration and execution parameters (§3, §6).

use crate::bar::Bar;
use crate::condition::{EntryCondition, ExitCondition};
use crate::error::Result;
use crate::event::ConditionType;
use crate::value::ValueConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    Long,
    Short,
    Both,
}

impl TradeType {
    pub fn long_permitted(self) -> bool {
        matches!(self, TradeType::Long | TradeType::Both)
    }

    pub fn short_permitted(self) -> bool {
        matches!(self, TradeType::Short | TradeType::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutMode {
    CooldownOnly,
    Regular,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub mode: TimeoutMode,
    pub cooldown_bars: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            mode: TimeoutMode::CooldownOnly,
            cooldown_bars: 0,
        }
    }
}

/// Core-relevant subset of the strategy config (§3). Entry/exit conditions
/// are declared directly as required/optional indicator-key lists, which
/// doubles as the `(condition_type, indicator_key) -> is_required` map C4
/// needs — see [`AlgoParams::indicator_usages`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgoParams {
    pub trade_type: TradeType,
    pub long_entry: EntryCondition,
    pub long_exit: ExitCondition,
    pub short_entry: EntryCondition,
    pub short_exit: ExitCondition,
    pub position_size: ValueConfig,
    pub timeout: TimeoutConfig,
    pub starting_capital_usd: f64,
}

impl Default for AlgoParams {
    fn default() -> Self {
        Self {
            trade_type: TradeType::Both,
            long_entry: EntryCondition::default(),
            long_exit: ExitCondition::default(),
            short_entry: EntryCondition::default(),
            short_exit: ExitCondition::default(),
            position_size: ValueConfig::rel(1.0),
            timeout: TimeoutConfig::default(),
            starting_capital_usd: 10_000.0,
        }
    }
}

impl AlgoParams {
    pub fn with_trade_type(mut self, trade_type: TradeType) -> Self {
        self.trade_type = trade_type;
        self
    }

    pub fn with_position_size(mut self, position_size: ValueConfig) -> Self {
        self.position_size = position_size;
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_starting_capital(mut self, starting_capital_usd: f64) -> Self {
        self.starting_capital_usd = starting_capital_usd;
        self
    }

    /// Every `(condition_type, indicator_key, is_required)` usage declared by
    /// the four entry/exit conditions, in deterministic declaration order:
    /// LONG_ENTRY, LONG_EXIT, SHORT_ENTRY, SHORT_EXIT, required keys before
    /// optional keys within each.
    pub fn indicator_usages(&self) -> Vec<(ConditionType, &str, bool)> {
        let mut usages = Vec::new();
        let mut push = |ct: ConditionType, required: &[String], optional: &[String]| {
            for key in required {
                usages.push((ct, key.as_str(), true));
            }
            for key in optional {
                usages.push((ct, key.as_str(), false));
            }
        };
        push(ConditionType::LongEntry, &self.long_entry.required, &self.long_entry.optional);
        push(ConditionType::LongExit, &self.long_exit.required, &self.long_exit.optional);
        push(ConditionType::ShortEntry, &self.short_entry.required, &self.short_entry.optional);
        push(ConditionType::ShortExit, &self.short_exit.required, &self.short_exit.optional);
        usages
    }

    /// Convenience constructor for callers that receive strategy config as
    /// JSON from an upstream config layer rather than building it in code.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Execution-context parameters (§6) that sit outside the declarative
/// strategy config: fees, slippage, the symbol being traded, and run-level
/// knobs like a force-close flag or a trade cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionParams {
    pub symbol: String,
    pub initial_capital: f64,
    pub fee_bps: f64,
    pub slippage_bps: f64,
    pub close_position_on_exit: bool,
    pub bar_duration_seconds: i64,
    pub trades_limit: Option<u32>,
    pub default_sub_bar_duration_seconds: i64,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            symbol: "SYMBOL".to_string(),
            initial_capital: 100_000.0,
            fee_bps: 0.0,
            slippage_bps: 0.0,
            close_position_on_exit: false,
            bar_duration_seconds: 60,
            trades_limit: None,
            default_sub_bar_duration_seconds: crate::path::DEFAULT_SUB_BAR_DURATION_SECONDS,
        }
    }
}

impl ExecutionParams {
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn with_initial_capital(mut self, initial_capital: f64) -> Self {
        self.initial_capital = initial_capital;
        self
    }

    pub fn with_fees(mut self, fee_bps: f64, slippage_bps: f64) -> Self {
        self.fee_bps = fee_bps;
        self.slippage_bps = slippage_bps;
        self
    }

    pub fn with_close_position_on_exit(mut self, close_position_on_exit: bool) -> Self {
        self.close_position_on_exit = close_position_on_exit;
        self
    }

    pub fn with_trades_limit(mut self, trades_limit: u32) -> Self {
        self.trades_limit = Some(trades_limit);
        self
    }
}

/// The full bundle of inputs the engine consumes for one run (§6).
#[derive(Debug, Clone)]
pub struct SimulationInput {
    pub bars: Vec<Bar>,
    pub signal_cache: BTreeMap<String, Vec<bool>>,
    pub algo_params: AlgoParams,
    pub warmup_bars: usize,
    /// `parent_bar_index -> sub-bars`, when finer-resolution data backs a bar.
    pub sub_bar_candles: BTreeMap<usize, Vec<Bar>>,
    /// `timestamp -> factor` lookups for DYN stop-loss / take-profit levels.
    pub sl_factor_lookup: BTreeMap<i64, f64>,
    pub tp_factor_lookup: BTreeMap<i64, f64>,
    pub execution: ExecutionParams,
}

impl SimulationInput {
    pub fn new(bars: Vec<Bar>, algo_params: AlgoParams, execution: ExecutionParams) -> Self {
        Self {
            bars,
            signal_cache: BTreeMap::new(),
            algo_params,
            warmup_bars: 0,
            sub_bar_candles: BTreeMap::new(),
            sl_factor_lookup: BTreeMap::new(),
            tp_factor_lookup: BTreeMap::new(),
            execution,
        }
    }

    pub fn with_signal(mut self, key: impl Into<String>, values: Vec<bool>) -> Self {
        self.signal_cache.insert(key.into(), values);
        self
    }

    pub fn with_warmup_bars(mut self, warmup_bars: usize) -> Self {
        self.warmup_bars = warmup_bars;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_type_permissions() {
        assert!(TradeType::Long.long_permitted());
        assert!(!TradeType::Long.short_permitted());
        assert!(TradeType::Both.long_permitted());
        assert!(TradeType::Both.short_permitted());
    }

    #[test]
    fn from_json_round_trips_defaults() {
        let params = AlgoParams::default();
        let raw = serde_json::to_string(&params).unwrap();
        let parsed = AlgoParams::from_json(&raw).unwrap();
        assert_eq!(parsed.starting_capital_usd, params.starting_capital_usd);
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        assert!(AlgoParams::from_json("not json").is_err());
    }

    #[test]
    fn indicator_usages_are_in_declaration_order() {
        let mut params = AlgoParams::default();
        params.long_entry.required = vec!["a".into(), "b".into()];
        params.long_entry.optional = vec!["c".into()];
        let usages = params.indicator_usages();
        assert_eq!(
            usages[..3],
            [
                (ConditionType::LongEntry, "a", true),
                (ConditionType::LongEntry, "b", true),
                (ConditionType::LongEntry, "c", false),
            ]
        );
    }
}

//! Sub-bar price-path reconstruction (C1).
//!
//! Within-bar SL/TP detection needs *some* deterministic assumption about how
//! price moved between open and close. We assume the path visits the nearer
//! extreme first: this is the most pessimistic standard convention for
//! worst-case fill ordering, since it gives stops the earliest chance to fire.

use crate::bar::Bar;

/// Fallback duration (seconds) used when a sub-bar's successor is unknown —
/// either it is the last sub-bar in a series, or no sub-bar series exists at all.
pub const DEFAULT_SUB_BAR_DURATION_SECONDS: i64 = 60;

/// A single (price, timestamp) sample within a bar, produced by lifting its
/// OHLC into the 4-point path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub price: f64,
    pub timestamp: i64,
    pub sub_bar_index: usize,
    pub checkpoint_index: u8,
}

/// Returns the 4-step `[open, nearer_extreme, farther_extreme, close]` path for one bar.
/// Ties between `high` and `low` distance to `open` resolve to `high` first.
pub fn simulate_path(bar: &Bar) -> [f64; 4] {
    let dist_high = (bar.high - bar.open).abs();
    let dist_low = (bar.low - bar.open).abs();
    let (nearer, farther) = if dist_low < dist_high {
        (bar.low, bar.high)
    } else {
        (bar.high, bar.low)
    };
    [bar.open, nearer, farther, bar.close]
}

/// Lifts a series of sub-bars into timestamped checkpoints, 4 per sub-bar.
///
/// Each sub-bar's duration is estimated as the gap to the next sub-bar's
/// `bucket`; the last sub-bar (or the sole bar, when called with a
/// single-element slice as the OHLC-only fallback) uses `default_duration`.
/// A non-positive gap also falls back to `default_duration`.
pub fn generate_checkpoints(sub_bars: &[Bar], default_duration: i64) -> Vec<Checkpoint> {
    let mut out = Vec::with_capacity(sub_bars.len() * 4);
    for (i, bar) in sub_bars.iter().enumerate() {
        let duration = sub_bars
            .get(i + 1)
            .map(|next| next.bucket - bar.bucket)
            .filter(|gap| *gap > 0)
            .unwrap_or(default_duration);
        let step = duration as f64 / 4.0;
        let path = simulate_path(bar);
        for (checkpoint_index, price) in path.into_iter().enumerate() {
            out.push(Checkpoint {
                price,
                timestamp: bar.bucket + (checkpoint_index as f64 * step) as i64,
                sub_bar_index: i,
                checkpoint_index: checkpoint_index as u8,
            });
        }
    }
    out
}

/// Lifts a single parent bar directly when no sub-bar series is available.
pub fn generate_checkpoints_for_bar(parent: &Bar, default_duration: i64) -> Vec<Checkpoint> {
    generate_checkpoints(std::slice::from_ref(parent), default_duration)
}

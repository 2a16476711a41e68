//! Bar (OHLCV) data types.

use serde::{Deserialize, Serialize};

/// A single OHLCV bar. `bucket` is the bar's start timestamp in epoch seconds.
///
/// Bars are immutable once constructed; a `[Bar]` slice fed to the engine must
/// be strictly ascending in `bucket`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub bucket: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(bucket: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            bucket,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Returns the bar's range (high - low).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Returns the bar's body size (absolute difference between open and close).
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// True if any OHLC field is NaN or infinite.
    pub fn has_non_finite(&self) -> bool {
        !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite())
    }
}

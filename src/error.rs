//! Error types for the simulation engine.

use thiserror::Error;

/// Boundary faults the engine can report before a simulation run starts.
///
/// Once [`crate::simulator::validate_input`] succeeds the engine loop itself is
/// infallible: every dispatch branch has a defined behavior (see the module docs
/// on `simulator`), so `Simulator::run` returns a plain result value, not a `Result`.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("bars is empty")]
    EmptyBars,

    #[error("signal array for indicator {key:?} has length {actual}, expected {expected}")]
    MisalignedSignalLength {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("bar {bar_index} contains a non-finite OHLC value")]
    NonFiniteBar { bar_index: usize },

    #[error("bar_duration_seconds must be positive, got {0}")]
    NonPositiveBarDuration(i64),

    #[error("bars are not strictly ascending by bucket at index {bar_index}")]
    UnorderedBars { bar_index: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for fallible boundary operations.
pub type Result<T> = std::result::Result<T, SimError>;

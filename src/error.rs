//! Error types for the simulation engine.
//!
//! One `thiserror`-derived enum, one variant per distinct failure kind, each
//! carrying enough context (tick, component name) to build a diagnostic
//! without re-deriving it from the caller's state.

use crate::clock::Tick;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raised when bookkeeping invariants the engine is supposed to maintain
    /// (credit accounting, non-negative demand, window bounds) are observed
    /// to be violated. This always indicates an accounting bug in the
    /// engine itself, never a property of the workload, so it is fatal.
    #[error("invariant violation at tick {tick} in {component}: {detail}")]
    InvariantViolation {
        tick: Tick,
        component: &'static str,
        detail: String,
    },

    #[error("trace sink I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace sink serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimError>;

//! Error types for engine communication and sweeps
//!
//! Only [`EvalError::EngineUnavailable`] reaches the caller of a sweep as a hard
//! failure. Timeouts, rejected moves and unparseable engine lines degrade into
//! skipped table entries.

use std::time::Duration;

/// Engine / sweep errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The engine could not be launched, failed its handshake, or exited
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A single search did not finish before its deadline
    #[error("evaluation timed out after {0:?}")]
    EvaluationTimeout(Duration),

    /// The rules collaborator rejected a move its own enumeration produced
    #[error("rules rejected move {mv}: {reason}")]
    IllegalMoveApplication { mv: String, reason: String },

    /// An engine line matched no recognised pattern
    #[error("malformed engine output: {0}")]
    MalformedEngineOutput(String),

    /// The position text could not be parsed by the rules collaborator
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

/// Result type for engine operations
pub type EvalResult<T> = Result<T, EvalError>;

//! Error taxonomy for the engine.
//!
//! Component-local failures (matcher, balancer, sequencer) degrade instead of
//! erroring; these variants cover the cases that genuinely must surface:
//! bad configuration, store failures, rejected validation, dispatch failures,
//! and conversion preconditions.

use thiserror::Error;

/// All errors produced by the LeadFlow engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration file missing fields or unparseable.
    #[error("Config error: {0}")]
    Config(String),

    /// SQLite store failure (open, migrate, read, write).
    #[error("Store error: {0}")]
    Store(String),

    /// Rejected input: malformed schedule, partial reorder, unknown segment
    /// field on a dynamic segment, invalid A/B block.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Mail or webhook dispatch failure.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Lead conversion precondition not met.
    #[error("Conversion error: {0}")]
    Conversion(String),
}

/// Convenience result type used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

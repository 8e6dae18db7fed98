//! Engine error taxonomy
//!
//! Every engine-detected failure is fail-fast and atomic: nothing is sampled
//! after a `Validation` or `DataIntegrity` error, and nothing is persisted after
//! a `ResourceExhausted` error.

use thiserror::Error;

/// Errors surfaced by the simulation engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Inputs are well-formed but cannot be simulated as given
    #[error("validation error: {0}")]
    Validation(String),

    /// The snapshot references an entity that does not exist in it
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// The run was cancelled or exceeded its deadline before completing
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        EngineError::DataIntegrity(msg.into())
    }

    /// Stable machine-readable kind, used by the CLI and in logs
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::DataIntegrity(_) => "data_integrity",
            EngineError::ResourceExhausted(_) => "resource_exhausted",
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

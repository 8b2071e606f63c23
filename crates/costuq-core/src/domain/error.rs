//! Domain-level error taxonomy for costuq.

use costuq_store::StorageError;

/// Preconditions checked before any simulation starts.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("variant frequencies must sum to 100%, got {sum}%")]
    FrequencySum { sum: f64 },

    #[error("driver {driver} has invalid distribution parameters: {reason}")]
    InvalidDistribution { driver: String, reason: String },

    #[error("iterations must be at least 1")]
    NoIterations,

    #[error("{tool} needs at least one cost driver")]
    NoDrivers { tool: String },
}

/// Failure of a single simulator invocation.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SimulationError {
    #[error("simulation cancelled")]
    Cancelled,

    #[error("simulator failed: {0}")]
    Failed(String),

    #[error("simulator returned malformed output: {0}")]
    MalformedOutput(String),
}

/// costuq domain errors.
#[derive(Debug, thiserror::Error)]
pub enum UqError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("simulation error: {0}")]
    Simulation(#[from] SimulationError),

    #[error("xml error: {0}")]
    Xml(String),

    #[error("archive error: {0}")]
    Archive(#[from] std::io::Error),

    #[error("convergence check needs at least {needed} samples, got {got}")]
    InsufficientSamples { needed: usize, got: usize },

    #[error("index sets differ in length: {first} first-order vs {total} total-order")]
    LengthMismatch { first: usize, total: usize },
}

/// Result type for costuq domain operations.
pub type Result<T> = std::result::Result<T, UqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_converts_into_uq_error() {
        let err: UqError = ValidationError::FrequencySum { sum: 90.0 }.into();
        assert!(matches!(err, UqError::Validation(_)));
        assert!(err.to_string().contains("90"));
    }

    #[test]
    fn storage_error_converts_into_uq_error() {
        let err: UqError = StorageError::InvalidKey { key: "x".into() }.into();
        assert!(matches!(err, UqError::Storage(_)));
    }
}

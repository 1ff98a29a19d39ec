//! Error types for market-warehouse

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Failed to decode {entity}.{column}: {reason}")]
    Decode {
        entity: &'static str,
        column: String,
        reason: String,
    },

    #[error("Failed to encode {entity}: {reason}")]
    Encode { entity: &'static str, reason: String },

    #[error("Benchmark count mismatch: expected {expected}, got {actual}")]
    BenchmarkMismatch { expected: usize, actual: usize },

    #[error("Invalid benchmark index {index} (configured benchmarks: {configured})")]
    InvalidBenchmark { index: usize, configured: usize },

    #[error("Invalid sort field: {0}")]
    InvalidSortField(String),

    /// Raw driver failure, not yet attributed to an operation
    #[error("Database error: {0}")]
    Database(String),

    #[error("{op} failed: {message}")]
    Query { op: &'static str, message: String },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Query deadline exceeded")]
    DeadlineExceeded,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Schema setup failed: {0}")]
    Setup(String),

    #[error("Storage is not initialized (setup has not completed)")]
    NotInitialized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Attribute a raw database failure to the named operation.
    ///
    /// Every other variant already carries its own context and passes through.
    pub fn during(self, op: &'static str) -> Self {
        match self {
            StorageError::Database(message) => StorageError::Query { op, message },
            other => other,
        }
    }

    /// True for the "absent" outcome of a single-entity lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub(crate) fn decode(entity: &'static str, column: impl Into<String>, reason: impl ToString) -> Self {
        StorageError::Decode {
            entity,
            column: column.into(),
            reason: reason.to_string(),
        }
    }
}

//! Analytics error types.

use thiserror::Error;

use crate::storage::database::DatabaseError;

/// Errors that can occur during analytics calculations.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Insufficient data to perform calculation.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Result type for analytics operations.
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_error() {
        let err = AnalyticsError::InsufficientData("No capability record".to_string());
        assert!(err.to_string().contains("No capability record"));
    }

    #[test]
    fn test_storage_error_converts() {
        let err: AnalyticsError = DatabaseError::NotFound("session".to_string()).into();
        assert!(matches!(err, AnalyticsError::Storage(_)));
        assert!(err.to_string().contains("session"));
    }
}

//! Error types for the search outbox.

use thiserror::Error;

/// Unified error type for outbox domain operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OutboxError::Config("bad batch size".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad batch size");

        let err = OutboxError::InvalidInput("empty entity id".to_string());
        assert_eq!(err.to_string(), "Invalid input: empty entity id");
    }
}

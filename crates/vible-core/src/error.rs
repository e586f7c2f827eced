use thiserror::Error;

/// Core error type for vible operations.
#[derive(Error, Debug)]
pub enum VibleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Email delivery failed: {0}")]
    Email(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for VibleError {
    fn from(e: serde_json::Error) -> Self {
        VibleError::Serialization(e.to_string())
    }
}

/// Result type alias using VibleError.
pub type Result<T> = std::result::Result<T, VibleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: VibleError = err.into();
        assert!(matches!(err, VibleError::Serialization(_)));
    }

    #[test]
    fn test_error_display() {
        let err = VibleError::NotFound("run 42".into());
        assert_eq!(err.to_string(), "Not found: run 42");
    }
}

//! Error types for copyflow.

use thiserror::Error;

use crate::template::ExpansionError;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Annotated definition could not be expanded
    #[error("Expansion error: {0}")]
    Expansion(#[from] ExpansionError),

    /// Workflow document violates a structural rule
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Parse error (YAML, JSON, etc.)
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation("StartAt references unknown state 'Nope'".to_string());
        assert_eq!(
            err.to_string(),
            "Validation error: StartAt references unknown state 'Nope'"
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let vars = vec![("COPYFLOW_POOL_SIZE".to_string(), "many".to_string())];
        let err: AppError = envy::prefixed("COPYFLOW_")
            .from_iter::<_, crate::config::AppConfig>(vars)
            .unwrap_err()
            .into();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_expansion_error_conversion() {
        let err: AppError = ExpansionError::NegativePoolSize {
            token: "{shard}".to_string(),
            pool_size: -1,
        }
        .into();
        assert!(matches!(err, AppError::Expansion(_)));
        assert!(err.to_string().contains("negative pool size"));
    }
}

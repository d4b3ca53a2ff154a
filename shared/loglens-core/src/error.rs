//! Error types for LogLens services

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoglensError>;

#[derive(Error, Debug)]
pub enum LoglensError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoglensError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Unavailable(_) | Self::Database(_) => 503,
            _ => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for LoglensError {
    fn from(err: std::io::Error) -> Self {
        LoglensError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(LoglensError::Validation("x".into()).status_code(), 400);
        assert_eq!(LoglensError::NotFound("x".into()).status_code(), 404);
        assert_eq!(LoglensError::Database("x".into()).status_code(), 503);
        assert_eq!(LoglensError::Config("x".into()).status_code(), 500);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(LoglensError::Unavailable("db".into()).error_code(), "UNAVAILABLE");
        assert_eq!(LoglensError::Internal("x".into()).error_code(), "INTERNAL_ERROR");
    }
}

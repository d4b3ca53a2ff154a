//! Store Error Types

use thiserror::Error;
use tokio_postgres::error::SqlState;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(#[source] tokio_postgres::Error),

    #[error("Query error: {0}")]
    Query(#[source] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ClickHouse returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage structure missing: {0}")]
    MissingStructure(String),

    #[error("Rejected statement: {0}")]
    Rejected(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Classify a PostgreSQL failure, separating "relation does not exist"
    pub fn from_pg(err: tokio_postgres::Error) -> Self {
        match err.code() {
            Some(code) if *code == SqlState::UNDEFINED_TABLE => {
                StoreError::MissingStructure(err.to_string())
            }
            _ => StoreError::Query(err),
        }
    }

    /// Classify a non-success ClickHouse HTTP response
    pub fn from_clickhouse(status: u16, body: String) -> Self {
        if is_unknown_table(&body) {
            StoreError::MissingStructure(body.trim().to_string())
        } else {
            StoreError::Server {
                status,
                body: body.trim().to_string(),
            }
        }
    }

    pub fn is_missing_structure(&self) -> bool {
        matches!(self, StoreError::MissingStructure(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, StoreError::Rejected(_))
    }
}

fn is_unknown_table(body: &str) -> bool {
    body.contains("UNKNOWN_TABLE") || body.trim_start().starts_with("Code: 60.")
}

impl From<StoreError> for loglens_core::LoglensError {
    fn from(err: StoreError) -> Self {
        use loglens_core::LoglensError;

        match err {
            StoreError::NotFound(what) => LoglensError::NotFound(what),
            StoreError::Rejected(why) => LoglensError::Validation(why),
            StoreError::Configuration(msg) => LoglensError::Config(msg),
            StoreError::Unavailable(msg) | StoreError::Pool(msg) => LoglensError::Unavailable(msg),
            other => LoglensError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clickhouse_unknown_table_is_missing_structure() {
        let body = "Code: 60. DB::Exception: Table default.log_patterns does not exist. (UNKNOWN_TABLE) (version 24.3.1.1)\n";
        let err = StoreError::from_clickhouse(404, body.to_string());
        assert!(err.is_missing_structure());
    }

    #[test]
    fn test_clickhouse_syntax_error_is_server_error() {
        let body = "Code: 62. DB::Exception: Syntax error: failed at position 1. (SYNTAX_ERROR)";
        let err = StoreError::from_clickhouse(400, body.to_string());
        assert!(!err.is_missing_structure());
        assert!(matches!(err, StoreError::Server { status: 400, .. }));
    }

    #[test]
    fn test_conversion_to_service_error() {
        let err: loglens_core::LoglensError = StoreError::NotFound("pattern 9".into()).into();
        assert_eq!(err.status_code(), 404);

        let err: loglens_core::LoglensError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.status_code(), 503);
    }
}

//! Storage Gateway
//!
//! One capability interface over the row store and the analytical store.
//! Callers hold an `Arc<dyn StorageGateway>` chosen at startup and never
//! see backend dialect beyond [`Backend`].

use async_trait::async_trait;
use loglens_core::{LogPattern, LogRecord, Setting};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tracing::warn;

use crate::{Result, StoreError};

/// Which physical store sits behind a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    ClickHouse,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::ClickHouse => "clickhouse",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Backend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Backend::Postgres),
            "clickhouse" | "ch" => Ok(Backend::ClickHouse),
            other => Err(StoreError::Configuration(format!("unknown backend: {}", other))),
        }
    }
}

/// Storage capability shared by every backend
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Dialect of the underlying store
    fn backend(&self) -> Backend;

    /// All patterns ordered by id
    async fn list_patterns(&self) -> Result<Vec<LogPattern>>;

    /// Insert when `id` is absent, update when present
    async fn save_pattern(&self, pattern: LogPattern) -> Result<LogPattern>;

    async fn delete_pattern(&self, id: i64) -> Result<()>;

    async fn find_setting(&self, key: &str) -> Result<Option<Setting>>;

    /// Upsert by key
    async fn save_setting(&self, setting: Setting) -> Result<Setting>;

    /// Most recent records first
    async fn list_records(&self, limit: usize) -> Result<Vec<LogRecord>>;

    /// Insert when `id` is absent, update when present
    async fn save_record(&self, record: LogRecord) -> Result<LogRecord>;

    async fn delete_record(&self, id: i64) -> Result<()>;

    /// Run an untrusted retrieval query; anything but a single read-only
    /// statement is rejected before a connection is touched
    async fn execute_log_query(&self, query: &str) -> Result<Vec<LogRecord>>;

    /// Create the records, patterns and settings collections if missing.
    /// Safe to call any number of times.
    async fn initialize_schema(&self) -> Result<()>;

    async fn is_healthy(&self) -> bool;
}

/// Run `op`, and if it fails because a collection is missing, bootstrap the
/// schema once and retry exactly once. A second failure is reported as
/// [`StoreError::Unavailable`].
pub async fn with_self_heal<'a, S, T, F, Fut>(store: &'a S, operation: &str, op: F) -> Result<T>
where
    S: StorageGateway + ?Sized,
    F: Fn(&'a S) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op(store).await {
        Err(err) if err.is_missing_structure() => {
            warn!(
                backend = %store.backend(),
                operation,
                error = %err,
                "Storage structure missing, initializing schema and retrying"
            );
            store.initialize_schema().await.map_err(|e| {
                StoreError::Unavailable(format!("{}: schema bootstrap failed: {}", operation, e))
            })?;
            op(store).await.map_err(|e| match e {
                StoreError::Rejected(_) | StoreError::NotFound(_) => e,
                other => StoreError::Unavailable(format!(
                    "{} failed after schema bootstrap: {}",
                    operation, other
                )),
            })
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gateway whose pattern listing fails with a missing table a set
    /// number of times before succeeding
    struct FlakyGateway {
        missing_failures: usize,
        calls: AtomicUsize,
        schema_inits: AtomicUsize,
    }

    impl FlakyGateway {
        fn new(missing_failures: usize) -> Self {
            Self {
                missing_failures,
                calls: AtomicUsize::new(0),
                schema_inits: AtomicUsize::new(0),
            }
        }

        async fn fetch(&self) -> Result<Vec<LogPattern>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.missing_failures {
                Err(StoreError::MissingStructure("log_patterns".into()))
            } else {
                Ok(vec![LogPattern::new("INFO", "ok")])
            }
        }
    }

    #[async_trait]
    impl StorageGateway for FlakyGateway {
        fn backend(&self) -> Backend {
            Backend::Postgres
        }
        async fn list_patterns(&self) -> Result<Vec<LogPattern>> {
            with_self_heal(self, "list_patterns", |s| s.fetch()).await
        }
        async fn save_pattern(&self, pattern: LogPattern) -> Result<LogPattern> {
            Ok(pattern)
        }
        async fn delete_pattern(&self, _id: i64) -> Result<()> {
            Ok(())
        }
        async fn find_setting(&self, _key: &str) -> Result<Option<Setting>> {
            Ok(None)
        }
        async fn save_setting(&self, setting: Setting) -> Result<Setting> {
            Ok(setting)
        }
        async fn list_records(&self, _limit: usize) -> Result<Vec<LogRecord>> {
            Ok(vec![])
        }
        async fn save_record(&self, record: LogRecord) -> Result<LogRecord> {
            Ok(record)
        }
        async fn delete_record(&self, _id: i64) -> Result<()> {
            Ok(())
        }
        async fn execute_log_query(&self, _query: &str) -> Result<Vec<LogRecord>> {
            Ok(vec![])
        }
        async fn initialize_schema(&self) -> Result<()> {
            self.schema_inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_no_retry_when_structures_exist() {
        let gw = FlakyGateway::new(0);
        assert_eq!(gw.list_patterns().await.unwrap().len(), 1);
        assert_eq!(gw.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gw.schema_inits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_self_heal_retry() {
        let gw = FlakyGateway::new(1);
        assert_eq!(gw.list_patterns().await.unwrap().len(), 1);
        assert_eq!(gw.calls.load(Ordering::SeqCst), 2);
        assert_eq!(gw.schema_inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_failure_is_unavailable() {
        let gw = FlakyGateway::new(5);
        let err = gw.list_patterns().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(gw.calls.load(Ordering::SeqCst), 2);
        assert_eq!(gw.schema_inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("postgres".parse::<Backend>().unwrap(), Backend::Postgres);
        assert_eq!("ClickHouse".parse::<Backend>().unwrap(), Backend::ClickHouse);
        assert!("mysql".parse::<Backend>().is_err());
    }
}

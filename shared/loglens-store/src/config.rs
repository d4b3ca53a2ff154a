//! Backend selection

use std::sync::Arc;
use tracing::info;

use crate::client::{ClickHouseClient, ClickHouseConfig};
use crate::clickhouse::ClickHouseStore;
use crate::gateway::{Backend, StorageGateway};
use crate::pool::{PgPool, PoolConfig};
use crate::postgres::PostgresStore;
use crate::Result;

/// Which store to open and how to reach it
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Postgres(PoolConfig),
    ClickHouse(ClickHouseConfig),
}

impl StoreConfig {
    /// Read `LOGLENS_BACKEND` (default `postgres`) and that backend's settings
    pub fn from_env() -> Result<Self> {
        let backend: Backend = std::env::var("LOGLENS_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        match backend {
            Backend::Postgres => Ok(StoreConfig::Postgres(PoolConfig::from_env()?)),
            Backend::ClickHouse => Ok(StoreConfig::ClickHouse(ClickHouseConfig::from_env()?)),
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            StoreConfig::Postgres(_) => Backend::Postgres,
            StoreConfig::ClickHouse(_) => Backend::ClickHouse,
        }
    }
}

/// Build the gateway for `config`. No connection is made here; the first
/// call (or [`StorageGateway::initialize_schema`]) reaches the server.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn StorageGateway>> {
    info!(backend = %config.backend(), "Opening storage gateway");

    let store: Arc<dyn StorageGateway> = match config {
        StoreConfig::Postgres(pool) => Arc::new(PostgresStore::new(PgPool::new(pool)?)),
        StoreConfig::ClickHouse(ch) => Arc::new(ClickHouseStore::new(ClickHouseClient::new(ch)?)),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_selects_backend() {
        let pg = open(&StoreConfig::Postgres(PoolConfig::default())).unwrap();
        assert_eq!(pg.backend(), Backend::Postgres);

        let ch = open(&StoreConfig::ClickHouse(ClickHouseConfig::default())).unwrap();
        assert_eq!(ch.backend(), Backend::ClickHouse);
    }
}

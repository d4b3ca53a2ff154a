//! LogLens Storage
//!
//! A single [`StorageGateway`] over two interchangeable backends: a
//! PostgreSQL row store and a ClickHouse analytical store. Both expose the
//! same log records, patterns and settings, bootstrap their own schema, and
//! refuse to run generated queries that could modify data.

mod client;
mod clickhouse;
mod config;
mod error;
mod gateway;
pub mod guard;
mod pool;
mod postgres;
pub mod schema;

pub use client::{ClickHouseClient, ClickHouseConfig};
pub use clickhouse::ClickHouseStore;
pub use config::{open, StoreConfig};
pub use error::{Result, StoreError};
pub use gateway::{with_self_heal, Backend, StorageGateway};
pub use pool::{PgPool, PoolConfig};
pub use postgres::PostgresStore;

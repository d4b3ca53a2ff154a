//! ClickHouse HTTP Client
//!
//! Talks to the ClickHouse HTTP interface. Statements travel as the
//! request body (or the `query` URL parameter for inserts), values travel
//! as server-side query parameters (`{name:Type}` placeholders bound from
//! `param_<name>`), so nothing user-supplied is spliced into SQL text.

use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{Result, StoreError};

/// ClickHouse connection settings
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub pool_size: usize,
    pub timeout_secs: u64,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "default".to_string(),
            user: None,
            password: None,
            pool_size: 16,
            timeout_secs: 30,
        }
    }
}

impl ClickHouseConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            url: std::env::var("CLICKHOUSE_URL").unwrap_or(defaults.url),
            database: std::env::var("CLICKHOUSE_DATABASE").unwrap_or(defaults.database),
            user: std::env::var("CLICKHOUSE_USER").ok(),
            password: std::env::var("CLICKHOUSE_PASSWORD").ok(),
            pool_size: parse_env("CLICKHOUSE_POOL_SIZE", defaults.pool_size)?,
            timeout_secs: parse_env("CLICKHOUSE_TIMEOUT_SECS", defaults.timeout_secs)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| StoreError::Configuration(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

/// How a statement may touch the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Reads only; the server refuses writes (`readonly=2`)
    ReadOnly,
    /// Reads and writes; mutations complete before the response (`mutations_sync=2`)
    ReadWrite,
}

/// Named query parameter bound to a `{name:Type}` placeholder
pub type Param<'a> = (&'a str, String);

/// ClickHouse HTTP client.
///
/// The inner `reqwest::Client` keeps a pool of keep-alive connections; each
/// call borrows one for the lifetime of its request future.
#[derive(Debug, Clone)]
pub struct ClickHouseClient {
    http: Client,
    url: String,
    database: String,
    user: Option<String>,
    password: Option<String>,
}

impl ClickHouseClient {
    pub fn new(config: &ClickHouseConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.pool_size)
            .build()
            .map_err(StoreError::Http)?;

        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Run a statement that returns no rows (DDL, mutations)
    #[instrument(skip(self, params), fields(database = %self.database))]
    pub async fn execute(&self, sql: &str, params: &[Param<'_>]) -> Result<()> {
        self.send(sql, None, params, Access::ReadWrite).await.map(|_| ())
    }

    /// Run a SELECT and decode every `JSONEachRow` line into `T`
    #[instrument(skip(self, sql, params), fields(database = %self.database))]
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[Param<'_>],
        access: Access,
    ) -> Result<Vec<T>> {
        let statement = format!("{}\nFORMAT JSONEachRow", sql);
        let body = self.send(&statement, None, params, access).await?;
        decode_rows(&body)
    }

    /// Append rows with `INSERT ... FORMAT JSONEachRow`
    #[instrument(skip(self, rows), fields(database = %self.database, rows = rows.len()))]
    pub async fn insert<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<()> {
        let mut payload = String::new();
        for row in rows {
            payload.push_str(&serde_json::to_string(row)?);
            payload.push('\n');
        }
        let query = format!("INSERT INTO {} FORMAT JSONEachRow", table);
        self.send(&query, Some(payload), &[], Access::ReadWrite).await.map(|_| ())
    }

    pub async fn is_healthy(&self) -> bool {
        match self.http.get(format!("{}/ping", self.url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn send(
        &self,
        sql: &str,
        data: Option<String>,
        params: &[Param<'_>],
        access: Access,
    ) -> Result<String> {
        let mut query: Vec<(String, String)> = vec![
            ("database".to_string(), self.database.clone()),
            ("output_format_json_quote_64bit_integers".to_string(), "0".to_string()),
        ];
        match access {
            Access::ReadOnly => query.push(("readonly".to_string(), "2".to_string())),
            Access::ReadWrite => query.push(("mutations_sync".to_string(), "2".to_string())),
        }
        for (name, value) in params {
            query.push((format!("param_{}", name), value.clone()));
        }

        // Inserts carry their rows in the body, so the statement moves to the URL
        let body = match data {
            Some(rows) => {
                query.push(("query".to_string(), sql.to_string()));
                rows
            }
            None => sql.to_string(),
        };

        let mut request = self.http.post(&self.url).query(&query).body(body);
        if let Some(user) = &self.user {
            request = request.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        debug!(access = ?access, "Sending ClickHouse statement");

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(StoreError::from_clickhouse(status.as_u16(), text))
        }
    }
}

/// Decode a `JSONEachRow` body, one JSON object per non-empty line
pub fn decode_rows<T: DeserializeOwned>(body: &str) -> Result<Vec<T>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| StoreError::Decode(format!("{}: {}", e, line)))
        })
        .collect()
}

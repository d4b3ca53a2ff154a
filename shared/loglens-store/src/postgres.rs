//! PostgreSQL row store
//!
//! Supports `UPDATE`/`DELETE` directly and hands out identifiers from
//! `BIGSERIAL` sequences via `INSERT ... RETURNING id`.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use loglens_core::{LogPattern, LogRecord, Setting};
use tokio_postgres::Row;
use tracing::{debug, info, instrument};

use crate::gateway::{with_self_heal, Backend, StorageGateway};
use crate::guard::{ensure_read_only, trim_terminator};
use crate::pool::PgPool;
use crate::schema::POSTGRES_DDL;
use crate::{Result, StoreError};

/// Storage gateway over a pooled PostgreSQL connection
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_patterns(&self) -> Result<Vec<LogPattern>> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query("SELECT id, log_level, log_template FROM log_patterns ORDER BY id", &[])
            .await
            .map_err(StoreError::from_pg)?;
        rows.iter().map(pattern_from_row).collect()
    }

    async fn insert_pattern(&self, pattern: &LogPattern) -> Result<LogPattern> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "INSERT INTO log_patterns (log_level, log_template) VALUES ($1, $2) RETURNING id",
                &[&pattern.log_level, &pattern.log_template],
            )
            .await
            .map_err(StoreError::from_pg)?;

        Ok(LogPattern {
            id: Some(row.try_get("id").map_err(decode_err)?),
            ..pattern.clone()
        })
    }

    async fn update_pattern(&self, id: i64, pattern: &LogPattern) -> Result<LogPattern> {
        let conn = self.pool.get().await?;
        let affected = conn
            .execute(
                "UPDATE log_patterns SET log_level = $1, log_template = $2 WHERE id = $3",
                &[&pattern.log_level, &pattern.log_template, &id],
            )
            .await
            .map_err(StoreError::from_pg)?;

        if affected == 0 {
            return Err(StoreError::NotFound(format!("pattern {}", id)));
        }
        Ok(pattern.clone())
    }

    async fn remove(&self, sql: &str, id: i64) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(sql, &[&id]).await.map_err(StoreError::from_pg)?;
        Ok(())
    }

    async fn fetch_setting(&self, key: &str) -> Result<Option<Setting>> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT id, setting_key, setting_value FROM app_settings WHERE setting_key = $1 LIMIT 1",
                &[&key],
            )
            .await
            .map_err(StoreError::from_pg)?;
        row.as_ref().map(setting_from_row).transpose()
    }

    async fn upsert_setting(&self, setting: &Setting) -> Result<Setting> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "INSERT INTO app_settings (setting_key, setting_value) VALUES ($1, $2) \
                 ON CONFLICT (setting_key) DO UPDATE SET setting_value = EXCLUDED.setting_value \
                 RETURNING id, setting_key, setting_value",
                &[&setting.key, &setting.value],
            )
            .await
            .map_err(StoreError::from_pg)?;
        setting_from_row(&row)
    }

    async fn fetch_records(&self, limit: i64) -> Result<Vec<LogRecord>> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT id, timestamp, log_level, message FROM log_entries \
                 ORDER BY timestamp DESC, id DESC LIMIT $1",
                &[&limit],
            )
            .await
            .map_err(StoreError::from_pg)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn insert_record(&self, record: &LogRecord) -> Result<LogRecord> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "INSERT INTO log_entries (timestamp, log_level, message) VALUES ($1, $2, $3) RETURNING id",
                &[&record.timestamp, &record.log_level, &record.message],
            )
            .await
            .map_err(StoreError::from_pg)?;

        Ok(LogRecord {
            id: Some(row.try_get("id").map_err(decode_err)?),
            ..record.clone()
        })
    }

    async fn update_record(&self, id: i64, record: &LogRecord) -> Result<LogRecord> {
        let conn = self.pool.get().await?;
        let affected = conn
            .execute(
                "UPDATE log_entries SET timestamp = $1, log_level = $2, message = $3 WHERE id = $4",
                &[&record.timestamp, &record.log_level, &record.message, &id],
            )
            .await
            .map_err(StoreError::from_pg)?;

        if affected == 0 {
            return Err(StoreError::NotFound(format!("log entry {}", id)));
        }
        Ok(record.clone())
    }

    async fn run_read_only(&self, sql: &str) -> Result<Vec<LogRecord>> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await.map_err(StoreError::from_pg)?;
        tx.batch_execute("SET TRANSACTION READ ONLY")
            .await
            .map_err(StoreError::from_pg)?;
        let rows = tx.query(sql, &[]).await.map_err(StoreError::from_pg)?;
        // Nothing to keep; dropping the transaction rolls it back
        drop(tx);
        rows.iter().map(record_from_row).collect()
    }

    async fn create_schema(&self) -> Result<()> {
        let conn = self.pool.get().await?;
        for statement in POSTGRES_DDL {
            conn.batch_execute(statement)
                .await
                .map_err(StoreError::from_pg)?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageGateway for PostgresStore {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    #[instrument(skip(self))]
    async fn list_patterns(&self) -> Result<Vec<LogPattern>> {
        with_self_heal(self, "list_patterns", |s| s.fetch_patterns()).await
    }

    #[instrument(skip(self, pattern), fields(id = ?pattern.id))]
    async fn save_pattern(&self, pattern: LogPattern) -> Result<LogPattern> {
        match pattern.id {
            None => with_self_heal(self, "insert_pattern", |s| s.insert_pattern(&pattern)).await,
            Some(id) => with_self_heal(self, "update_pattern", |s| s.update_pattern(id, &pattern)).await,
        }
    }

    #[instrument(skip(self))]
    async fn delete_pattern(&self, id: i64) -> Result<()> {
        with_self_heal(self, "delete_pattern", |s| {
            s.remove("DELETE FROM log_patterns WHERE id = $1", id)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn find_setting(&self, key: &str) -> Result<Option<Setting>> {
        with_self_heal(self, "find_setting", |s| s.fetch_setting(key)).await
    }

    #[instrument(skip(self, setting), fields(key = %setting.key))]
    async fn save_setting(&self, setting: Setting) -> Result<Setting> {
        with_self_heal(self, "save_setting", |s| s.upsert_setting(&setting)).await
    }

    #[instrument(skip(self))]
    async fn list_records(&self, limit: usize) -> Result<Vec<LogRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        with_self_heal(self, "list_records", |s| s.fetch_records(limit)).await
    }

    #[instrument(skip(self, record), fields(id = ?record.id))]
    async fn save_record(&self, record: LogRecord) -> Result<LogRecord> {
        match record.id {
            None => with_self_heal(self, "insert_record", |s| s.insert_record(&record)).await,
            Some(id) => with_self_heal(self, "update_record", |s| s.update_record(id, &record)).await,
        }
    }

    #[instrument(skip(self))]
    async fn delete_record(&self, id: i64) -> Result<()> {
        with_self_heal(self, "delete_record", |s| {
            s.remove("DELETE FROM log_entries WHERE id = $1", id)
        })
        .await
    }

    #[instrument(skip(self, query))]
    async fn execute_log_query(&self, query: &str) -> Result<Vec<LogRecord>> {
        ensure_read_only(query)?;
        let sql = trim_terminator(query);
        debug!(sql, "Executing generated log query");

        let records = with_self_heal(self, "execute_log_query", |s| s.run_read_only(sql)).await?;
        debug!(count = records.len(), "Log query returned records");
        Ok(records)
    }

    async fn initialize_schema(&self) -> Result<()> {
        self.create_schema().await?;
        info!("PostgreSQL schema ready");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.pool.is_healthy().await
    }
}

fn decode_err(err: tokio_postgres::Error) -> StoreError {
    StoreError::Decode(err.to_string())
}

fn pattern_from_row(row: &Row) -> Result<LogPattern> {
    Ok(LogPattern {
        id: Some(row.try_get("id").map_err(decode_err)?),
        log_level: row.try_get("log_level").map_err(decode_err)?,
        log_template: row.try_get("log_template").map_err(decode_err)?,
    })
}

fn setting_from_row(row: &Row) -> Result<Setting> {
    Ok(Setting {
        id: Some(row.try_get("id").map_err(decode_err)?),
        key: row.try_get("setting_key").map_err(decode_err)?,
        value: row.try_get("setting_value").map_err(decode_err)?,
    })
}

fn record_from_row(row: &Row) -> Result<LogRecord> {
    let timestamp: NaiveDateTime = row.try_get("timestamp").map_err(decode_err)?;
    Ok(LogRecord {
        id: Some(row.try_get("id").map_err(decode_err)?),
        timestamp,
        log_level: row.try_get("log_level").map_err(decode_err)?,
        message: row.try_get("message").map_err(decode_err)?,
    })
}

//! ClickHouse analytical store
//!
//! ClickHouse has no sequences and no row-level UPDATE/DELETE, so this
//! backend assigns identifiers as `max(id) + 1` and edits rows through
//! `ALTER TABLE ... UPDATE/DELETE` mutations run with `mutations_sync=2`.
//!
//! Identifier assignment and every write are serialized through one
//! in-process lock. Two processes writing the same database can still
//! hand out the same identifier; run a single writer per database.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use loglens_core::{LogPattern, LogRecord, Setting};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::client::{Access, ClickHouseClient, Param};
use crate::gateway::{with_self_heal, Backend, StorageGateway};
use crate::guard::{ensure_read_only, trim_terminator};
use crate::schema::{CLICKHOUSE_DDL, PATTERNS_TABLE, RECORDS_TABLE, SETTINGS_TABLE};
use crate::{Result, StoreError};

#[derive(Debug, Serialize, Deserialize)]
struct PatternRow {
    id: u64,
    log_level: String,
    log_template: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingRow {
    id: u64,
    setting_key: String,
    setting_value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordRow {
    id: u64,
    #[serde(with = "ch_datetime")]
    timestamp: NaiveDateTime,
    log_level: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct MaxId {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RowCount {
    n: u64,
}

/// `DateTime` columns travel as `YYYY-MM-DD hh:mm:ss`; `DateTime64` adds a fraction
mod ch_datetime {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f")
            .map_err(|e| serde::de::Error::custom(format!("invalid DateTime {:?}: {}", raw, e)))
    }
}

fn to_domain_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| StoreError::Decode(format!("identifier out of range: {}", id)))
}

impl TryFrom<PatternRow> for LogPattern {
    type Error = StoreError;

    fn try_from(row: PatternRow) -> Result<Self> {
        Ok(LogPattern {
            id: Some(to_domain_id(row.id)?),
            log_level: row.log_level,
            log_template: row.log_template,
        })
    }
}

impl TryFrom<SettingRow> for Setting {
    type Error = StoreError;

    fn try_from(row: SettingRow) -> Result<Self> {
        Ok(Setting {
            id: Some(to_domain_id(row.id)?),
            key: row.setting_key,
            value: row.setting_value,
        })
    }
}

impl TryFrom<RecordRow> for LogRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(LogRecord {
            id: Some(to_domain_id(row.id)?),
            timestamp: row.timestamp,
            log_level: row.log_level,
            message: row.message,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Storage gateway over the ClickHouse HTTP interface
#[derive(Clone)]
pub struct ClickHouseStore {
    client: ClickHouseClient,
    write_lock: Arc<Mutex<()>>,
}

impl ClickHouseStore {
    pub fn new(client: ClickHouseClient) -> Self {
        Self {
            client,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn next_id(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT max(id) AS id FROM {}", table);
        let rows: Vec<MaxId> = self.client.fetch(&sql, &[], Access::ReadWrite).await?;
        Ok(rows.first().map(|r| r.id).unwrap_or(0) + 1)
    }

    async fn exists(&self, table: &str, id: u64) -> Result<bool> {
        let sql = format!("SELECT count() AS n FROM {} WHERE id = {{id:UInt64}}", table);
        let rows: Vec<RowCount> = self
            .client
            .fetch(&sql, &[("id", id.to_string())], Access::ReadWrite)
            .await?;
        Ok(rows.first().map(|r| r.n > 0).unwrap_or(false))
    }

    async fn fetch_patterns(&self) -> Result<Vec<LogPattern>> {
        let sql = format!("SELECT id, log_level, log_template FROM {} ORDER BY id", PATTERNS_TABLE);
        let rows: Vec<PatternRow> = self.client.fetch(&sql, &[], Access::ReadOnly).await?;
        convert_all(rows)
    }

    async fn write_pattern(&self, pattern: &LogPattern) -> Result<LogPattern> {
        let _guard = self.write_lock.lock().await;

        match pattern.id {
            None => {
                let id = self.next_id(PATTERNS_TABLE).await?;
                let row = PatternRow {
                    id,
                    log_level: pattern.log_level.clone(),
                    log_template: pattern.log_template.clone(),
                };
                self.client.insert(PATTERNS_TABLE, &[row]).await?;
                Ok(LogPattern {
                    id: Some(to_domain_id(id)?),
                    ..pattern.clone()
                })
            }
            Some(id) => {
                let key = existing_key(id, "pattern")?;
                if !self.exists(PATTERNS_TABLE, key).await? {
                    return Err(StoreError::NotFound(format!("pattern {}", id)));
                }
                let sql = format!(
                    "ALTER TABLE {} UPDATE log_level = {{level:String}}, log_template = {{template:String}} \
                     WHERE id = {{id:UInt64}}",
                    PATTERNS_TABLE
                );
                let params: [Param<'_>; 3] = [
                    ("level", pattern.log_level.clone()),
                    ("template", pattern.log_template.clone()),
                    ("id", key.to_string()),
                ];
                self.client.execute(&sql, &params).await?;
                Ok(pattern.clone())
            }
        }
    }

    async fn remove(&self, table: &str, id: i64) -> Result<()> {
        // Negative ids can never have been assigned
        let Ok(key) = u64::try_from(id) else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let sql = format!("ALTER TABLE {} DELETE WHERE id = {{id:UInt64}}", table);
        self.client.execute(&sql, &[("id", key.to_string())]).await
    }

    async fn fetch_setting(&self, key: &str) -> Result<Option<Setting>> {
        let sql = format!(
            "SELECT id, setting_key, setting_value FROM {} WHERE setting_key = {{key:String}} ORDER BY id LIMIT 1",
            SETTINGS_TABLE
        );
        let rows: Vec<SettingRow> = self
            .client
            .fetch(&sql, &[("key", key.to_string())], Access::ReadOnly)
            .await?;
        rows.into_iter().next().map(Setting::try_from).transpose()
    }

    async fn upsert_setting(&self, setting: &Setting) -> Result<Setting> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.fetch_setting(&setting.key).await? {
            let sql = format!(
                "ALTER TABLE {} UPDATE setting_value = {{value:String}} WHERE setting_key = {{key:String}}",
                SETTINGS_TABLE
            );
            let params: [Param<'_>; 2] = [
                ("value", setting.value.clone()),
                ("key", setting.key.clone()),
            ];
            self.client.execute(&sql, &params).await?;
            return Ok(Setting {
                id: existing.id,
                ..setting.clone()
            });
        }

        let id = self.next_id(SETTINGS_TABLE).await?;
        let row = SettingRow {
            id,
            setting_key: setting.key.clone(),
            setting_value: setting.value.clone(),
        };
        self.client.insert(SETTINGS_TABLE, &[row]).await?;
        Ok(Setting {
            id: Some(to_domain_id(id)?),
            ..setting.clone()
        })
    }

    async fn fetch_records(&self, limit: usize) -> Result<Vec<LogRecord>> {
        let sql = format!(
            "SELECT id, timestamp, log_level, message FROM {} ORDER BY timestamp DESC, id DESC LIMIT {}",
            RECORDS_TABLE, limit
        );
        let rows: Vec<RecordRow> = self.client.fetch(&sql, &[], Access::ReadOnly).await?;
        convert_all(rows)
    }

    async fn write_record(&self, record: &LogRecord) -> Result<LogRecord> {
        let _guard = self.write_lock.lock().await;

        match record.id {
            None => {
                let id = self.next_id(RECORDS_TABLE).await?;
                let row = RecordRow {
                    id,
                    timestamp: record.timestamp,
                    log_level: record.log_level.clone(),
                    message: record.message.clone(),
                };
                self.client.insert(RECORDS_TABLE, &[row]).await?;
                Ok(LogRecord {
                    id: Some(to_domain_id(id)?),
                    ..record.clone()
                })
            }
            Some(id) => {
                let key = existing_key(id, "log entry")?;
                if !self.exists(RECORDS_TABLE, key).await? {
                    return Err(StoreError::NotFound(format!("log entry {}", id)));
                }
                let sql = format!(
                    "ALTER TABLE {} UPDATE timestamp = {{ts:DateTime}}, log_level = {{level:String}}, \
                     message = {{message:String}} WHERE id = {{id:UInt64}}",
                    RECORDS_TABLE
                );
                let params: [Param<'_>; 4] = [
                    ("ts", record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
                    ("level", record.log_level.clone()),
                    ("message", record.message.clone()),
                    ("id", key.to_string()),
                ];
                self.client.execute(&sql, &params).await?;
                Ok(record.clone())
            }
        }
    }

    async fn run_read_only(&self, sql: &str) -> Result<Vec<LogRecord>> {
        let rows: Vec<RecordRow> = self.client.fetch(sql, &[], Access::ReadOnly).await?;
        convert_all(rows)
    }

    async fn create_schema(&self) -> Result<()> {
        for statement in CLICKHOUSE_DDL {
            self.client.execute(statement, &[]).await?;
        }
        Ok(())
    }
}

fn existing_key(id: i64, what: &str) -> Result<u64> {
    u64::try_from(id).map_err(|_| StoreError::NotFound(format!("{} {}", what, id)))
}

#[async_trait]
impl StorageGateway for ClickHouseStore {
    fn backend(&self) -> Backend {
        Backend::ClickHouse
    }

    #[instrument(skip(self))]
    async fn list_patterns(&self) -> Result<Vec<LogPattern>> {
        with_self_heal(self, "list_patterns", |s| s.fetch_patterns()).await
    }

    #[instrument(skip(self, pattern), fields(id = ?pattern.id))]
    async fn save_pattern(&self, pattern: LogPattern) -> Result<LogPattern> {
        with_self_heal(self, "save_pattern", |s| s.write_pattern(&pattern)).await
    }

    #[instrument(skip(self))]
    async fn delete_pattern(&self, id: i64) -> Result<()> {
        with_self_heal(self, "delete_pattern", |s| s.remove(PATTERNS_TABLE, id)).await
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
        with_self_heal(self, "list_records", |s| s.fetch_records(limit)).await
    }

    #[instrument(skip(self, record), fields(id = ?record.id))]
    async fn save_record(&self, record: LogRecord) -> Result<LogRecord> {
        with_self_heal(self, "save_record", |s| s.write_record(&record)).await
    }

    #[instrument(skip(self))]
    async fn delete_record(&self, id: i64) -> Result<()> {
        with_self_heal(self, "delete_record", |s| s.remove(RECORDS_TABLE, id)).await
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
        info!("ClickHouse schema ready");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.client.is_healthy().await
    }
}

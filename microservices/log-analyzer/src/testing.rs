//! In-memory stand-ins for the gateway and the text generator

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use loglens_core::{LogPattern, LogRecord, ServiceConfig, Setting, API_KEY_SETTING};
use loglens_store::{guard, Backend, PoolConfig, StorageGateway, StoreConfig, StoreError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::client::{GenerationError, TextGenerator};
use crate::config::{AnalyzerConfig, GeneratorConfig};
use crate::orchestrator::QueryOrchestrator;
use crate::LogAnalyzerService;

type StoreResult<T> = loglens_store::Result<T>;

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 15)
        .and_then(|d| d.and_hms_opt(10, 0, 0))
        .unwrap()
}

/// Service over the given stubs, without touching the environment
pub fn analyzer_service(
    store: Arc<dyn StorageGateway>,
    generator: Arc<ScriptedGenerator>,
    seed_sample_data: bool,
) -> LogAnalyzerService {
    let config = AnalyzerConfig {
        service: ServiceConfig {
            service_name: "log-analyzer".to_string(),
            http_bind: "127.0.0.1:0".to_string(),
            log_level: "info".to_string(),
        },
        store: StoreConfig::Postgres(PoolConfig::default()),
        generator: GeneratorConfig::default(),
        analysis_max_records: 100,
        seed_sample_data,
    };
    let orchestrator = Arc::new(QueryOrchestrator::new(store.clone(), generator, 100));
    LogAnalyzerService::from_parts(config, store, orchestrator)
}

/// Record with a fixed timestamp offset by `id` minutes
pub fn record(id: i64, level: &str, message: &str) -> LogRecord {
    LogRecord {
        id: Some(id),
        ..LogRecord::new(base_time() + Duration::minutes(id), level, message)
    }
}

#[derive(Default)]
pub struct StubGateway {
    patterns: Mutex<Vec<LogPattern>>,
    records: Mutex<Vec<LogRecord>>,
    settings: Mutex<Vec<Setting>>,
    query_failure: Mutex<Option<StoreError>>,
    catalog_failure: Mutex<Option<StoreError>>,
    next_id: Mutex<i64>,
    unhealthy: bool,
    pub schema_inits: Mutex<usize>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1000),
            ..Default::default()
        }
    }

    pub fn with_credential(self, key: &str) -> Self {
        self.settings.lock().push(Setting {
            id: Some(1),
            ..Setting::new(API_KEY_SETTING, key)
        });
        self
    }

    pub fn with_patterns(self, patterns: Vec<LogPattern>) -> Self {
        *self.patterns.lock() = patterns;
        self
    }

    pub fn with_records(self, records: Vec<LogRecord>) -> Self {
        *self.records.lock() = records;
        self
    }

    /// Report the store as unreachable
    pub fn unhealthy(mut self) -> Self {
        self.unhealthy = true;
        self
    }

    /// The next generated query fails with `err`
    pub fn failing_queries(self, err: StoreError) -> Self {
        *self.query_failure.lock() = Some(err);
        self
    }

    /// The next catalog read fails with `err`
    pub fn failing_catalog(self, err: StoreError) -> Self {
        *self.catalog_failure.lock() = Some(err);
        self
    }

    fn assign_id(&self) -> i64 {
        let mut next = self.next_id.lock();
        *next += 1;
        *next
    }
}

#[async_trait]
impl StorageGateway for StubGateway {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn list_patterns(&self) -> StoreResult<Vec<LogPattern>> {
        if let Some(err) = self.catalog_failure.lock().take() {
            return Err(err);
        }
        Ok(self.patterns.lock().clone())
    }

    async fn save_pattern(&self, mut pattern: LogPattern) -> StoreResult<LogPattern> {
        let mut patterns = self.patterns.lock();
        match pattern.id {
            Some(id) => {
                let slot = patterns
                    .iter_mut()
                    .find(|p| p.id == Some(id))
                    .ok_or_else(|| StoreError::NotFound(format!("pattern {}", id)))?;
                *slot = pattern.clone();
            }
            None => {
                pattern.id = Some(self.assign_id());
                patterns.push(pattern.clone());
            }
        }
        Ok(pattern)
    }

    async fn delete_pattern(&self, id: i64) -> StoreResult<()> {
        self.patterns.lock().retain(|p| p.id != Some(id));
        Ok(())
    }

    async fn find_setting(&self, key: &str) -> StoreResult<Option<Setting>> {
        Ok(self.settings.lock().iter().find(|s| s.key == key).cloned())
    }

    async fn save_setting(&self, mut setting: Setting) -> StoreResult<Setting> {
        let mut settings = self.settings.lock();
        if let Some(existing) = settings.iter_mut().find(|s| s.key == setting.key) {
            existing.value = setting.value.clone();
            return Ok(existing.clone());
        }
        setting.id = Some(self.assign_id());
        settings.push(setting.clone());
        Ok(setting)
    }

    async fn list_records(&self, limit: usize) -> StoreResult<Vec<LogRecord>> {
        let mut records = self.records.lock().clone();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn save_record(&self, mut record: LogRecord) -> StoreResult<LogRecord> {
        let mut records = self.records.lock();
        match record.id {
            Some(id) => {
                let slot = records
                    .iter_mut()
                    .find(|r| r.id == Some(id))
                    .ok_or_else(|| StoreError::NotFound(format!("log entry {}", id)))?;
                *slot = record.clone();
            }
            None => {
                record.id = Some(self.assign_id());
                records.push(record.clone());
            }
        }
        Ok(record)
    }

    async fn delete_record(&self, id: i64) -> StoreResult<()> {
        self.records.lock().retain(|r| r.id != Some(id));
        Ok(())
    }

    async fn execute_log_query(&self, query: &str) -> StoreResult<Vec<LogRecord>> {
        guard::ensure_read_only(query)?;
        if let Some(err) = self.query_failure.lock().take() {
            return Err(err);
        }
        Ok(self.records.lock().clone())
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        *self.schema_inits.lock() += 1;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !self.unhealthy
    }
}

/// Generator that replays a fixed script of outcomes and records its inputs
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
    credentials: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, GenerationError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    pub fn replies(replies: &[&str]) -> Arc<Self> {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn credentials(&self) -> Vec<String> {
        self.credentials.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, prompt: &str, credential: &str) -> Result<String, GenerationError> {
        self.prompts.lock().push(prompt.to_string());
        self.credentials.lock().push(credential.to_string());
        self.script
            .lock()
            .pop_front()
            .unwrap_or(Err(GenerationError::EmptyCompletion))
    }
}

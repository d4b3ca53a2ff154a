//! Query Orchestrator
//!
//! Runs one question through the pipeline:
//! credential → patterns → generated query → records → analysis.
//! Every stage is awaited in order; a failure stops the run and is reported
//! with the stage it came from. There are no retries at this level.

use loglens_core::{LogPattern, QueryResult, RequestId, API_KEY_SETTING};
use loglens_store::{StorageGateway, StoreError};
use loglens_telemetry::{Counter, Gauge, Histogram, HistogramSummary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::analysis::AnalysisGenerator;
use crate::client::{GenerationError, TextGenerator};
use crate::query_gen::QueryGenerator;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Question cannot be empty")]
    EmptyQuestion,

    #[error("Text-generation API key is not configured")]
    CredentialMissing,

    #[error("Pattern catalog unavailable: {0}")]
    CatalogUnavailable(#[source] StoreError),

    #[error("Query generation failed: {0}")]
    QueryGenerationFailed(#[source] GenerationError),

    #[error("Generated query rejected: {0}")]
    QueryRejected(#[source] StoreError),

    #[error("Log storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),

    #[error("Analysis generation failed: {0}")]
    AnalysisGenerationFailed(#[source] GenerationError),
}

impl PipelineError {
    pub const KINDS: [&'static str; 7] = [
        "empty_question",
        "credential_missing",
        "catalog_unavailable",
        "query_generation_failed",
        "query_rejected",
        "storage_unavailable",
        "analysis_generation_failed",
    ];

    /// Stable snake_case tag, used for metrics and error codes
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyQuestion => Self::KINDS[0],
            Self::CredentialMissing => Self::KINDS[1],
            Self::CatalogUnavailable(_) => Self::KINDS[2],
            Self::QueryGenerationFailed(_) => Self::KINDS[3],
            Self::QueryRejected(_) => Self::KINDS[4],
            Self::StorageUnavailable(_) => Self::KINDS[5],
            Self::AnalysisGenerationFailed(_) => Self::KINDS[6],
        }
    }
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Start,
    CredentialResolved,
    PatternsLoaded,
    QueryGenerated,
    RecordsFetched,
    AnalysisGenerated,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::CredentialResolved => "credential_resolved",
            Self::PatternsLoaded => "patterns_loaded",
            Self::QueryGenerated => "query_generated",
            Self::RecordsFetched => "records_fetched",
            Self::AnalysisGenerated => "analysis_generated",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Pipeline counters and latency
#[derive(Clone)]
pub struct PipelineMetrics {
    runs: Counter,
    succeeded: Counter,
    in_flight: Gauge,
    latency_ms: Histogram,
    failures: Arc<Vec<Counter>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub runs: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: u64,
    pub failures: BTreeMap<&'static str, u64>,
    pub latency_ms: HistogramSummary,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            runs: Counter::new("pipeline_runs_total"),
            succeeded: Counter::new("pipeline_succeeded_total"),
            in_flight: Gauge::new("pipeline_in_flight"),
            latency_ms: Histogram::new("pipeline_latency_ms"),
            failures: Arc::new(
                PipelineError::KINDS
                    .iter()
                    .map(|kind| Counter::new(&format!("pipeline_failed_{}", kind)))
                    .collect(),
            ),
        }
    }

    fn begin(&self) -> InFlight<'_> {
        self.runs.inc();
        self.in_flight.inc();
        InFlight(&self.in_flight)
    }

    fn finish<T>(&self, outcome: &Result<T, PipelineError>, elapsed: Duration) {
        self.latency_ms.record(elapsed.as_secs_f64() * 1000.0);
        match outcome {
            Ok(_) => self.succeeded.inc(),
            Err(err) => {
                if let Some(idx) = PipelineError::KINDS.iter().position(|k| *k == err.kind()) {
                    self.failures[idx].inc();
                }
            }
        }
    }

    pub fn snapshot(&self) -> PipelineStats {
        let failures: BTreeMap<&'static str, u64> = PipelineError::KINDS
            .iter()
            .zip(self.failures.iter())
            .map(|(kind, counter)| (*kind, counter.get()))
            .collect();

        PipelineStats {
            runs: self.runs.get(),
            succeeded: self.succeeded.get(),
            failed: failures.values().sum(),
            in_flight: self.in_flight.get(),
            failures,
            latency_ms: self.latency_ms.summary(),
        }
    }
}

/// Holds one run in the in-flight gauge until dropped, including when the
/// caller abandons the request mid-pipeline
struct InFlight<'a>(&'a Gauge);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Sequences query generation, retrieval and analysis over an injected gateway
pub struct QueryOrchestrator {
    store: Arc<dyn StorageGateway>,
    query_gen: QueryGenerator,
    analysis: AnalysisGenerator,
    max_records: usize,
    metrics: PipelineMetrics,
}

impl QueryOrchestrator {
    pub fn new(
        store: Arc<dyn StorageGateway>,
        generator: Arc<dyn TextGenerator>,
        max_records: usize,
    ) -> Self {
        let backend = store.backend();
        Self {
            store,
            query_gen: QueryGenerator::new(generator.clone(), backend),
            analysis: AnalysisGenerator::new(generator),
            max_records: max_records.max(1),
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Answer one question
    pub async fn process(&self, question: &str) -> Result<QueryResult, PipelineError> {
        let request_id = RequestId::generate();
        let span = info_span!(
            "pipeline",
            request_id = %request_id,
            backend = %self.store.backend()
        );

        let _in_flight = self.metrics.begin();
        let started = Instant::now();
        let outcome = self.run(question).instrument(span.clone()).await;
        self.metrics.finish(&outcome, started.elapsed());

        if let Err(err) = &outcome {
            span.in_scope(|| warn!(kind = err.kind(), error = %err, "Pipeline failed"));
        }
        outcome
    }

    async fn run(&self, question: &str) -> Result<QueryResult, PipelineError> {
        let question = question.trim();
        debug!(stage = %PipelineStage::Start, chars = question.len(), "Pipeline started");
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }

        let credential = self.resolve_credential().await?;
        debug!(stage = %PipelineStage::CredentialResolved, "Credential resolved");

        let patterns: Vec<LogPattern> = self
            .store
            .list_patterns()
            .await
            .map_err(PipelineError::CatalogUnavailable)?;
        debug!(stage = %PipelineStage::PatternsLoaded, patterns = patterns.len(), "Patterns loaded");

        let query = self
            .query_gen
            .generate_query(question, &patterns, &credential)
            .await
            .map_err(PipelineError::QueryGenerationFailed)?;
        info!(stage = %PipelineStage::QueryGenerated, query = %query, "Generated log query");

        let mut records = self
            .store
            .execute_log_query(query.as_str())
            .await
            .map_err(|e| {
                if e.is_rejected() {
                    PipelineError::QueryRejected(e)
                } else {
                    PipelineError::StorageUnavailable(e)
                }
            })?;
        debug!(stage = %PipelineStage::RecordsFetched, records = records.len(), "Records fetched");

        if records.len() > self.max_records {
            info!(
                returned = records.len(),
                kept = self.max_records,
                "Truncating records before analysis"
            );
            records.truncate(self.max_records);
        }

        let analysis = self
            .analysis
            .analyze(question, &records, &credential)
            .await
            .map_err(PipelineError::AnalysisGenerationFailed)?;
        debug!(stage = %PipelineStage::AnalysisGenerated, chars = analysis.len(), "Analysis generated");

        info!(stage = %PipelineStage::Done, records = records.len(), "Pipeline complete");
        Ok(QueryResult { analysis, records })
    }

    async fn resolve_credential(&self) -> Result<String, PipelineError> {
        let setting = self
            .store
            .find_setting(API_KEY_SETTING)
            .await
            .map_err(PipelineError::StorageUnavailable)?;

        match setting {
            Some(s) if !s.value.trim().is_empty() => Ok(s.value.trim().to_string()),
            _ => Err(PipelineError::CredentialMissing),
        }
    }
}

//! Log Analyzer
//!
//! Answers natural-language questions about stored logs:
//! - generates a retrieval query from the question and the known log patterns
//! - runs it read-only against PostgreSQL or ClickHouse
//! - has the matching records explained in plain language
//!
//! Also serves CRUD endpoints for patterns, log records and the API key.

use chrono::Utc;
use loglens_core::{
    DependencyStatus, HealthStatus, LoglensError, LoglensService, MicroserviceRuntime,
    ReadinessStatus, Result,
};
use loglens_store::StorageGateway;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

mod analysis;
mod api;
mod client;
mod config;
mod extract;
mod orchestrator;
mod query_gen;
mod seed;
#[cfg(test)]
mod testing;

use client::DeepSeekClient;
use config::AnalyzerConfig;
use orchestrator::QueryOrchestrator;

const SERVICE_ID: &str = "log-analyzer";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AnalyzerConfig::from_env()?;

    loglens_telemetry::init(&config.service.service_name)
        .map_err(|e| LoglensError::Internal(e.to_string()))?;

    info!(backend = %config.store.backend(), "Starting Log Analyzer");

    let service = Arc::new(LogAnalyzerService::new(config)?);
    service.bootstrap().await;
    MicroserviceRuntime::run(service).await
}

/// Log analyzer service state
#[derive(Clone)]
pub struct LogAnalyzerService {
    config: AnalyzerConfig,
    store: Arc<dyn StorageGateway>,
    orchestrator: Arc<QueryOrchestrator>,
    start_time: Instant,
}

impl LogAnalyzerService {
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        let store = loglens_store::open(&config.store)?;

        let generator = DeepSeekClient::new(&config.generator)
            .map_err(|e| LoglensError::Config(format!("text generation client: {}", e)))?;
        info!(model = generator.model(), "Text generation client ready");

        let orchestrator = Arc::new(QueryOrchestrator::new(
            store.clone(),
            Arc::new(generator),
            config.analysis_max_records,
        ));

        Ok(Self::from_parts(config, store, orchestrator))
    }

    pub fn from_parts(
        config: AnalyzerConfig,
        store: Arc<dyn StorageGateway>,
        orchestrator: Arc<QueryOrchestrator>,
    ) -> Self {
        Self {
            config,
            store,
            orchestrator,
            start_time: Instant::now(),
        }
    }

    /// Create missing collections and, if enabled, seed sample data.
    /// Failures are logged; gateway calls bootstrap the schema again on demand.
    async fn bootstrap(&self) {
        if let Err(e) = self.store.initialize_schema().await {
            error!(error = %e, "Schema initialization failed; will retry on first use");
            return;
        }

        if self.config.seed_sample_data {
            let now = Utc::now().naive_utc();
            if let Err(e) = seed::seed_sample_data(self.store.as_ref(), now).await {
                warn!(error = %e, "Sample data seeding failed");
            }
        }
    }
}

#[async_trait::async_trait]
impl LoglensService for LogAnalyzerService {
    fn service_id(&self) -> &'static str {
        SERVICE_ID
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        let started = Instant::now();
        let store_healthy = self.store.is_healthy().await;

        ReadinessStatus {
            ready: store_healthy,
            dependencies: vec![DependencyStatus {
                name: self.store.backend().to_string(),
                available: store_healthy,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            }],
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let stats = self.orchestrator.metrics().snapshot();
        info!(
            runs = stats.runs,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Shutting down Log Analyzer"
        );
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        info!(
            http = %self.config.service.http_bind,
            backend = %self.store.backend(),
            "Starting HTTP server"
        );

        let app = api::create_router(api::AppState {
            service: Arc::new(self.clone()),
            store: self.store.clone(),
            orchestrator: self.orchestrator.clone(),
        });

        let listener = tokio::net::TcpListener::bind(&self.config.service.http_bind).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{analyzer_service, ScriptedGenerator, StubGateway};

    #[tokio::test]
    async fn test_bootstrap_initializes_schema_then_seeds() {
        let store = Arc::new(StubGateway::new());
        let service = analyzer_service(store.clone(), ScriptedGenerator::replies(&[]), true);

        service.bootstrap().await;

        assert_eq!(*store.schema_inits.lock(), 1);
        assert_eq!(store.list_patterns().await.unwrap().len(), 3);
        assert_eq!(store.list_records(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_bootstrap_without_seeding() {
        let store = Arc::new(StubGateway::new());
        let service = analyzer_service(store.clone(), ScriptedGenerator::replies(&[]), false);

        service.bootstrap().await;

        assert_eq!(*store.schema_inits.lock(), 1);
        assert!(store.list_patterns().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readiness_follows_store_health() {
        let healthy = analyzer_service(
            Arc::new(StubGateway::new()),
            ScriptedGenerator::replies(&[]),
            false,
        );
        let status = healthy.ready().await;
        assert!(status.ready);
        assert_eq!(status.dependencies[0].name, "postgres");
        assert!(status.dependencies[0].latency_ms.is_some());

        let down = analyzer_service(
            Arc::new(StubGateway::new().unhealthy()),
            ScriptedGenerator::replies(&[]),
            false,
        );
        assert!(!down.ready().await.ready);
        assert!(down.health().await.healthy);
        assert_eq!(down.health().await.service_id, SERVICE_ID);
    }
}

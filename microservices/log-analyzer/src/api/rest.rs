//! Log Analyzer REST API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDateTime, Timelike, Utc};
use loglens_core::{
    mask_secret, minute_timestamp, HealthStatus, LogPattern, LogRecord, LoglensError,
    LoglensService, QueryResult, ReadinessStatus, Setting, API_KEY_SETTING,
};
use loglens_store::{StorageGateway, StoreError};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::orchestrator::{PipelineError, PipelineStats, QueryOrchestrator};

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn LoglensService>,
    pub store: Arc<dyn StorageGateway>,
    pub orchestrator: Arc<QueryOrchestrator>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Pipeline
        .route("/api/v1/query", post(run_query))
        // Patterns
        .route("/api/v1/patterns", get(list_patterns).post(save_pattern))
        .route("/api/v1/patterns/{id}", put(update_pattern).delete(delete_pattern))
        // Log records
        .route("/api/v1/logs", get(list_logs).post(create_log))
        .route("/api/v1/logs/{id}", put(update_log).delete(delete_log))
        // Settings
        .route("/api/v1/settings/api-key", get(get_api_key).post(save_api_key))
        // Stats
        .route("/api/v1/stats", get(stats))
        .with_state(state)
}

/// Error body: `{"error": message, "code": tag}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), code = %self.code, error = %self.message, "Request failed");
        }
        let body = serde_json::json!({ "error": self.message, "code": self.code });
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::EmptyQuestion => StatusCode::BAD_REQUEST,
            PipelineError::CredentialMissing => StatusCode::PRECONDITION_FAILED,
            PipelineError::QueryRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::QueryGenerationFailed(_) | PipelineError::AnalysisGenerationFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::CatalogUnavailable(_) | PipelineError::StorageUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        Self {
            status,
            code: err.kind().to_ascii_uppercase(),
            message: err.to_string(),
        }
    }
}

impl From<LoglensError> for ApiError {
    fn from(err: LoglensError) -> Self {
        Self {
            status: StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        LoglensError::from(err).into()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// Health endpoints

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.service.health().await)
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessStatus>) {
    let status = state.service.ready().await;
    let code = if status.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

// Pipeline

#[derive(Debug, Deserialize)]
struct QueryRequest {
    #[serde(default)]
    query: String,
}

async fn run_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<QueryResult>> {
    if req.query.trim().is_empty() {
        return Err(ApiError::bad_request("Query cannot be empty"));
    }
    let result = state.orchestrator.process(&req.query).await?;
    Ok(Json(result))
}

async fn stats(State(state): State<AppState>) -> Json<PipelineStats> {
    Json(state.orchestrator.metrics().snapshot())
}

// Patterns

async fn list_patterns(State(state): State<AppState>) -> ApiResult<Json<Vec<LogPattern>>> {
    Ok(Json(state.store.list_patterns().await?))
}

async fn save_pattern(
    State(state): State<AppState>,
    Json(pattern): Json<LogPattern>,
) -> ApiResult<Json<LogPattern>> {
    pattern.validate()?;
    Ok(Json(state.store.save_pattern(pattern).await?))
}

async fn update_pattern(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut pattern): Json<LogPattern>,
) -> ApiResult<Json<LogPattern>> {
    pattern.id = Some(id);
    pattern.validate()?;
    Ok(Json(state.store.save_pattern(pattern).await?))
}

async fn delete_pattern(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.store.delete_pattern(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Log records

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

/// Record body; `timestamp` is optional and defaults to now
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordInput {
    #[serde(default, deserialize_with = "optional_timestamp")]
    timestamp: Option<NaiveDateTime>,
    log_level: String,
    message: String,
}

impl RecordInput {
    fn into_record(self, id: Option<i64>) -> ApiResult<LogRecord> {
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().naive_utc().with_nanosecond(0).unwrap_or_default());
        let record = LogRecord {
            id,
            ..LogRecord::new(timestamp, self.log_level.trim(), self.message)
        };
        record.validate()?;
        Ok(record)
    }
}

fn optional_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => minute_timestamp::parse(raw.trim())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
    }
}

async fn list_logs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<LogRecord>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    Ok(Json(state.store.list_records(limit).await?))
}

async fn create_log(
    State(state): State<AppState>,
    Json(input): Json<RecordInput>,
) -> ApiResult<Json<LogRecord>> {
    let record = input.into_record(None)?;
    Ok(Json(state.store.save_record(record).await?))
}

async fn update_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<RecordInput>,
) -> ApiResult<Json<LogRecord>> {
    let record = input.into_record(Some(id))?;
    Ok(Json(state.store.save_record(record).await?))
}

async fn delete_log(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.store.delete_record(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Settings

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyBody {
    #[serde(default)]
    api_key: String,
}

async fn get_api_key(State(state): State<AppState>) -> ApiResult<Json<ApiKeyBody>> {
    let api_key = match state.store.find_setting(API_KEY_SETTING).await? {
        Some(setting) if !setting.value.trim().is_empty() => mask_secret(&setting.value),
        _ => "Not configured".to_string(),
    };
    Ok(Json(ApiKeyBody { api_key }))
}

async fn save_api_key(
    State(state): State<AppState>,
    Json(body): Json<ApiKeyBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let key = body.api_key.trim();
    if key.is_empty() {
        return Err(ApiError::bad_request("API key cannot be empty"));
    }

    let setting = Setting::new(API_KEY_SETTING, key);
    setting.validate()?;
    state.store.save_setting(setting).await?;
    info!("Text-generation API key updated");

    Ok(Json(serde_json::json!({ "message": "API key saved successfully" })))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{analyzer_service, record, ScriptedGenerator, StubGateway};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(store: StubGateway, generator: Arc<ScriptedGenerator>) -> (Router, Arc<dyn StorageGateway>) {
        let store: Arc<dyn StorageGateway> = Arc::new(store);
        let orchestrator = Arc::new(QueryOrchestrator::new(store.clone(), generator.clone(), 100));
        let state = AppState {
            service: Arc::new(analyzer_service(store.clone(), generator, false)),
            store: store.clone(),
            orchestrator,
        };
        (create_router(state), store)
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
                None => Body::empty(),
            })
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let store = StubGateway::new()
            .with_credential("sk-abcdef123456")
            .with_records(vec![record(111, "ERROR", "message send failed for id=111")]);
        let generator = ScriptedGenerator::replies(&[
            "```sql\nSELECT id, timestamp, log_level, message FROM log_entries\n```",
            "{\"analysis\": \"It failed.\"}",
        ]);
        let (router, _) = app(store, generator);

        let (status, body) = send(&router, "POST", "/api/v1/query", Some(json!({"query": "did id=111 send?"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["analysis"], "It failed.");
        assert_eq!(body["logs"][0]["id"], 111);
        assert_eq!(body["logs"][0]["logLevel"], "ERROR");
        assert_eq!(body["logs"][0]["timestamp"], "2024-01-15T11:51:00");
    }

    #[tokio::test]
    async fn test_query_error_statuses() {
        let (router, _) = app(StubGateway::new(), ScriptedGenerator::replies(&[]));

        let (status, body) = send(&router, "POST", "/api/v1/query", Some(json!({"query": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, body) = send(&router, "POST", "/api/v1/query", Some(json!({"query": "errors?"}))).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["code"], "CREDENTIAL_MISSING");

        let store = StubGateway::new().with_credential("sk-1");
        let (router, _) = app(store, ScriptedGenerator::replies(&["```sql\nDROP TABLE log_entries\n```"]));
        let (status, body) = send(&router, "POST", "/api/v1/query", Some(json!({"query": "wipe"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "QUERY_REJECTED");

        let store = StubGateway::new().with_credential("sk-1");
        let (router, _) = app(store, ScriptedGenerator::replies(&["```sql\nSELECT 1"]));
        let (status, _) = send(&router, "POST", "/api/v1/query", Some(json!({"query": "q"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_api_key_masking_and_validation() {
        let (router, _) = app(StubGateway::new(), ScriptedGenerator::replies(&[]));

        let (_, body) = send(&router, "GET", "/api/v1/settings/api-key", None).await;
        assert_eq!(body["apiKey"], "Not configured");

        let (status, _) = send(&router, "POST", "/api/v1/settings/api-key", Some(json!({"apiKey": " "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&router, "POST", "/api/v1/settings/api-key", Some(json!({"apiKey": "sk-1234567890abcd"}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&router, "GET", "/api/v1/settings/api-key", None).await;
        assert_eq!(body["apiKey"], "sk-1****abcd");

        send(&router, "POST", "/api/v1/settings/api-key", Some(json!({"apiKey": "short"}))).await;
        let (_, body) = send(&router, "GET", "/api/v1/settings/api-key", None).await;
        assert_eq!(body["apiKey"], "****");
    }

    #[tokio::test]
    async fn test_pattern_crud() {
        let (router, store) = app(StubGateway::new(), ScriptedGenerator::replies(&[]));

        let (status, created) = send(
            &router,
            "POST",
            "/api/v1/patterns",
            Some(json!({"logLevel": "ERROR", "logTemplate": "send failed for id={}"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = created["id"].as_i64().unwrap();

        let (status, updated) = send(
            &router,
            "PUT",
            &format!("/api/v1/patterns/{}", id),
            Some(json!({"logLevel": "WARN", "logTemplate": "send failed for id={}"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["logLevel"], "WARN");

        let (status, _) = send(
            &router,
            "PUT",
            "/api/v1/patterns/999999",
            Some(json!({"logLevel": "WARN", "logTemplate": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/patterns",
            Some(json!({"logLevel": "", "logTemplate": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&router, "DELETE", &format!("/api/v1/patterns/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(store.list_patterns().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_records_crud() {
        let (router, _) = app(StubGateway::new(), ScriptedGenerator::replies(&[]));

        let (status, created) = send(
            &router,
            "POST",
            "/api/v1/logs",
            Some(json!({"timestamp": "2024-05-01T10:15", "logLevel": "INFO", "message": "User a logged in"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["timestamp"], "2024-05-01T10:15:00");

        let (status, now_stamped) = send(
            &router,
            "POST",
            "/api/v1/logs",
            Some(json!({"logLevel": "WARN", "message": "no timestamp given"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(now_stamped["timestamp"].as_str().is_some());

        let (_, listed) = send(&router, "GET", "/api/v1/logs?limit=1", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["message"], "no timestamp given");

        let id = created["id"].as_i64().unwrap();
        let (status, _) = send(
            &router,
            "PUT",
            &format!("/api/v1/logs/{}", id),
            Some(json!({"timestamp": "2024-05-01T10:16:30", "logLevel": "ERROR", "message": "x".repeat(2001)})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&router, "DELETE", &format!("/api/v1/logs/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, listed) = send(&router, "GET", "/api/v1/logs", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_health_ready_and_stats() {
        let (router, _) = app(StubGateway::new(), ScriptedGenerator::replies(&[]));

        let (status, body) = send(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service_id"], "log-analyzer");

        let (status, body) = send(&router, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
        assert_eq!(body["dependencies"][0]["name"], "postgres");

        send(&router, "POST", "/api/v1/query", Some(json!({"query": "errors?"}))).await;
        let (_, body) = send(&router, "GET", "/api/v1/stats", None).await;
        assert_eq!(body["runs"], 1);
        assert_eq!(body["failures"]["credential_missing"], 1);
    }

    #[tokio::test]
    async fn test_ready_reports_unavailable_store() {
        let (router, _) = app(StubGateway::new().unhealthy(), ScriptedGenerator::replies(&[]));

        let (status, body) = send(&router, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
        assert_eq!(body["dependencies"][0]["available"], false);

        let (status, _) = send(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

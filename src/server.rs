//! HTTP request gateway.
//!
//! Translates wire payloads into engine calls and engine errors into HTTP
//! statuses. The gateway is stateless per request; everything shared
//! lives in [`AppState`] behind `Arc`s.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness probe; returns `OK` |
//! | `GET`  | `/status` | Snapshot, model, and runtime statistics |
//! | `POST` | `/classify` | Classify one weave unit |
//! | `POST` | `/reload-patterns` | Load and atomically publish an artifact |
//!
//! # Error contract
//!
//! `/classify` always answers with a `ClassificationResponse` body; on
//! failure `status` is `"error"` and `errorMessage` carries the stable
//! wire code. HTTP statuses: `400` for malformed or out-of-range
//! requests and empty text, `503` for `index_empty` and `overloaded`,
//! `504` for `deadline_exceeded`, `500` for unexpected internal failures.
//!
//! `/reload-patterns` answers `{"status": "success", ...}` or
//! `{"status": "error", "error": "..."}` with `400` on rejected
//! artifacts; a rejected reload leaves the active snapshot untouched.
//!
//! # Backpressure and deadlines
//!
//! Concurrent classifications are bounded by a semaphore sized from
//! `server.max_inflight`; excess requests fail fast as `overloaded`
//! rather than queue unboundedly. Each classification gets a wall-clock
//! deadline from `server.request_timeout_ms`, checked cooperatively at
//! pipeline safepoints, with an outer watchdog timeout as backstop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::Semaphore;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classifier::{Classifier, Deadline};
use crate::config::Config;
use crate::error::EngineError;
use crate::loader::IndexLoader;
use crate::models::{ClassificationRequest, ClassificationResponse, ResponseStatus};
use crate::stats::StatsTracker;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<Classifier>,
    pub loader: Arc<IndexLoader>,
    pub config: Arc<Config>,
    pub stats: Arc<StatsTracker>,
    inflight: Arc<Semaphore>,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, classifier: Arc<Classifier>, loader: Arc<IndexLoader>) -> Self {
        let inflight = Arc::new(Semaphore::new(config.server.max_inflight));
        Self {
            classifier,
            loader,
            config: Arc::new(config),
            stats: Arc::new(StatsTracker::new()),
            inflight,
            started_at: Instant::now(),
        }
    }
}

/// Builds the gateway router. Exposed separately from [`run_server`] so
/// tests can drive the full HTTP surface on an ephemeral port.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_health))
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/classify", post(handle_classify))
        .route("/reload-patterns", post(handle_reload))
        .layer(cors)
        .with_state(state)
}

/// Binds the configured address and serves requests until terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.server.bind();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// HTTP status for each engine error kind.
fn http_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::InvalidRequest(_) | EngineError::EmptyText => StatusCode::BAD_REQUEST,
        EngineError::IndexEmpty | EngineError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Load(_) | EngineError::IncompatibleModel { .. } => StatusCode::BAD_REQUEST,
        EngineError::Embedding(_)
        | EngineError::DimensionMismatch { .. }
        | EngineError::UnknownPattern(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============ GET /health ============

async fn handle_health() -> &'static str {
    "OK"
}

// ============ GET /status ============

/// Reports the published snapshot (if any), the provider identity, and
/// runtime counters.
async fn handle_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let provider = state.classifier.provider();
    let snapshot = state.classifier.snapshot();

    let (pattern_count, snapshot_id, domains) = match snapshot.as_deref() {
        Some(snap) => (
            snap.len(),
            Some(snap.id().to_string()),
            serde_json::to_value(snap.catalogue().domains()).unwrap_or_default(),
        ),
        None => (0, None, serde_json::json!({})),
    };

    Json(serde_json::json!({
        "service": "pattern-loom",
        "version": env!("CARGO_PKG_VERSION"),
        "patternCount": pattern_count,
        "vectorDim": provider.dimension(),
        "modelDescriptor": provider.descriptor(),
        "snapshotId": snapshot_id,
        "uptimeSeconds": state.started_at.elapsed().as_secs_f64(),
        "domains": domains,
        "runtimeStats": state.stats.summary(),
    }))
}

// ============ POST /classify ============

async fn handle_classify(
    State(state): State<AppState>,
    payload: Result<Json<ClassificationRequest>, JsonRejection>,
) -> impl IntoResponse {
    let started = Instant::now();

    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            let err = EngineError::InvalidRequest(rejection.body_text());
            return failure_reply(Uuid::new_v4(), &err, started);
        }
    };
    let request_id = request.weave_unit.id.unwrap_or_else(Uuid::new_v4);

    // Fail fast instead of queueing when the engine is saturated.
    let _permit = match state.inflight.try_acquire() {
        Ok(permit) => permit,
        Err(_) => {
            warn!(request_id = %request_id, "classification rejected: overloaded");
            state.stats.record(elapsed_ms(started), false);
            return failure_reply(request_id, &EngineError::Overloaded, started);
        }
    };

    let timeout = Duration::from_millis(state.config.server.request_timeout_ms);
    let deadline = Deadline::after(timeout);
    let classifier = Arc::clone(&state.classifier);

    // The pipeline is pure CPU work; run it off the async worker and give
    // the watchdog a little slack so the cooperative safepoint result
    // normally wins.
    let task = tokio::task::spawn_blocking(move || classifier.classify(&request, &deadline));
    let outcome = match tokio::time::timeout(timeout + Duration::from_millis(50), task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => {
            error!(request_id = %request_id, error = %join_error, "classification task failed");
            state.stats.record(elapsed_ms(started), false);
            return internal_reply(request_id, started);
        }
        Err(_) => Err(EngineError::DeadlineExceeded),
    };

    match outcome {
        Ok(response) => {
            state.stats.record(response.processing_time_ms, true);
            (StatusCode::OK, Json(response))
        }
        Err(err) => {
            match &err {
                EngineError::Embedding(detail) => {
                    // Detail goes to the log; the wire gets the sanitised code.
                    error!(request_id = %request_id, detail = %detail, "embedding failure")
                }
                other => warn!(request_id = %request_id, error = %other, "classification rejected"),
            }
            state.stats.record(elapsed_ms(started), false);
            failure_reply(request_id, &err, started)
        }
    }
}

fn failure_reply(
    request_id: Uuid,
    error: &EngineError,
    started: Instant,
) -> (StatusCode, Json<ClassificationResponse>) {
    (
        http_status(error),
        Json(ClassificationResponse::failure(
            request_id,
            error,
            elapsed_ms(started),
        )),
    )
}

/// Last-resort reply for faults with no engine error value (task panics).
fn internal_reply(
    request_id: Uuid,
    started: Instant,
) -> (StatusCode, Json<ClassificationResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ClassificationResponse {
            request_id,
            matched: None,
            alternatives: Vec::new(),
            processing_time_ms: elapsed_ms(started),
            status: ResponseStatus::Error,
            error_message: Some("internal".to_string()),
        }),
    )
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

// ============ POST /reload-patterns ============

/// Request body for `/reload-patterns`. The body may be omitted or `{}`,
/// in which case the configured artifact path is reloaded.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReloadRequest {
    source: Option<PathBuf>,
}

async fn handle_reload(
    State(state): State<AppState>,
    payload: Option<Json<ReloadRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let path = request
        .source
        .unwrap_or_else(|| state.config.index.artifact.clone());

    let loader = Arc::clone(&state.loader);
    let classifier = Arc::clone(&state.classifier);
    let joined =
        tokio::task::spawn_blocking(move || loader.load_and_publish(&path, &classifier)).await;

    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(join_error) => {
            error!(error = %join_error, "reload task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "error": "internal" })),
            );
        }
    };

    match outcome {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "patternCount": outcome.pattern_count,
                "loadTimeMs": outcome.load_time_ms,
                "snapshotId": outcome.snapshot_id,
            })),
        ),
        Err(err) => (
            http_status(&err),
            Json(serde_json::json!({
                "status": "error",
                "error": err.to_string(),
            })),
        ),
    }
}

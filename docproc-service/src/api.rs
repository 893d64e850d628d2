//! HTTP API for the document processing service.
//!
//! - `POST /api/v1/process` admits a job and answers 202 before any work runs
//! - `GET /health` reports liveness and queue state
//! - `GET /metrics` renders Prometheus metrics

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::AuthGate;
use crate::config::{AdmissionConfig, ServerConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, ServiceError, ServiceResult};
use crate::job::ProcessDocumentRequest;

/// Application state
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub auth: Box<dyn AuthGate>,
    pub admission: AdmissionConfig,
    pub metrics: Option<PrometheusHandle>,
    pub start_time: Instant,
}

/// Build the API router
pub fn router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new().route("/v1/process", post(process_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(server.max_body_bytes))
        .layer(TimeoutLayer::new(server.request_timeout()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Admission ===

#[derive(Debug, Serialize)]
struct AcceptedResponse {
    id: String,
    status: &'static str,
}

async fn process_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServiceResult<(StatusCode, Json<AcceptedResponse>)> {
    let bearer = headers.typed_get::<Authorization<Bearer>>();
    if !state.auth.authorize(bearer.as_ref().map(|auth| auth.token())) {
        counter!("docproc_jobs_rejected_total", "reason" => "unauthorized").increment(1);
        return Err(ServiceError::Unauthorized);
    }

    let job = serde_json::from_slice::<ProcessDocumentRequest>(&body)
        .map_err(|e| ServiceError::InvalidRequest {
            message: format!("malformed JSON body: {}", e),
        })
        .and_then(|request| request.into_job(&state.admission))
        .inspect_err(|e| {
            counter!("docproc_jobs_rejected_total", "reason" => "invalid").increment(1);
            warn!(error = %e, "Rejected admission request");
        })?;

    let id = job.id.clone();
    let tenant_id = job.tenant_id.clone();

    if let Err(e) = state.dispatcher.submit(job) {
        let reason = match e {
            DispatchError::QueueFull => "queue_full",
            DispatchError::Closed => "shutting_down",
        };
        counter!("docproc_jobs_rejected_total", "reason" => reason).increment(1);
        return Err(e.into());
    }

    counter!("docproc_jobs_submitted_total").increment(1);
    info!(job_id = %id, tenant_id = %tenant_id, "Job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            id,
            status: "processing",
        }),
    ))
}

// === Health & Metrics ===

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_seconds: u64,
    workers: usize,
    busy_workers: usize,
    queue_depth: usize,
    queue_capacity: usize,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let dispatcher = &state.dispatcher;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        workers: dispatcher.worker_count(),
        busy_workers: dispatcher.busy_workers(),
        queue_depth: dispatcher.queue_depth(),
        queue_capacity: dispatcher.queue_capacity(),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

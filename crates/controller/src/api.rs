//! HTTP façade: health checks, Prometheus metrics and watch management

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use controller_lib::{
    health::{ComponentStatus, HealthRegistry},
    AutoScalerSpec, NotifierSpec, TargetKind, WatchError, WatchService, WatchSpec,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub autoscalers: WatchService<AutoScalerSpec>,
    pub notifiers: WatchService<NotifierSpec>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        autoscalers: WatchService<AutoScalerSpec>,
        notifiers: WatchService<NotifierSpec>,
    ) -> Self {
        Self {
            health_registry,
            autoscalers,
            notifiers,
        }
    }
}

/// Error returned by the watch endpoints
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Watch(WatchError),
}

impl From<WatchError> for ApiError {
    fn from(error: WatchError) -> Self {
        ApiError::Watch(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(key) => (StatusCode::NOT_FOUND, format!("no watch registered at {}", key)),
            ApiError::Watch(error) => {
                let status = match &error {
                    WatchError::Validation(_) => StatusCode::BAD_REQUEST,
                    WatchError::LoopStopped => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, error.to_string())
            }
        };

        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %message, "Watch request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    namespace: Option<String>,
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_watches<S: WatchSpec>(
    State(service): State<WatchService<S>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<S>>, ApiError> {
    let mut specs = service.get_all().await?;
    if let Some(namespace) = query.namespace {
        specs.retain(|spec| spec.target().namespace == namespace);
    }
    Ok(Json(specs))
}

async fn get_watch<S: WatchSpec>(
    State(service): State<WatchService<S>>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> Result<Json<S>, ApiError> {
    let kind: TargetKind = kind.parse().unwrap_or(TargetKind::Unrecognized);
    service
        .get_one(&namespace, kind, &name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{}/{}/{}", namespace, kind, name)))
}

/// Validate, persist and register; an inactive spec removes the watch
async fn put_watch<S: WatchSpec>(
    State(service): State<WatchService<S>>,
    Json(spec): Json<S>,
) -> Result<Json<S>, ApiError> {
    info!(kind = S::KIND, key = %spec.key(), active = spec.is_active(), "Watch submitted");
    service.submit(spec.clone()).await?;
    Ok(Json(spec))
}

async fn delete_watch<S: WatchSpec>(
    State(service): State<WatchService<S>>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind: TargetKind = kind.parse().unwrap_or(TargetKind::Unrecognized);
    if service.disable(&namespace, kind, &name).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("{}/{}/{}", namespace, kind, name)))
    }
}

/// Routes for one watch variant under `path`
fn watch_routes<S: WatchSpec>(path: &str, service: WatchService<S>) -> Router {
    Router::new()
        .route(path, get(list_watches::<S>).put(put_watch::<S>))
        .route(
            &format!("{}/:namespace/:kind/:name", path),
            get(get_watch::<S>).delete(delete_watch::<S>),
        )
        .with_state(service)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let autoscalers = state.autoscalers.clone();
    let notifiers = state.notifiers.clone();

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
        .merge(watch_routes("/api/v1/autoscalers", autoscalers))
        .merge(watch_routes("/api/v1/notifiers", notifiers))
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use super::{
    error::ApiError,
    models::{HealthResponse, MetricsResponse, PodQuery, PodView, ReservationView, TaskView},
    state::AppState,
};

/// Task detail endpoint (GET /operators/tasks/{task_id})
///
/// Returns the task with its decoded meta and every chunk in index order.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .store
        .get_task(&task_id)?
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id}")))?;
    let chunks = state.store.list_chunks(&task_id)?;

    Ok((StatusCode::OK, Json(TaskView::new(&task, &chunks))))
}

/// Cancel endpoint (POST /operators/tasks/{task_id}/cancel)
///
/// Fails the task with reason `cancelled`, fails its open chunks and releases
/// their job slots. A task that already finished yields 409.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.store.cancel_task(&task_id)?;
    let chunks = state.store.list_chunks(&task_id)?;
    info!(task_id = %task_id, "Task cancelled by operator");

    Ok((StatusCode::OK, Json(TaskView::new(&task, &chunks))))
}

/// Reservations of a task (GET /operators/tasks/{task_id}/reservations)
pub async fn list_task_reservations(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.store.get_task(&task_id)?.is_none() {
        return Err(ApiError::NotFound(format!("task {task_id}")));
    }
    let reservations: Vec<ReservationView> = state
        .store
        .list_reservations(&task_id)?
        .iter()
        .map(ReservationView::from)
        .collect();

    Ok((StatusCode::OK, Json(reservations)))
}

/// Pod listing (GET /operators/pods)
///
/// `?mode=&area=&option=` narrows the list to pods eligible for that key.
pub async fn list_pods(
    State(state): State<AppState>,
    Query(query): Query<PodQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pods = match query.affinity_key() {
        Some(key) => state.store.eligible_pods(&key)?,
        None => state.store.list_pods()?,
    };
    let views: Vec<PodView> = pods.iter().map(PodView::from).collect();

    Ok((StatusCode::OK, Json(views)))
}

/// Pod detail (GET /operators/pods/{name})
pub async fn get_pod(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let pod = state
        .store
        .get_pod(&name)?
        .ok_or_else(|| ApiError::NotFound(format!("pod {name}")))?;

    Ok((StatusCode::OK, Json(PodView::from(&pod))))
}

/// Counters and row counts (GET /operators/metrics)
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let response = MetricsResponse {
        counters: state.store.metrics(),
        store: state.store.stats()?,
    };

    Ok((StatusCode::OK, Json(response)))
}

/// Consistency audit (GET /operators/audit)
///
/// Always 200; violations are listed in the body.
pub async fn audit(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.store.audit()?;
    Ok((StatusCode::OK, Json(report)))
}

/// Health check endpoint (GET /health)
///
/// Returns 503 Service Unavailable when the ledger cannot be read.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let ledger = match state.store.stats() {
        Ok(_) => "healthy".to_string(),
        Err(err) => {
            tracing::warn!(error = %err, "Ledger health check failed");
            "unhealthy".to_string()
        }
    };
    components.insert("ledger".to_string(), ledger);

    let all_healthy = components.values().all(|status| status == "healthy");
    let (overall_status, status_code) = if all_healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

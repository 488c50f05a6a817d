//! Per-server lifecycle mutations and health queries.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use mcpgate_core::{HealthAlert, HealthMetrics, HealthRecord};
use serde::Serialize;

use crate::error::HttpError;
use crate::state::AppState;

/// `POST /api/servers/{id}/start`
pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpError> {
    state.gateway.start(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/servers/{id}/stop`
pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpError> {
    state.gateway.stop(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/servers/{id}/restart` - also resets the restart counter.
pub async fn restart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpError> {
    state.gateway.restart(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// History-derived health view for one server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealthReport {
    pub server_id: String,
    pub metrics: HealthMetrics,
    pub alerts: Vec<HealthAlert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<HealthRecord>,
}

/// `GET /api/servers/{id}/health`
pub async fn health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServerHealthReport>, HttpError> {
    let history = state.history.read().await;
    let Some(entry) = history.get(&id) else {
        return Err(HttpError::NotFound(format!("no probe history for {id:?}")));
    };
    Ok(Json(ServerHealthReport {
        server_id: id,
        metrics: entry.metrics(),
        alerts: entry.alerts(),
        latest: entry.latest().cloned(),
    }))
}

//! Config reload.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::HttpError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
    pub servers: usize,
}

/// `POST /api/config/reload` - re-read the config file and reconcile.
pub async fn reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>, HttpError> {
    let servers = state.gateway.reload_config().await?;
    Ok(Json(ReloadResponse { servers }))
}

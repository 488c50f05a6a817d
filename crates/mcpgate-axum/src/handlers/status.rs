//! Status and endpoint listing.

use axum::Json;
use axum::extract::State;
use mcpgate_core::{OpenapiEndpoint, StatusReport};

use crate::error::HttpError;
use crate::state::AppState;

/// `GET /api/status`
pub async fn status(State(state): State<AppState>) -> Result<Json<StatusReport>, HttpError> {
    Ok(Json(state.gateway.status().await?))
}

/// `GET /api/endpoints` - OpenAPI surfaces of healthy servers.
pub async fn endpoints(
    State(state): State<AppState>,
) -> Result<Json<Vec<OpenapiEndpoint>>, HttpError> {
    Ok(Json(state.gateway.endpoints().await?))
}

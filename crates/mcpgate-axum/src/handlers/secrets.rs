//! Secret management. Values go in; only summaries ever come out.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use mcpgate_secrets::SecretSummary;
use serde::Deserialize;

use crate::error::HttpError;
use crate::state::AppState;

/// `GET /api/servers/{id}/secrets` - names and masked metadata only.
pub async fn summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SecretSummary>>, HttpError> {
    Ok(Json(state.secrets.summary(&id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SetSecretBody {
    pub value: String,
}

/// `PUT /api/servers/{id}/secrets/{key}`
pub async fn set(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
    Json(body): Json<SetSecretBody>,
) -> Result<StatusCode, HttpError> {
    if key.trim().is_empty() {
        return Err(HttpError::BadRequest("secret key must not be empty".into()));
    }
    state.secrets.set(&id, &key, &body.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/servers/{id}/secrets/{key}`
pub async fn unset(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<StatusCode, HttpError> {
    state.secrets.unset(&id, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/servers/{id}/secrets` - drop the whole bundle.
pub async fn delete_all(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpError> {
    state.secrets.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

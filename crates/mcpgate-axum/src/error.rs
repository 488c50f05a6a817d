//! HTTP error mapping.
//!
//! Mirrors the supervisor's error taxonomy into status codes with a JSON
//! body the dashboard can render.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mcpgate_secrets::SecretStoreError;
use mcpgate_supervisor::SupervisorError;
use serde::Serialize;
use thiserror::Error;

/// Axum-facing error type.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = ErrorBody {
            error: message,
            status: status.as_u16(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<SupervisorError> for HttpError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::UnknownServer(id) => Self::NotFound(format!("unknown server {id:?}")),
            SupervisorError::DamperTripped(_) | SupervisorError::Unsupported(_) => {
                Self::Conflict(err.to_string())
            }
            SupervisorError::LaunchRejected(_) | SupervisorError::ConfigReload(_) => {
                Self::BadRequest(err.to_string())
            }
            SupervisorError::PortsExhausted(_)
            | SupervisorError::OptionsExhausted(_)
            | SupervisorError::ShuttingDown => Self::ServiceUnavailable(err.to_string()),
        }
    }
}

impl From<SecretStoreError> for HttpError {
    fn from(err: SecretStoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_server_maps_to_404() {
        let err: HttpError = SupervisorError::UnknownServer("x".into()).into();
        assert!(matches!(err, HttpError::NotFound(_)));
    }

    #[test]
    fn damper_maps_to_conflict() {
        let err: HttpError = SupervisorError::DamperTripped("x".into()).into();
        assert!(matches!(err, HttpError::Conflict(_)));
    }

    #[test]
    fn exhausted_ports_map_to_503() {
        let err: HttpError = SupervisorError::PortsExhausted("x".into()).into();
        assert!(matches!(err, HttpError::ServiceUnavailable(_)));
    }
}

//! Server bootstrap: bind-then-serve with graceful shutdown.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::routes::create_router;
use crate::state::AppState;

/// Errors from serving the management API.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Binding the manager port failed; fatal at boot.
    #[error("failed to bind management API on {address}: {reason}")]
    BindFailed { address: String, reason: String },

    #[error("management API server error: {0}")]
    Server(String),
}

/// Bind the management port and serve until cancelled.
///
/// Binds FIRST so a taken port is a boot-time error, then runs the router
/// with graceful shutdown tied to `cancel`.
pub async fn serve(state: AppState, port: u16, cancel: CancellationToken) -> Result<(), ServeError> {
    let address = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| ServeError::BindFailed {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    let bound = listener
        .local_addr()
        .map_err(|e| ServeError::Server(e.to_string()))?;
    info!(address = %bound, "management API listening");

    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ServeError::Server(e.to_string()))
}

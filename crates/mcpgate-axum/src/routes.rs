//! Route definitions and router construction.

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::state::AppState;

/// API routes without the `/api` prefix; the caller nests them.
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(handlers::status::status))
        .route("/endpoints", get(handlers::status::endpoints))
        .route("/servers/{id}/start", post(handlers::servers::start))
        .route("/servers/{id}/stop", post(handlers::servers::stop))
        .route("/servers/{id}/restart", post(handlers::servers::restart))
        .route("/servers/{id}/health", get(handlers::servers::health))
        .route(
            "/servers/{id}/secrets",
            get(handlers::secrets::summary).delete(handlers::secrets::delete_all),
        )
        .route(
            "/servers/{id}/secrets/{key}",
            put(handlers::secrets::set).delete(handlers::secrets::unset),
        )
        .route("/config/reload", post(handlers::config::reload))
}

/// Create the full router: `/health` liveness plus `/api/*`.
///
/// The dashboard is served from a different origin during development, so
/// CORS stays permissive.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes().with_state(state).layer(cors))
}

/// Liveness endpoint.
async fn health_check() -> &'static str {
    "OK"
}

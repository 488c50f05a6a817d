//! Axum management API for mcpgate.
//!
//! Exposes the supervisor's observable state (status, OpenAPI endpoints,
//! per-server health) and its mutations (start/stop/restart, config reload,
//! secret management) as REST routes. Mode-agnostic: handlers talk to an
//! `Arc<dyn GatewayControl>` and never know whether individual or unified
//! supervision is running underneath.

mod bootstrap;
mod error;
mod handlers;
mod routes;
mod state;

pub use bootstrap::{ServeError, serve};
pub use error::HttpError;
pub use routes::create_router;
pub use state::{AppState, AxumContext};

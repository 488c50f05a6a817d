//! Messages into the supervisor actor.
//!
//! The supervisor owns the process registry, fallback state, and port pool;
//! everything else proposes work by sending one of these messages. Child
//! exit handling, probe observations, and reconciliation all serialize on
//! the same actor loop.

use mcpgate_core::{ErrorKind, OpenapiEndpoint, ServerSpec, StatusReport};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Errors surfaced to callers of the supervisor API.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown server {0:?}")]
    UnknownServer(String),

    #[error("server {0:?} is in a crash loop; start refused")]
    DamperTripped(String),

    #[error("no ports available for {0:?}")]
    PortsExhausted(String),

    #[error("launch rejected: {0}")]
    LaunchRejected(String),

    #[error("all proxy types exhausted for {0:?}")]
    OptionsExhausted(String),

    #[error("config reload failed: {0}")]
    ConfigReload(String),

    #[error("operation not supported in this mode: {0}")]
    Unsupported(String),

    #[error("supervisor is shutting down")]
    ShuttingDown,
}

/// One message into the actor.
#[derive(Debug)]
pub enum SupervisorMsg {
    /// Replace the desired set and reconcile live state against it.
    Reconcile { desired: Vec<ServerSpec> },

    /// Operator start request.
    Start {
        server_id: String,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },

    /// Operator stop request.
    Stop {
        server_id: String,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },

    /// Operator restart request; resets the restart counter.
    Restart {
        server_id: String,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },

    /// A supervised child exited on its own.
    ChildExited {
        server_id: String,
        pid: u32,
        code: Option<i32>,
        /// Unix signal that terminated the child, when no exit code exists.
        signal: Option<i32>,
    },

    /// The stderr/stdout classifier extracted an error.
    StreamError {
        server_id: String,
        message: String,
        kind: ErrorKind,
    },

    /// The health monitor observed a probe result (post-warmup only).
    ProbeObserved {
        server_id: String,
        healthy: bool,
        auth_error: bool,
        /// Monitor requests a restart (thresholds crossed, not auth).
        remediate: bool,
    },

    QueryStatus {
        reply: oneshot::Sender<StatusReport>,
    },

    QueryEndpoints {
        reply: oneshot::Sender<Vec<OpenapiEndpoint>>,
    },

    /// Stop everything and exit the actor loop.
    Shutdown { reply: oneshot::Sender<()> },
}

/// What the health monitor needs to know about one live process.
#[derive(Debug, Clone)]
pub struct MonitorTarget {
    pub server_id: String,
    pub port: u16,
    /// Remote kinds get longer probe timeouts.
    pub remote: bool,
    /// Probes before this instant are not trusted; the monitor skips them.
    pub warmup_until: Instant,
}

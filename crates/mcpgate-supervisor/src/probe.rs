//! HTTP health probing.
//!
//! A probe walks the bridge's well-known endpoints in order and reports the
//! first 200 as healthy. A 401 anywhere marks the server auth-required; any
//! other outcome records the last status or transport error.

use std::time::Duration;

use async_trait::async_trait;
use mcpgate_core::{HealthRecord, ServerKind};
use tracing::debug;

/// Endpoints tried in order; first 200 wins.
pub const PROBE_ENDPOINTS: &[&str] = &["/openapi.json", "/docs", "/"];

/// Per-request timeout for stdio-backed bridges.
const STDIO_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-request timeout for remote-backed bridges (SSE handshakes are slow).
const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// The per-request timeout for a server kind.
#[must_use]
pub const fn probe_timeout(kind: ServerKind) -> Duration {
    if kind.is_remote() { REMOTE_TIMEOUT } else { STDIO_TIMEOUT }
}

/// Result of probing one bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub auth_error: bool,
    /// Endpoint that answered 200.
    pub endpoint: Option<String>,
    /// Last status code observed across endpoints.
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    /// Transport error when no endpoint answered at all.
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// Convert to a history record.
    #[must_use]
    pub fn to_record(&self) -> HealthRecord {
        if self.healthy {
            HealthRecord::healthy(
                self.endpoint.as_deref().unwrap_or("/"),
                self.response_time_ms.unwrap_or_default(),
            )
        } else {
            HealthRecord::unhealthy(self.status_code, self.auth_error, self.error.clone())
        }
    }
}

/// Seam for probing; the real implementation speaks HTTP, tests script it.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, port: u16, timeout: Duration) -> ProbeOutcome;

    /// Probe one specific path (unified mode checks `/<id>/docs`).
    ///
    /// The default delegates to the endpoint walk, which is good enough for
    /// scripted probers.
    async fn probe_path(&self, port: u16, _path: &str, timeout: Duration) -> ProbeOutcome {
        self.probe(port, timeout).await
    }
}

/// Reqwest-backed prober against `127.0.0.1:<port>`.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProber {
    async fn get_once(&self, port: u16, path: &str, timeout: Duration) -> ProbeStep {
        let url = format!("http://127.0.0.1:{port}{path}");
        let started = std::time::Instant::now();
        match self.client.get(&url).timeout(timeout).send().await {
            Ok(response) => ProbeStep::Status {
                code: response.status().as_u16(),
                elapsed_ms: started.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
            },
            Err(error) => ProbeStep::Failed(error.to_string()),
        }
    }
}

enum ProbeStep {
    Status { code: u16, elapsed_ms: u64 },
    Failed(String),
}

#[async_trait]
impl HealthProber for HttpProber {
    async fn probe(&self, port: u16, timeout: Duration) -> ProbeOutcome {
        let mut outcome = ProbeOutcome::default();

        for endpoint in PROBE_ENDPOINTS {
            match self.get_once(port, endpoint, timeout).await {
                ProbeStep::Status { code, elapsed_ms } => {
                    outcome.status_code = Some(code);
                    if code == 200 {
                        outcome.healthy = true;
                        outcome.endpoint = Some((*endpoint).to_string());
                        outcome.response_time_ms = Some(elapsed_ms);
                        outcome.error = None;
                        return outcome;
                    }
                    if code == 401 {
                        outcome.auth_error = true;
                    }
                    debug!(port = %port, endpoint = %endpoint, status = %code, "probe miss");
                }
                ProbeStep::Failed(error) => {
                    debug!(port = %port, endpoint = %endpoint, %error, "probe failed");
                    outcome.error = Some(error);
                }
            }
        }

        outcome
    }

    async fn probe_path(&self, port: u16, path: &str, timeout: Duration) -> ProbeOutcome {
        let mut outcome = ProbeOutcome::default();
        match self.get_once(port, path, timeout).await {
            ProbeStep::Status { code, elapsed_ms } => {
                outcome.status_code = Some(code);
                if code == 200 {
                    outcome.healthy = true;
                    outcome.endpoint = Some(path.to_string());
                    outcome.response_time_ms = Some(elapsed_ms);
                } else if code == 401 {
                    outcome.auth_error = true;
                }
            }
            ProbeStep::Failed(error) => outcome.error = Some(error),
        }
        outcome
    }
}

//! Unified mode: one multiplexing bridge child for the whole desired set.
//!
//! The bridge reads a generated config listing every server and serves each
//! one under the route prefix `/<serverId>`. The supervisor here manages
//! exactly one child: start, stop, restart with backoff on crash, a bridge
//! probe with a 30-second startup budget, and per-server health derived from
//! `/<id>/docs`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcpgate_core::{
    OpenapiEndpoint, PortPoolStats, ProxyKind, ProxyMode, RunState, ServerSpec,
    ServerStatusEntry, StatusCounts, StatusReport, load_config,
};
use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{SupervisorError, SupervisorMsg};
use crate::launcher::{LaunchPlan, validate_stdio_spec};
use crate::probe::HealthProber;
use crate::runner::{BridgeChild, BridgeRunner};
use crate::service::GatewayControl;

/// How long the bridge gets to come up before it is declared unhealthy.
const STARTUP_BUDGET: Duration = Duration::from_secs(30);
/// Base delay for crash restarts; doubles per consecutive crash.
const RESTART_BASE: Duration = Duration::from_secs(5);
/// Consecutive crash restarts before giving up.
const MAX_CONSECUTIVE_RESTARTS: u32 = 3;
/// Cadence of bridge and per-server health checks.
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);
/// Per-request probe timeout against the multiplexed bridge.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for the unified supervisor.
#[derive(Debug, Clone)]
pub struct UnifiedOptions {
    /// Port the multiplexing bridge binds.
    pub port: u16,
    pub bind_host: String,
    pub workdir_root: PathBuf,
    pub config_path: PathBuf,
}

#[derive(Default)]
struct UnifiedState {
    desired: Vec<ServerSpec>,
    child: Option<BridgeChild>,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    consecutive_restarts: u32,
    bridge_healthy: bool,
    server_health: HashMap<String, bool>,
    workdir: Option<PathBuf>,
}

/// Supervises the single multiplexing bridge child.
pub struct UnifiedSupervisor {
    options: UnifiedOptions,
    runner: Arc<dyn BridgeRunner>,
    prober: Arc<dyn HealthProber>,
    state: Mutex<UnifiedState>,
    events_tx: mpsc::Sender<SupervisorMsg>,
}

impl UnifiedSupervisor {
    /// Create the supervisor and its crash-handling task.
    pub fn new(
        options: UnifiedOptions,
        runner: Arc<dyn BridgeRunner>,
        prober: Arc<dyn HealthProber>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(16);
        let supervisor = Arc::new(Self {
            options,
            runner,
            prober,
            state: Mutex::new(UnifiedState::default()),
            events_tx,
        });
        tokio::spawn(Self::exit_loop(supervisor.clone(), events_rx));
        supervisor
    }

    /// (Re)start the bridge for a new desired set.
    pub async fn start(&self, desired: Vec<ServerSpec>) -> Result<(), SupervisorError> {
        self.stop_bridge().await;

        let mut state = self.state.lock().await;
        state.desired = desired;
        state.server_health.clear();
        drop(state);

        self.launch_bridge().await
    }

    /// Stop the bridge child, if any.
    pub async fn stop_bridge(&self) {
        let (child, workdir) = {
            let mut state = self.state.lock().await;
            state.bridge_healthy = false;
            (state.child.take(), state.workdir.take())
        };
        if let Some(child) = child {
            info!("stopping unified bridge");
            child.stop().await;
        }
        if let Some(dir) = workdir {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    /// Periodic health loop; runs until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(HEALTH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_health().await,
                () = cancel.cancelled() => break,
            }
        }
    }

    async fn launch_bridge(&self) -> Result<(), SupervisorError> {
        let desired = self.state.lock().await.desired.clone();
        let plan = self
            .build_plan(&desired)
            .map_err(|e| SupervisorError::LaunchRejected(e.to_string()))?;

        let child = self
            .runner
            .launch(&plan, self.events_tx.clone())
            .await
            .map_err(|e| SupervisorError::LaunchRejected(e.to_string()))?;

        {
            let mut state = self.state.lock().await;
            state.pid = child.pid();
            state.started_at = Some(Utc::now());
            state.workdir = plan.workdir.clone();
            state.child = Some(child);
        }
        info!(port = self.options.port, servers = desired.len(), "unified bridge started");

        // Startup budget: poll /docs then /openapi.json once a second.
        let deadline = tokio::time::Instant::now() + STARTUP_BUDGET;
        while tokio::time::Instant::now() < deadline {
            if self.bridge_answers().await {
                let mut state = self.state.lock().await;
                state.bridge_healthy = true;
                state.consecutive_restarts = 0;
                info!("unified bridge is healthy");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        warn!("unified bridge did not become healthy within startup budget");
        self.state.lock().await.bridge_healthy = false;
        Ok(())
    }

    async fn bridge_answers(&self) -> bool {
        for path in ["/docs", "/openapi.json"] {
            let outcome = self
                .prober
                .probe_path(self.options.port, path, PROBE_TIMEOUT)
                .await;
            if outcome.healthy {
                return true;
            }
        }
        false
    }

    async fn check_health(&self) {
        let (has_child, desired) = {
            let state = self.state.lock().await;
            (state.child.is_some(), state.desired.clone())
        };
        if !has_child {
            return;
        }

        let bridge_healthy = self.bridge_answers().await;
        let mut server_health = HashMap::new();
        if bridge_healthy {
            for spec in &desired {
                let outcome = self
                    .prober
                    .probe_path(self.options.port, &format!("/{}/docs", spec.id), PROBE_TIMEOUT)
                    .await;
                server_health.insert(spec.id.clone(), outcome.healthy);
            }
        }

        let mut state = self.state.lock().await;
        state.bridge_healthy = bridge_healthy;
        if bridge_healthy {
            state.consecutive_restarts = 0;
            state.server_health = server_health;
        } else {
            state.server_health.clear();
        }
    }

    async fn exit_loop(this: Arc<Self>, mut events_rx: mpsc::Receiver<SupervisorMsg>) {
        while let Some(msg) = events_rx.recv().await {
            if let SupervisorMsg::ChildExited { code, .. } = msg {
                this.handle_crash(code).await;
            }
        }
    }

    async fn handle_crash(&self, code: Option<i32>) {
        let restarts = {
            let mut state = self.state.lock().await;
            if state.child.is_none() {
                // Intentional stop already cleaned up.
                return;
            }
            state.child = None;
            state.bridge_healthy = false;
            state.server_health.clear();
            state.consecutive_restarts += 1;
            state.consecutive_restarts
        };

        if restarts > MAX_CONSECUTIVE_RESTARTS {
            warn!(?code, restarts, "unified bridge crash limit reached, giving up");
            return;
        }

        let backoff = RESTART_BASE * 2u32.pow(restarts - 1);
        warn!(
            ?code,
            restarts,
            backoff_secs = backoff.as_secs(),
            "unified bridge crashed, restarting"
        );
        tokio::time::sleep(backoff).await;
        if let Err(e) = self.launch_bridge().await {
            warn!(error = %e, "unified bridge restart failed");
        }
    }

    /// Generated multiplexing config: every desired server under one roof.
    fn build_plan(&self, desired: &[ServerSpec]) -> std::io::Result<LaunchPlan> {
        let workdir = self.options.workdir_root.join("unified");
        std::fs::create_dir_all(&workdir)?;

        let mut servers = serde_json::Map::new();
        for spec in desired {
            if !spec.needs_proxy {
                continue;
            }
            if spec.kind.is_remote() {
                servers.insert(
                    spec.id.clone(),
                    json!({ "url": spec.url, "headers": spec.headers }),
                );
                continue;
            }
            if let Err(e) = validate_stdio_spec(spec) {
                warn!(server_id = %spec.id, error = %e, "dropping unsafe server from unified config");
                continue;
            }
            servers.insert(
                spec.id.clone(),
                json!({
                    "command": spec.command,
                    "args": spec.args,
                    "env": spec.env,
                }),
            );
        }

        let config = json!({
            "inference_server": {
                "base_url": "http://127.0.0.1:1/v1",
                "api_key": "unused"
            },
            "mcp_servers": servers,
            "network": {
                "host": "0.0.0.0",
                "port": self.options.port
            },
            "logging": {
                "log_level": "INFO"
            }
        });
        std::fs::write(
            workdir.join("config.json"),
            serde_json::to_vec_pretty(&config).unwrap_or_default(),
        )?;
        debug!(workdir = %workdir.display(), "wrote unified bridge config");

        let mut env: std::collections::BTreeMap<String, String> = std::env::vars().collect();
        env.insert(
            "UV_CACHE_DIR".to_string(),
            self.options
                .workdir_root
                .join("cache")
                .join("uv")
                .display()
                .to_string(),
        );

        Ok(LaunchPlan {
            server_id: "unified".to_string(),
            proxy_kind: ProxyKind::McpBridge,
            port: self.options.port,
            argv: vec!["uvx".to_string(), "mcp-bridge".to_string()],
            env,
            cwd: Some(workdir.clone()),
            workdir: Some(workdir),
        })
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.options.bind_host, self.options.port)
    }

    async fn report(&self) -> StatusReport {
        let state = self.state.lock().await;
        let running = state.child.is_some();
        let mut counts = StatusCounts {
            configured: state.desired.len(),
            ..StatusCounts::default()
        };
        let base = self.base_url();

        let servers = state
            .desired
            .iter()
            .map(|spec| {
                let healthy = running
                    && state
                        .server_health
                        .get(&spec.id)
                        .copied()
                        .unwrap_or(false);
                let run_state = if !spec.needs_proxy {
                    RunState::Skipped
                } else if running {
                    RunState::Running
                } else {
                    RunState::Failed
                };
                match run_state {
                    RunState::Running => counts.running += 1,
                    RunState::Failed => counts.failed += 1,
                    RunState::Skipped => {}
                }
                if healthy {
                    counts.healthy += 1;
                }

                ServerStatusEntry {
                    server_id: spec.id.clone(),
                    configured: true,
                    needs_proxy: spec.needs_proxy,
                    healthy,
                    auth_error: false,
                    port: running.then_some(self.options.port),
                    proxy_type_used: running.then_some(ProxyKind::McpBridge),
                    fallback_used: false,
                    started_at: state.started_at,
                    uptime_secs: state.started_at.map(|t| {
                        (Utc::now() - t).num_seconds().try_into().unwrap_or(0)
                    }),
                    restart_count: state.consecutive_restarts,
                    endpoint: running.then(|| format!("{base}/{}", spec.id)),
                    status: run_state,
                    last_error: None,
                    error_type: None,
                }
            })
            .collect();

        StatusReport {
            mode: ProxyMode::Unified,
            servers,
            counts,
            port_pool: PortPoolStats {
                range_start: self.options.port,
                range_end: self.options.port,
                total: 1,
                allocated: usize::from(running),
                draining: 0,
                free: usize::from(!running),
            },
        }
    }
}

/// [`GatewayControl`] adapter for unified mode.
///
/// Per-server start/restart map onto the one bridge child; stopping a single
/// server is not expressible without a config change.
pub struct UnifiedGateway {
    supervisor: Arc<UnifiedSupervisor>,
}

impl UnifiedGateway {
    #[must_use]
    pub fn new(supervisor: Arc<UnifiedSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl GatewayControl for UnifiedGateway {
    async fn status(&self) -> Result<StatusReport, SupervisorError> {
        Ok(self.supervisor.report().await)
    }

    async fn endpoints(&self) -> Result<Vec<OpenapiEndpoint>, SupervisorError> {
        let state = self.supervisor.state.lock().await;
        let base = self.supervisor.base_url();
        Ok(state
            .desired
            .iter()
            .filter(|spec| state.server_health.get(&spec.id).copied().unwrap_or(false))
            .map(|spec| {
                OpenapiEndpoint::from_base(
                    &spec.id,
                    &format!("{base}/{}", spec.id),
                    ProxyKind::McpBridge,
                )
            })
            .collect())
    }

    async fn start(&self, _server_id: &str) -> Result<(), SupervisorError> {
        let desired = self.supervisor.state.lock().await.desired.clone();
        if self.supervisor.state.lock().await.child.is_some() {
            return Ok(());
        }
        self.supervisor.start(desired).await
    }

    async fn stop(&self, server_id: &str) -> Result<(), SupervisorError> {
        Err(SupervisorError::Unsupported(format!(
            "cannot stop {server_id:?} individually in unified mode"
        )))
    }

    async fn restart(&self, _server_id: &str) -> Result<(), SupervisorError> {
        let desired = self.supervisor.state.lock().await.desired.clone();
        self.supervisor.start(desired).await
    }

    async fn reload_config(&self) -> Result<usize, SupervisorError> {
        let (desired, _digest) = load_config(&self.supervisor.options.config_path)
            .map_err(|e| SupervisorError::ConfigReload(e.to_string()))?;
        let count = desired.len();
        self.supervisor.start(desired).await?;
        Ok(count)
    }

    async fn shutdown(&self) {
        self.supervisor.stop_bridge().await;
    }
}

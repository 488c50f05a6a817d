//! Multi-transport mode: unified bridge plus per-server transport gateways.
//!
//! Composition, not inheritance: this supervisor owns a [`UnifiedSupervisor`]
//! for the OpenAPI surface and additionally launches one gateway child per
//! `(server, enabled transport)` pair. Gateways get the same supervision
//! semantics as individual-mode children: a port from the pool, a warmup
//! window, a liveness probe, and up to three restarts on unexpected exit.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mcpgate_core::{ServerSpec, TransportKind, TransportToggles};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::events::{SupervisorError, SupervisorMsg};
use crate::launcher::{LaunchError, LaunchPlan, validate_stdio_spec};
use crate::port_pool::PortPool;
use crate::probe::HealthProber;
use crate::runner::{BridgeChild, BridgeRunner};
use crate::unified::UnifiedSupervisor;

/// Warmup before the first gateway probe.
const GATEWAY_WARMUP: Duration = Duration::from_secs(8);
/// Restarts allowed per gateway before giving up.
const MAX_GATEWAY_RESTARTS: u32 = 3;
/// Delay before a gateway restart.
const GATEWAY_RESTART_DELAY: Duration = Duration::from_secs(5);
/// Probe timeout for gateway liveness.
const GATEWAY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

struct GatewayEntry {
    port: u16,
    restarts: u32,
    alive: bool,
    child: BridgeChild,
    spec: ServerSpec,
    transport: TransportKind,
}

/// Observable state of one gateway child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayStatus {
    pub server_id: String,
    pub transport: TransportKind,
    pub port: u16,
    pub restarts: u32,
    pub alive: bool,
}

/// Supervises the unified bridge plus auxiliary transport gateways.
pub struct MultiTransportSupervisor {
    unified: Arc<UnifiedSupervisor>,
    runner: Arc<dyn BridgeRunner>,
    prober: Arc<dyn HealthProber>,
    toggles: TransportToggles,
    workdir_root: PathBuf,
    ports: Mutex<PortPool>,
    gateways: Mutex<HashMap<String, GatewayEntry>>,
    events_tx: mpsc::Sender<SupervisorMsg>,
}

impl MultiTransportSupervisor {
    pub fn new(
        unified: Arc<UnifiedSupervisor>,
        runner: Arc<dyn BridgeRunner>,
        prober: Arc<dyn HealthProber>,
        toggles: TransportToggles,
        workdir_root: PathBuf,
        port_range: (u16, u16),
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(32);
        let supervisor = Arc::new(Self {
            unified,
            runner,
            prober,
            toggles,
            workdir_root,
            ports: Mutex::new(PortPool::new(port_range.0, port_range.1)),
            gateways: Mutex::new(HashMap::new()),
            events_tx,
        });
        tokio::spawn(Self::exit_loop(supervisor.clone(), events_rx));
        supervisor
    }

    /// Start the unified bridge and fan out the enabled transports.
    pub async fn start(&self, desired: Vec<ServerSpec>) -> Result<(), SupervisorError> {
        self.unified.start(desired.clone()).await?;
        self.stop_gateways().await;

        for spec in desired {
            // Gateways translate stdio servers; remote servers already speak
            // a streaming transport upstream.
            if !spec.needs_proxy || spec.kind.is_remote() {
                continue;
            }
            for transport in self.toggles.enabled() {
                if let Err(e) = self.spawn_gateway(&spec, transport).await {
                    warn!(
                        server_id = %spec.id,
                        %transport,
                        error = %e,
                        "failed to start transport gateway"
                    );
                }
            }
        }
        Ok(())
    }

    /// Stop every gateway child; the unified bridge is left alone.
    pub async fn stop_gateways(&self) {
        let entries: Vec<(String, GatewayEntry)> =
            self.gateways.lock().await.drain().collect();
        for (key, entry) in entries {
            entry.child.stop().await;
            self.ports.lock().await.release(&key);
        }
    }

    /// Stop everything: gateways, then the unified bridge.
    pub async fn shutdown(&self) {
        self.stop_gateways().await;
        self.unified.stop_bridge().await;
    }

    /// Current gateway table, sorted by server then transport.
    pub async fn gateway_status(&self) -> Vec<GatewayStatus> {
        let gateways = self.gateways.lock().await;
        let mut statuses: Vec<GatewayStatus> = gateways
            .values()
            .map(|entry| GatewayStatus {
                server_id: entry.spec.id.clone(),
                transport: entry.transport,
                port: entry.port,
                restarts: entry.restarts,
                alive: entry.alive,
            })
            .collect();
        statuses.sort_by(|a, b| {
            (a.server_id.as_str(), a.transport.to_string())
                .cmp(&(b.server_id.as_str(), b.transport.to_string()))
        });
        statuses
    }

    async fn spawn_gateway(
        &self,
        spec: &ServerSpec,
        transport: TransportKind,
    ) -> Result<(), SupervisorError> {
        let key = gateway_key(&spec.id, transport);
        let Some(port) = self.ports.lock().await.allocate(&key) else {
            return Err(SupervisorError::PortsExhausted(key));
        };

        let plan = build_gateway_plan(spec, transport, port, &self.workdir_root, &key)
            .map_err(|e| SupervisorError::LaunchRejected(e.to_string()))?;
        let child = self
            .runner
            .launch(&plan, self.events_tx.clone())
            .await
            .map_err(|e| SupervisorError::LaunchRejected(e.to_string()))?;
        info!(server_id = %spec.id, %transport, port, "transport gateway started");

        self.gateways.lock().await.insert(
            key.clone(),
            GatewayEntry {
                port,
                restarts: 0,
                alive: false,
                child,
                spec: spec.clone(),
                transport,
            },
        );

        tokio::time::sleep(GATEWAY_WARMUP).await;
        let alive = self.gateway_alive(port, transport).await;
        if let Some(entry) = self.gateways.lock().await.get_mut(&key) {
            entry.alive = alive;
        }
        if !alive {
            warn!(server_id = %spec.id, %transport, port, "gateway not answering after warmup");
        }
        Ok(())
    }

    /// Liveness: any HTTP status below 500 counts. Websocket gateways also
    /// count a bare TCP connect (the HTTP upgrade path may 400).
    async fn gateway_alive(&self, port: u16, transport: TransportKind) -> bool {
        if transport == TransportKind::Websocket
            && tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok()
        {
            return true;
        }
        for endpoint in transport.probe_endpoints() {
            let outcome = self
                .prober
                .probe_path(port, endpoint, GATEWAY_PROBE_TIMEOUT)
                .await;
            if outcome.healthy || outcome.status_code.is_some_and(|code| code < 500) {
                return true;
            }
        }
        false
    }

    async fn exit_loop(this: Arc<Self>, mut events_rx: mpsc::Receiver<SupervisorMsg>) {
        while let Some(msg) = events_rx.recv().await {
            if let SupervisorMsg::ChildExited { server_id, code, .. } = msg {
                this.handle_gateway_exit(&server_id, code).await;
            }
        }
    }

    async fn handle_gateway_exit(&self, key: &str, code: Option<i32>) {
        let respawn = {
            let mut gateways = self.gateways.lock().await;
            let Some(entry) = gateways.get_mut(key) else {
                return;
            };
            entry.alive = false;
            if entry.restarts >= MAX_GATEWAY_RESTARTS {
                warn!(gateway = %key, ?code, "gateway restart budget exhausted");
                let entry = gateways.remove(key);
                drop(gateways);
                if let Some(entry) = entry {
                    entry.child.stop().await;
                }
                self.ports.lock().await.release(key);
                return;
            }
            entry.restarts += 1;
            debug!(gateway = %key, restarts = entry.restarts, ?code, "gateway exited, restarting");
            (entry.spec.clone(), entry.transport, entry.restarts)
        };

        let (spec, transport, restarts) = respawn;
        tokio::time::sleep(GATEWAY_RESTART_DELAY).await;

        let key_owned = key.to_string();
        let port = self.gateways.lock().await.get(&key_owned).map(|e| e.port);
        let Some(port) = port else { return };
        let plan = match build_gateway_plan(&spec, transport, port, &self.workdir_root, &key_owned)
        {
            Ok(plan) => plan,
            Err(e) => {
                warn!(gateway = %key_owned, error = %e, "gateway respawn plan rejected");
                return;
            }
        };
        match self.runner.launch(&plan, self.events_tx.clone()).await {
            Ok(child) => {
                if let Some(entry) = self.gateways.lock().await.get_mut(&key_owned) {
                    entry.child = child;
                    entry.restarts = restarts;
                }
            }
            Err(e) => {
                warn!(gateway = %key_owned, error = %e, "gateway respawn failed");
            }
        }
    }
}

fn gateway_key(server_id: &str, transport: TransportKind) -> String {
    format!("{server_id}:{transport}")
}

/// Argv for a supergateway child translating stdio to the given transport.
fn build_gateway_plan(
    spec: &ServerSpec,
    transport: TransportKind,
    port: u16,
    workdir_root: &std::path::Path,
    key: &str,
) -> Result<LaunchPlan, LaunchError> {
    validate_stdio_spec(spec)?;
    let command = spec.command.as_deref().ok_or(LaunchError::MissingCommand)?;

    let mut stdio_command = command.to_string();
    for arg in &spec.args {
        stdio_command.push(' ');
        stdio_command.push_str(arg);
    }

    let output = match transport {
        TransportKind::Sse => "sse",
        TransportKind::Websocket => "ws",
        TransportKind::Streamable => "streamableHttp",
    };

    let mut env: BTreeMap<String, String> = std::env::vars().collect();
    env.extend(spec.env.clone());
    env.insert(
        "NPM_CONFIG_CACHE".to_string(),
        workdir_root.join("cache").join("npm").display().to_string(),
    );

    Ok(LaunchPlan {
        server_id: key.to_string(),
        proxy_kind: mcpgate_core::ProxyKind::Mcpo,
        port,
        argv: vec![
            "npx".to_string(),
            "-y".to_string(),
            "supergateway".to_string(),
            "--stdio".to_string(),
            stdio_command,
            "--port".to_string(),
            port.to_string(),
            "--outputTransport".to_string(),
            output.to_string(),
        ],
        env,
        cwd: spec.cwd.clone(),
        workdir: None,
    })
}

//! The supervision actor.
//!
//! One task owns the process registry, per-server fallback state, and the
//! port pool. Reconciliation, operator mutations, child exits, and probe
//! observations all arrive as messages and are handled strictly in order,
//! which is what makes the single-writer invariant hold. Long waits (warmup,
//! reuse cooldown, restart delay) suspend the actor itself; nothing else can
//! mutate the registry in the meantime.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mcpgate_core::{
    ErrorKind, ErrorRecord, OpenapiEndpoint, ProxyKind, ProxyMode, RunState, ServerKind,
    ServerSpec, ServerStatusEntry, StatusCounts, StatusReport,
};
use mcpgate_secrets::SecretStore;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::classify_exit_code;
use crate::events::{MonitorTarget, SupervisorError, SupervisorMsg};
use crate::launcher::BridgeLauncher;
use crate::port_pool::{PortPool, REUSE_COOLDOWN};
use crate::probe::{HealthProber, probe_timeout};
use crate::runner::{BridgeChild, BridgeRunner};

/// Start attempts allowed per server inside the damper window.
const DAMPER_MAX_ATTEMPTS: u32 = 3;
/// The crash-loop damper window.
const DAMPER_WINDOW: Duration = Duration::from_secs(30 * 60);
/// Automatic restarts allowed per server before giving up.
const MAX_RESTARTS: u32 = 3;
/// Delay before an automatic restart after an unexpected exit.
const RESTART_DELAY: Duration = Duration::from_secs(5);
/// Spacing between sequential stops during reconciliation.
const STOP_SPACING: Duration = Duration::from_secs(2);
/// Extra settle time after removing more than three servers; many bridges
/// briefly hold their ports in TIME_WAIT.
const POST_REMOVAL_SETTLE: Duration = Duration::from_secs(5);
/// Warmup before the first probe is trusted.
const WARMUP_STDIO: Duration = Duration::from_secs(8);
const WARMUP_REMOTE: Duration = Duration::from_secs(15);

/// Per-server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ServerState {
    #[default]
    Down,
    Starting,
    Healthy,
    Unhealthy,
    AuthRequired,
    Stopping,
    Failed,
}

/// Fallback bookkeeping per server id. Survives stops by design.
#[derive(Debug)]
struct FallbackState {
    attempted: HashSet<ProxyKind>,
    total_attempts: u32,
    last_attempt_at: Instant,
}

impl Default for FallbackState {
    fn default() -> Self {
        Self {
            attempted: HashSet::new(),
            total_attempts: 0,
            last_attempt_at: Instant::now(),
        }
    }
}

/// Runtime state for one running bridge child.
struct Entry {
    port: u16,
    proxy_kind: ProxyKind,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    warmup_until: Instant,
    fallback_used: bool,
    auth_error: bool,
    healthy: bool,
    /// The effective spec used to launch (secrets already overlaid).
    config: ServerSpec,
    workdir: Option<PathBuf>,
    child: BridgeChild,
}

/// Static configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub default_proxy_type: ProxyKind,
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Scratch root for generated bridge workdirs.
    pub workdir_root: PathBuf,
    /// Host used when rendering endpoint URLs.
    pub bind_host: String,
}

/// Cloneable handle to the supervisor actor.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorMsg>,
}

impl SupervisorHandle {
    /// Replace the desired set and reconcile.
    pub async fn reconcile(&self, desired: Vec<ServerSpec>) -> Result<(), SupervisorError> {
        self.tx
            .send(SupervisorMsg::Reconcile { desired })
            .await
            .map_err(|_| SupervisorError::ShuttingDown)
    }

    pub async fn start(&self, server_id: &str) -> Result<(), SupervisorError> {
        self.roundtrip(|reply| SupervisorMsg::Start {
            server_id: server_id.to_string(),
            reply,
        })
        .await?
    }

    pub async fn stop(&self, server_id: &str) -> Result<(), SupervisorError> {
        self.roundtrip(|reply| SupervisorMsg::Stop {
            server_id: server_id.to_string(),
            reply,
        })
        .await?
    }

    pub async fn restart(&self, server_id: &str) -> Result<(), SupervisorError> {
        self.roundtrip(|reply| SupervisorMsg::Restart {
            server_id: server_id.to_string(),
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<StatusReport, SupervisorError> {
        self.roundtrip(|reply| SupervisorMsg::QueryStatus { reply })
            .await
    }

    pub async fn endpoints(&self) -> Result<Vec<OpenapiEndpoint>, SupervisorError> {
        self.roundtrip(|reply| SupervisorMsg::QueryEndpoints { reply })
            .await
    }

    /// Stop every child and terminate the actor.
    pub async fn shutdown(&self) {
        let _ = self
            .roundtrip(|reply| SupervisorMsg::Shutdown { reply })
            .await;
    }

    /// Raw sender, used by the health monitor and bridge runners.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<SupervisorMsg> {
        self.tx.clone()
    }

    async fn roundtrip<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SupervisorMsg,
    ) -> Result<T, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SupervisorError::ShuttingDown)?;
        rx.await.map_err(|_| SupervisorError::ShuttingDown)
    }
}

/// Spawn the supervisor actor.
///
/// Returns the handle and the monitor-target feed consumed by the health
/// monitor.
pub fn spawn_supervisor(
    config: SupervisorConfig,
    runner: Arc<dyn BridgeRunner>,
    prober: Arc<dyn HealthProber>,
    secrets: Arc<SecretStore>,
) -> (SupervisorHandle, watch::Receiver<Vec<MonitorTarget>>) {
    let (tx, rx) = mpsc::channel(64);
    let (targets_tx, targets_rx) = watch::channel(Vec::new());

    let supervisor = Supervisor {
        launcher: BridgeLauncher::new(config.workdir_root.clone()),
        ports: PortPool::new(config.port_range_start, config.port_range_end),
        config,
        runner,
        prober,
        secrets,
        self_tx: tx.clone(),
        targets_tx,
        desired: BTreeMap::new(),
        registry: HashMap::new(),
        states: HashMap::new(),
        fallback: HashMap::new(),
        errors: HashMap::new(),
        restart_counts: HashMap::new(),
    };
    tokio::spawn(supervisor.run(rx));

    (SupervisorHandle { tx }, targets_rx)
}

struct Supervisor {
    config: SupervisorConfig,
    launcher: BridgeLauncher,
    runner: Arc<dyn BridgeRunner>,
    prober: Arc<dyn HealthProber>,
    secrets: Arc<SecretStore>,
    self_tx: mpsc::Sender<SupervisorMsg>,
    targets_tx: watch::Sender<Vec<MonitorTarget>>,

    desired: BTreeMap<String, ServerSpec>,
    registry: HashMap<String, Entry>,
    states: HashMap<String, ServerState>,
    fallback: HashMap<String, FallbackState>,
    errors: HashMap<String, ErrorRecord>,
    restart_counts: HashMap<String, u32>,
    ports: PortPool,
}

impl Supervisor {
    async fn run(mut self, mut rx: mpsc::Receiver<SupervisorMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                SupervisorMsg::Reconcile { desired } => self.reconcile(desired).await,
                SupervisorMsg::Start { server_id, reply } => {
                    let _ = reply.send(self.handle_start(&server_id).await);
                }
                SupervisorMsg::Stop { server_id, reply } => {
                    let _ = reply.send(self.handle_stop(&server_id).await);
                }
                SupervisorMsg::Restart { server_id, reply } => {
                    let _ = reply.send(self.handle_restart(&server_id).await);
                }
                SupervisorMsg::ChildExited {
                    server_id,
                    pid,
                    code,
                    signal,
                } => self.handle_child_exit(&server_id, pid, code, signal).await,
                SupervisorMsg::StreamError {
                    server_id,
                    message,
                    kind,
                } => self.record_error(&server_id, kind, &message),
                SupervisorMsg::ProbeObserved {
                    server_id,
                    healthy,
                    auth_error,
                    remediate,
                } => self.handle_probe(&server_id, healthy, auth_error, remediate).await,
                SupervisorMsg::QueryStatus { reply } => {
                    let report = self.status();
                    let _ = reply.send(report);
                }
                SupervisorMsg::QueryEndpoints { reply } => {
                    let _ = reply.send(self.endpoints());
                }
                SupervisorMsg::Shutdown { reply } => {
                    self.shutdown_all().await;
                    let _ = reply.send(());
                    break;
                }
            }
            self.publish_targets();
        }
    }

    // ----- reconciliation -------------------------------------------------

    async fn reconcile(&mut self, desired: Vec<ServerSpec>) {
        // Reload safety: a transient parse hiccup must not take the fleet
        // down. An intentionally emptied config with <= 2 live servers still
        // reconciles normally.
        if desired.is_empty() && self.registry.len() > 2 {
            warn!(
                live = self.registry.len(),
                "refusing mass shutdown from empty desired set"
            );
            return;
        }

        let desired_map: BTreeMap<String, ServerSpec> = desired
            .into_iter()
            .map(|spec| (spec.id.clone(), spec))
            .collect();

        // Stops precede starts, sequentially with spacing.
        let removals: Vec<String> = self
            .registry
            .keys()
            .filter(|id| !desired_map.get(*id).is_some_and(|s| s.needs_proxy))
            .cloned()
            .collect();
        let removal_count = removals.len();
        for (index, id) in removals.iter().enumerate() {
            info!(server_id = %id, "stopping removed server");
            self.stop_entry(id).await;
            self.states.insert(id.clone(), ServerState::Down);
            if index + 1 < removal_count {
                tokio::time::sleep(STOP_SPACING).await;
            }
        }
        if removal_count > 3 {
            tokio::time::sleep(POST_REMOVAL_SETTLE).await;
        }

        // Drop bookkeeping for ids that vanished from the config entirely.
        // FallbackState is kept: the damper must survive config churn.
        self.errors.retain(|id, _| desired_map.contains_key(id));
        self.states.retain(|id, _| desired_map.contains_key(id));
        self.restart_counts
            .retain(|id, _| desired_map.contains_key(id));

        self.desired = desired_map.clone();

        for (id, spec) in desired_map {
            if !spec.needs_proxy {
                debug!(server_id = %id, "server does not need a proxy, skipping");
                continue;
            }

            let effective = self.effective_spec(&spec).await;
            let needs_restart = match self.registry.get(&id) {
                None => false,
                Some(entry) => entry.config != effective,
            };

            if needs_restart {
                info!(server_id = %id, "effective spec changed, restarting");
                self.stop_entry(&id).await;
            }
            if !self.registry.contains_key(&id) {
                if let Err(e) = self.start_server(&spec, true).await {
                    warn!(server_id = %id, error = %e, "start failed during reconcile");
                }
            }
        }
    }

    /// The spec as launched: decrypted secrets overlaid onto env.
    async fn effective_spec(&self, spec: &ServerSpec) -> ServerSpec {
        let mut effective = spec.clone();
        match self.secrets.load(&spec.id).await {
            Ok(secrets) => effective.env.extend(secrets),
            Err(e) => {
                warn!(server_id = %spec.id, error = %e, "failed to load secrets, launching without");
            }
        }
        effective
    }

    // ----- operator mutations ---------------------------------------------

    async fn handle_start(&mut self, server_id: &str) -> Result<(), SupervisorError> {
        let Some(spec) = self.desired.get(server_id).cloned() else {
            return Err(SupervisorError::UnknownServer(server_id.to_string()));
        };
        if !spec.needs_proxy || self.registry.contains_key(server_id) {
            return Ok(());
        }
        self.start_server(&spec, true).await
    }

    async fn handle_stop(&mut self, server_id: &str) -> Result<(), SupervisorError> {
        if !self.desired.contains_key(server_id) && !self.registry.contains_key(server_id) {
            return Err(SupervisorError::UnknownServer(server_id.to_string()));
        }
        self.stop_entry(server_id).await;
        self.states
            .insert(server_id.to_string(), ServerState::Down);
        Ok(())
    }

    async fn handle_restart(&mut self, server_id: &str) -> Result<(), SupervisorError> {
        let Some(spec) = self.desired.get(server_id).cloned() else {
            return Err(SupervisorError::UnknownServer(server_id.to_string()));
        };
        // Operator restart wipes the automatic-restart budget.
        self.restart_counts.remove(server_id);
        self.stop_entry(server_id).await;
        self.start_server(&spec, true).await
    }

    // ----- start procedure ------------------------------------------------

    /// Start one server, walking the proxy-type try-order.
    ///
    /// `check_damper` is false on automatic restarts after a child exit,
    /// which re-enter at the port-allocation step.
    async fn start_server(
        &mut self,
        spec: &ServerSpec,
        check_damper: bool,
    ) -> Result<(), SupervisorError> {
        let id = spec.id.clone();
        self.states.insert(id.clone(), ServerState::Starting);

        // Step 1: crash-loop damper.
        if check_damper {
            if let Some(fb) = self.fallback.get(&id) {
                if fb.total_attempts >= DAMPER_MAX_ATTEMPTS {
                    if fb.last_attempt_at.elapsed() < DAMPER_WINDOW {
                        warn!(
                            server_id = %id,
                            attempts = fb.total_attempts,
                            "crash loop damper tripped, refusing start"
                        );
                        self.states.insert(id.clone(), ServerState::Failed);
                        self.record_error(
                            &id,
                            ErrorKind::Runtime,
                            "crash loop damper: too many start attempts within 30 minutes",
                        );
                        return Err(SupervisorError::DamperTripped(id));
                    }
                    // The window has elapsed; the server earns a clean slate.
                    self.fallback.remove(&id);
                }
            }
        }

        // Step 2: port allocation.
        let Some(mut port) = self.ports.allocate(&id) else {
            self.states.insert(id.clone(), ServerState::Failed);
            self.record_error(&id, ErrorKind::Resource, "port range exhausted");
            return Err(SupervisorError::PortsExhausted(id));
        };

        let secrets = match self.secrets.load(&id).await {
            Ok(secrets) => secrets,
            Err(e) => {
                warn!(server_id = %id, error = %e, "failed to load secrets, launching without");
                BTreeMap::new()
            }
        };
        let mut effective = spec.clone();
        effective.env.extend(secrets.clone());

        // Step 3: build the try-order.
        let hinted = spec.proxy_type_hint.is_some();
        let try_order: Vec<ProxyKind> = if let Some(hint) = spec.proxy_type_hint {
            vec![hint]
        } else if spec.kind.is_remote() {
            // mcp-bridge cannot front remote transports.
            vec![ProxyKind::Mcpo]
        } else {
            let attempted = self
                .fallback
                .get(&id)
                .map(|f| f.attempted.clone())
                .unwrap_or_default();
            [
                self.config.default_proxy_type,
                self.config.default_proxy_type.other(),
            ]
            .into_iter()
            .filter(|kind| !attempted.contains(kind))
            .collect()
        };

        if try_order.is_empty() {
            self.ports.release(&id);
            self.states.insert(id.clone(), ServerState::Failed);
            return Err(SupervisorError::OptionsExhausted(id));
        }

        // Step 4: walk the try-order.
        let total = try_order.len();
        for (index, proxy_kind) in try_order.into_iter().enumerate() {
            let last_try = index + 1 == total;

            let fb = self.fallback.entry(id.clone()).or_default();
            fb.attempted.insert(proxy_kind);
            fb.total_attempts += 1;
            fb.last_attempt_at = Instant::now();

            let plan = match self.launcher.plan(spec, port, proxy_kind, &secrets) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(server_id = %id, proxy = %proxy_kind, error = %e, "launch plan rejected");
                    self.record_error(&id, ErrorKind::Config, &e.to_string());
                    if last_try {
                        self.ports.release(&id);
                        self.states.insert(id.clone(), ServerState::Failed);
                        return Err(SupervisorError::LaunchRejected(e.to_string()));
                    }
                    continue;
                }
            };

            let child = match self.runner.launch(&plan, self.self_tx.clone()).await {
                Ok(child) => child,
                Err(e) => {
                    warn!(server_id = %id, proxy = %proxy_kind, error = %e, "spawn failed");
                    self.record_error(&id, ErrorKind::Runtime, &e.to_string());
                    cleanup_workdir(plan.workdir.as_deref());
                    if last_try {
                        self.ports.release(&id);
                        self.states.insert(id.clone(), ServerState::Failed);
                        return Err(SupervisorError::LaunchRejected(e.to_string()));
                    }
                    continue;
                }
            };

            let warmup = warmup_window(spec.kind);
            info!(
                server_id = %id,
                port = %port,
                proxy = %proxy_kind,
                pid = ?child.pid(),
                "bridge child started, warming up"
            );
            self.registry.insert(
                id.clone(),
                Entry {
                    port,
                    proxy_kind,
                    pid: child.pid(),
                    started_at: Utc::now(),
                    warmup_until: Instant::now() + warmup,
                    fallback_used: index > 0,
                    auth_error: false,
                    healthy: false,
                    config: effective.clone(),
                    workdir: plan.workdir.clone(),
                    child,
                },
            );
            self.publish_targets();

            // Warmup: the first probe is not trusted before this has passed.
            tokio::time::sleep(warmup).await;

            let outcome = self.prober.probe(port, probe_timeout(spec.kind)).await;

            if outcome.healthy {
                self.clear_error(&id);
                if let Some(entry) = self.registry.get_mut(&id) {
                    entry.healthy = true;
                    entry.auth_error = false;
                }
                self.states.insert(id.clone(), ServerState::Healthy);
                info!(server_id = %id, port = %port, proxy = %proxy_kind, "server is healthy");
                return Ok(());
            }

            if outcome.auth_error {
                // Surfaced, never iterated: the operator must supply
                // credentials; restarting cannot help.
                if let Some(entry) = self.registry.get_mut(&id) {
                    entry.auth_error = true;
                }
                self.states.insert(id.clone(), ServerState::AuthRequired);
                self.record_error(
                    &id,
                    ErrorKind::Auth,
                    "bridge returned 401; credentials required",
                );
                info!(server_id = %id, "server requires authentication");
                return Ok(());
            }

            if last_try || hinted {
                // Leave the child running; the health monitor owns the next
                // decision.
                self.states.insert(id.clone(), ServerState::Unhealthy);
                self.record_error(
                    &id,
                    ErrorKind::Health,
                    outcome
                        .error
                        .as_deref()
                        .unwrap_or("health probe failed after warmup"),
                );
                return Ok(());
            }

            // Fall back to the next proxy type: stop the child, drain the
            // port, and reallocate after the cooldown.
            info!(server_id = %id, proxy = %proxy_kind, "probe failed, trying next proxy type");
            if let Some(entry) = self.registry.remove(&id) {
                entry.child.stop().await;
                cleanup_workdir(entry.workdir.as_deref());
            }
            self.publish_targets();
            self.ports.release(&id);
            tokio::time::sleep(REUSE_COOLDOWN).await;
            match self.ports.allocate(&id) {
                Some(p) => port = p,
                None => {
                    self.states.insert(id.clone(), ServerState::Failed);
                    self.record_error(&id, ErrorKind::Resource, "port range exhausted");
                    return Err(SupervisorError::PortsExhausted(id));
                }
            }
        }

        self.ports.release(&id);
        self.states.insert(id.clone(), ServerState::Failed);
        Err(SupervisorError::OptionsExhausted(id))
    }

    // ----- stop -----------------------------------------------------------

    /// Stop a child, release its port, clean its workdir. FallbackState is
    /// deliberately left intact.
    async fn stop_entry(&mut self, server_id: &str) {
        let Some(entry) = self.registry.remove(server_id) else {
            return;
        };
        self.states
            .insert(server_id.to_string(), ServerState::Stopping);
        entry.child.stop().await;
        cleanup_workdir(entry.workdir.as_deref());
        self.ports.release(server_id);
        self.publish_targets();
        debug!(server_id = %server_id, port = entry.port, "server stopped");
    }

    // ----- child exit handling --------------------------------------------

    async fn handle_child_exit(
        &mut self,
        server_id: &str,
        pid: u32,
        code: Option<i32>,
        signal: Option<i32>,
    ) {
        match self.registry.get(server_id) {
            // Already stopped or replaced; stale event.
            None => return,
            Some(entry) if pid != 0 && entry.pid.is_some_and(|p| p != pid) => {
                debug!(server_id = %server_id, pid, "stale exit event from a previous child");
                return;
            }
            Some(_) => {}
        }
        let Some(entry) = self.registry.remove(server_id) else {
            return;
        };
        cleanup_workdir(entry.workdir.as_deref());
        self.ports.release(server_id);
        self.publish_targets();

        // SIGTERM/SIGINT and exit 0 are expected terminations.
        let expected = code == Some(0) || matches!(signal, Some(2 | 15));
        if !expected {
            if let Some(code) = code {
                let classified = classify_exit_code(code);
                // The override policy keeps a more specific stderr-derived
                // record if one is already present.
                self.record_error(server_id, classified.kind, &classified.message);
            }
        }

        let Some(spec) = self.desired.get(server_id).cloned() else {
            self.states
                .insert(server_id.to_string(), ServerState::Down);
            return;
        };

        let count = self.restart_counts.get(server_id).copied().unwrap_or(0);
        if count >= MAX_RESTARTS {
            warn!(server_id = %server_id, restarts = count, "restart budget exhausted");
            self.states
                .insert(server_id.to_string(), ServerState::Failed);
            return;
        }
        let attempt = count + 1;
        self.restart_counts.insert(server_id.to_string(), attempt);
        info!(
            server_id = %server_id,
            restart = attempt,
            "child exited unexpectedly, restarting in {}s",
            RESTART_DELAY.as_secs()
        );

        tokio::time::sleep(RESTART_DELAY).await;
        // Re-enter at the port-allocation step; the damper gate applies to
        // fresh start requests, not to this path.
        if let Err(e) = self.start_server(&spec, false).await {
            warn!(server_id = %server_id, error = %e, "automatic restart failed");
        }
    }

    // ----- probe observations ---------------------------------------------

    async fn handle_probe(
        &mut self,
        server_id: &str,
        healthy: bool,
        auth_error: bool,
        remediate: bool,
    ) {
        let Some(entry) = self.registry.get_mut(server_id) else {
            return;
        };
        // Warmup suppression: observations before the first trusted probe
        // never trigger restarts.
        if Instant::now() < entry.warmup_until {
            return;
        }

        entry.healthy = healthy;
        if healthy {
            entry.auth_error = false;
            self.states
                .insert(server_id.to_string(), ServerState::Healthy);
            // A successful probe clears the slate.
            self.clear_error(server_id);
            return;
        }

        if auth_error {
            entry.auth_error = true;
            self.states
                .insert(server_id.to_string(), ServerState::AuthRequired);
            self.record_error(
                server_id,
                ErrorKind::Auth,
                "bridge returned 401; credentials required",
            );
            // Never auto-restart on auth failures.
            return;
        }

        self.states
            .insert(server_id.to_string(), ServerState::Unhealthy);
        self.record_error(server_id, ErrorKind::Health, "health probe failed");

        if remediate {
            let count = self.restart_counts.get(server_id).copied().unwrap_or(0);
            if count >= MAX_RESTARTS {
                warn!(server_id = %server_id, "remediation requested but restart budget exhausted");
                self.states
                    .insert(server_id.to_string(), ServerState::Failed);
                return;
            }
            self.restart_counts.insert(server_id.to_string(), count + 1);
            info!(server_id = %server_id, "health monitor requested restart");
            let Some(spec) = self.desired.get(server_id).cloned() else {
                return;
            };
            self.stop_entry(server_id).await;
            if let Err(e) = self.start_server(&spec, false).await {
                warn!(server_id = %server_id, error = %e, "remediation restart failed");
            }
        }
    }

    // ----- error records --------------------------------------------------

    fn record_error(&mut self, server_id: &str, kind: ErrorKind, message: &str) {
        if ErrorRecord::should_replace(self.errors.get(server_id), kind) {
            self.errors
                .insert(server_id.to_string(), ErrorRecord::new(message, kind));
        }
    }

    fn clear_error(&mut self, server_id: &str) {
        self.errors.remove(server_id);
    }

    // ----- observability --------------------------------------------------

    fn status(&mut self) -> StatusReport {
        let now = Utc::now();
        let mut servers = Vec::with_capacity(self.desired.len());
        let mut counts = StatusCounts {
            configured: self.desired.len(),
            ..StatusCounts::default()
        };

        for (id, spec) in &self.desired {
            let entry = self.registry.get(id);
            let state = self.states.get(id).copied().unwrap_or_default();
            let error = self.errors.get(id);

            let run_state = if entry.is_some() {
                RunState::Running
            } else if spec.needs_proxy {
                RunState::Failed
            } else {
                RunState::Skipped
            };

            match run_state {
                RunState::Running => counts.running += 1,
                RunState::Failed => counts.failed += 1,
                RunState::Skipped => {}
            }
            if entry.is_some_and(|e| e.healthy) {
                counts.healthy += 1;
            }
            if entry.is_some_and(|e| e.auth_error) || state == ServerState::AuthRequired {
                counts.auth_required += 1;
            }

            servers.push(ServerStatusEntry {
                server_id: id.clone(),
                configured: true,
                needs_proxy: spec.needs_proxy,
                healthy: entry.is_some_and(|e| e.healthy),
                auth_error: entry.is_some_and(|e| e.auth_error),
                port: entry.map(|e| e.port),
                proxy_type_used: entry.map(|e| e.proxy_kind),
                fallback_used: entry.is_some_and(|e| e.fallback_used),
                started_at: entry.map(|e| e.started_at),
                uptime_secs: entry.map(|e| {
                    (now - e.started_at).num_seconds().try_into().unwrap_or(0)
                }),
                restart_count: self.restart_counts.get(id).copied().unwrap_or(0),
                endpoint: entry.map(|e| self.endpoint_url(e.port)),
                status: run_state,
                last_error: error.map(|e| e.last_error.clone()),
                error_type: error.map(|e| e.error_type),
            });
        }

        StatusReport {
            mode: ProxyMode::Individual,
            servers,
            counts,
            port_pool: self.ports.stats(),
        }
    }

    fn endpoints(&self) -> Vec<OpenapiEndpoint> {
        self.registry
            .iter()
            .filter(|(_, entry)| entry.healthy)
            .map(|(id, entry)| {
                OpenapiEndpoint::from_base(id, &self.endpoint_url(entry.port), entry.proxy_kind)
            })
            .collect()
    }

    fn endpoint_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.config.bind_host, port)
    }

    fn publish_targets(&self) {
        let targets: Vec<MonitorTarget> = self
            .registry
            .iter()
            .map(|(id, entry)| MonitorTarget {
                server_id: id.clone(),
                port: entry.port,
                remote: entry.config.kind.is_remote(),
                warmup_until: entry.warmup_until,
            })
            .collect();
        let _ = self.targets_tx.send(targets);
    }

    // ----- shutdown -------------------------------------------------------

    async fn shutdown_all(&mut self) {
        info!(live = self.registry.len(), "stopping all bridge children");
        let entries: Vec<(String, Entry)> = self.registry.drain().collect();
        futures_util::future::join_all(entries.iter().map(|(_, entry)| entry.child.stop())).await;
        for (id, entry) in entries {
            cleanup_workdir(entry.workdir.as_deref());
            self.ports.release(&id);
        }
        self.publish_targets();
    }
}

const fn warmup_window(kind: ServerKind) -> Duration {
    if kind.is_remote() {
        WARMUP_REMOTE
    } else {
        WARMUP_STDIO
    }
}

fn cleanup_workdir(workdir: Option<&std::path::Path>) {
    if let Some(dir) = workdir {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "failed to remove bridge workdir");
            }
        }
    }
}

//! End-to-end reconciler scenarios against scripted runner/prober seams.
//!
//! The clock is paused, so warmup windows, reuse cooldowns, and the damper
//! window all elapse instantly while preserving ordering.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mcpgate_core::{ErrorKind, ProxyKind, RunState, ServerKind, ServerSpec};
use mcpgate_secrets::SecretStore;
use mcpgate_supervisor::{
    BridgeChild, BridgeRunner, HealthProber, LaunchError, LaunchPlan, ProbeOutcome,
    SupervisorConfig, SupervisorError, SupervisorHandle, SupervisorMsg, spawn_supervisor,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::advance;

/// Runner that records every plan and hands back inert children.
struct RecordingRunner {
    launches: Mutex<Vec<LaunchPlan>>,
    fail_spawn: bool,
    next_pid: Mutex<u32>,
}

impl RecordingRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            launches: Mutex::new(Vec::new()),
            fail_spawn: false,
            next_pid: Mutex::new(100),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            launches: Mutex::new(Vec::new()),
            fail_spawn: true,
            next_pid: Mutex::new(100),
        })
    }

    fn count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    fn plan(&self, index: usize) -> LaunchPlan {
        self.launches.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl BridgeRunner for RecordingRunner {
    async fn launch(
        &self,
        plan: &LaunchPlan,
        _events: mpsc::Sender<SupervisorMsg>,
    ) -> Result<BridgeChild, LaunchError> {
        if self.fail_spawn {
            return Err(LaunchError::Spawn("scripted spawn failure".to_string()));
        }
        self.launches.lock().unwrap().push(plan.clone());
        let mut pid = self.next_pid.lock().unwrap();
        *pid += 1;
        Ok(BridgeChild::inert(Some(*pid)))
    }
}

fn healthy_outcome() -> ProbeOutcome {
    ProbeOutcome {
        healthy: true,
        endpoint: Some("/openapi.json".to_string()),
        status_code: Some(200),
        response_time_ms: Some(15),
        ..ProbeOutcome::default()
    }
}

fn failed_outcome() -> ProbeOutcome {
    ProbeOutcome {
        status_code: Some(500),
        error: Some("connection reset".to_string()),
        ..ProbeOutcome::default()
    }
}

fn auth_outcome() -> ProbeOutcome {
    ProbeOutcome {
        auth_error: true,
        status_code: Some(401),
        ..ProbeOutcome::default()
    }
}

/// Prober that pops scripted outcomes, then repeats a default.
struct ScriptedProber {
    outcomes: Mutex<VecDeque<ProbeOutcome>>,
    default: ProbeOutcome,
}

impl ScriptedProber {
    fn healthy() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(VecDeque::new()),
            default: healthy_outcome(),
        })
    }

    fn sequence(outcomes: Vec<ProbeOutcome>, default: ProbeOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            default,
        })
    }
}

#[async_trait]
impl HealthProber for ScriptedProber {
    async fn probe(&self, _port: u16, _timeout: Duration) -> ProbeOutcome {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

struct Harness {
    handle: SupervisorHandle,
    runner: Arc<RecordingRunner>,
    secrets: Arc<SecretStore>,
    _tmp: TempDir,
}

fn harness(runner: Arc<RecordingRunner>, prober: Arc<ScriptedProber>) -> Harness {
    let tmp = TempDir::new().unwrap();
    let secrets = Arc::new(SecretStore::open(
        &tmp.path().join("secrets"),
        &tmp.path().join("secrets-tmp"),
    ));
    let config = SupervisorConfig {
        default_proxy_type: ProxyKind::Mcpo,
        port_range_start: 4000,
        port_range_end: 4005,
        workdir_root: tmp.path().join("work"),
        bind_host: "127.0.0.1".to_string(),
    };
    let (handle, _targets) = spawn_supervisor(config, runner.clone(), prober, secrets.clone());
    Harness {
        handle,
        runner,
        secrets,
        _tmp: tmp,
    }
}

fn memory_spec() -> ServerSpec {
    ServerSpec::stdio(
        "memory",
        "npx",
        vec!["-y".into(), "@modelcontextprotocol/server-memory".into()],
    )
}

async fn inject_exit(handle: &SupervisorHandle, server_id: &str, code: i32) {
    handle
        .sender()
        .send(SupervisorMsg::ChildExited {
            server_id: server_id.to_string(),
            pid: 0,
            code: Some(code),
            signal: None,
        })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn happy_start_allocates_first_port() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    h.handle.reconcile(vec![memory_spec()]).await.unwrap();

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.servers.len(), 1);
    let server = &status.servers[0];
    assert_eq!(server.server_id, "memory");
    assert!(server.healthy);
    assert_eq!(server.port, Some(4000));
    assert_eq!(server.proxy_type_used, Some(ProxyKind::Mcpo));
    assert!(!server.fallback_used);
    assert_eq!(server.status, RunState::Running);
    assert_eq!(status.counts.healthy, 1);
    assert_eq!(status.counts.running, 1);

    assert_eq!(h.runner.count(), 1);
    let argv = h.runner.plan(0).argv;
    assert_eq!(argv[0], "uvx");
    assert_eq!(argv[1], "mcpo");

    let endpoints = h.handle.endpoints().await.unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].base_url, "http://127.0.0.1:4000");
}

#[tokio::test(start_paused = true)]
async fn failed_first_probe_falls_back_to_mcp_bridge() {
    let prober = ScriptedProber::sequence(vec![failed_outcome()], healthy_outcome());
    let h = harness(RecordingRunner::new(), prober);
    h.handle.reconcile(vec![memory_spec()]).await.unwrap();

    let status = h.handle.status().await.unwrap();
    let server = &status.servers[0];
    assert!(server.healthy);
    assert!(server.fallback_used);
    assert_eq!(server.proxy_type_used, Some(ProxyKind::McpBridge));

    assert_eq!(h.runner.count(), 2);
    assert_eq!(h.runner.plan(0).proxy_kind, ProxyKind::Mcpo);
    let second = h.runner.plan(1);
    assert_eq!(second.proxy_kind, ProxyKind::McpBridge);
    // The generated config file exists in the bridge workdir.
    let workdir = second.workdir.expect("mcp-bridge plan has a workdir");
    assert!(workdir.join("config.json").exists());
}

#[tokio::test(start_paused = true)]
async fn auth_required_is_surfaced_and_never_iterated() {
    let prober = ScriptedProber::sequence(vec![auth_outcome()], auth_outcome());
    let h = harness(RecordingRunner::new(), prober);
    let spec = ServerSpec::remote("api", ServerKind::Sse, "https://x/sse");
    h.handle.reconcile(vec![spec]).await.unwrap();

    let status = h.handle.status().await.unwrap();
    let server = &status.servers[0];
    assert!(!server.healthy);
    assert!(server.auth_error);
    assert_eq!(server.error_type, Some(ErrorKind::Auth));
    assert_eq!(server.status, RunState::Running);
    assert_eq!(status.counts.auth_required, 1);

    // One launch: no proxy-type iteration on 401.
    assert_eq!(h.runner.count(), 1);

    // A later auth probe observation must not trigger a restart either.
    h.handle
        .sender()
        .send(SupervisorMsg::ProbeObserved {
            server_id: "api".to_string(),
            healthy: false,
            auth_error: true,
            remediate: false,
        })
        .await
        .unwrap();
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.servers[0].restart_count, 0);
    assert_eq!(h.runner.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn proxy_type_hint_disables_fallback() {
    let prober = ScriptedProber::sequence(vec![failed_outcome()], failed_outcome());
    let h = harness(RecordingRunner::new(), prober);
    let spec = memory_spec().with_proxy_type_hint(ProxyKind::McpBridge);
    h.handle.reconcile(vec![spec]).await.unwrap();

    // Single launch with the hinted type, left running unhealthy.
    assert_eq!(h.runner.count(), 1);
    assert_eq!(h.runner.plan(0).proxy_kind, ProxyKind::McpBridge);
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.servers[0].status, RunState::Running);
    assert!(!status.servers[0].healthy);
}

#[tokio::test(start_paused = true)]
async fn crash_loop_restarts_three_times_then_fails_and_damps() {
    let prober = ScriptedProber::sequence(vec![], failed_outcome());
    let h = harness(RecordingRunner::new(), prober);
    let spec = memory_spec().with_proxy_type_hint(ProxyKind::Mcpo);
    h.handle.reconcile(vec![spec]).await.unwrap();
    assert_eq!(h.runner.count(), 1);

    // Three unexpected exits: each buys a restart after a 5-second gap.
    for expected_launches in [2, 3, 4] {
        inject_exit(&h.handle, "memory", 1).await;
        let status = h.handle.status().await.unwrap();
        assert_eq!(h.runner.count(), expected_launches);
        assert_eq!(status.servers[0].restart_count as usize, expected_launches - 1);
    }

    // Fourth exit: budget exhausted, server goes Failed.
    inject_exit(&h.handle, "memory", 1).await;
    let status = h.handle.status().await.unwrap();
    assert_eq!(h.runner.count(), 4);
    assert_eq!(status.servers[0].status, RunState::Failed);
    assert_eq!(status.servers[0].error_type, Some(ErrorKind::Runtime));

    // A fresh start request inside the 30-minute window is refused.
    let err = h.handle.start("memory").await.unwrap_err();
    assert!(matches!(err, SupervisorError::DamperTripped(_)));
    assert_eq!(h.runner.count(), 4);

    // Once the window has elapsed the slate is clean.
    advance(Duration::from_secs(31 * 60)).await;
    h.handle.start("memory").await.unwrap();
    assert_eq!(h.runner.count(), 5);
}

#[tokio::test(start_paused = true)]
async fn damper_refuses_fourth_start_attempt() {
    let prober = ScriptedProber::healthy();
    let tmp = TempDir::new().unwrap();
    let secrets = Arc::new(SecretStore::open(
        &tmp.path().join("secrets"),
        &tmp.path().join("secrets-tmp"),
    ));
    let runner = RecordingRunner::failing();
    let config = SupervisorConfig {
        default_proxy_type: ProxyKind::Mcpo,
        port_range_start: 4000,
        port_range_end: 4005,
        workdir_root: tmp.path().join("work"),
        bind_host: "127.0.0.1".to_string(),
    };
    let (handle, _targets) = spawn_supervisor(config, runner, prober, secrets);

    // Pinned proxy type: one damper attempt per start request.
    let spec = memory_spec().with_proxy_type_hint(ProxyKind::Mcpo);
    handle.reconcile(vec![spec]).await.unwrap(); // attempt 1 (spawn fails)

    for _ in 0..2 {
        let err = handle.start("memory").await.unwrap_err(); // attempts 2, 3
        assert!(matches!(err, SupervisorError::LaunchRejected(_)));
    }
    let err = handle.start("memory").await.unwrap_err(); // attempt 4: refused
    assert!(matches!(err, SupervisorError::DamperTripped(_)));
}

#[tokio::test(start_paused = true)]
async fn hot_reload_stops_removed_server_and_keeps_others() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    let specs = vec![
        ServerSpec::stdio("a", "npx", vec![]),
        ServerSpec::stdio("b", "npx", vec![]),
        ServerSpec::stdio("c", "npx", vec![]),
    ];
    h.handle.reconcile(specs.clone()).await.unwrap();
    assert_eq!(h.runner.count(), 3);

    let before = h.handle.status().await.unwrap();
    let started_a = before.servers[0].started_at;

    // Rewrite config to {a, c}.
    h.handle
        .reconcile(vec![specs[0].clone(), specs[2].clone()])
        .await
        .unwrap();

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.servers.len(), 2);
    assert!(status.servers.iter().all(|s| s.server_id != "b"));
    // Survivors keep their ports, children, and restart counters.
    assert_eq!(h.runner.count(), 3);
    assert_eq!(status.servers[0].started_at, started_a);
    assert_eq!(status.servers[0].port, Some(4000));
    assert_eq!(status.servers[0].restart_count, 0);
    // b's port drains before anyone else may take it.
    assert_eq!(status.port_pool.allocated, 2);
    assert_eq!(status.port_pool.draining, 1);
}

#[tokio::test(start_paused = true)]
async fn empty_desired_set_with_many_live_servers_is_refused() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    let specs: Vec<ServerSpec> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|id| ServerSpec::stdio(*id, "npx", vec![]))
        .collect();
    h.handle.reconcile(specs).await.unwrap();

    // Simulated parse failure: empty desired set. Five live servers stay up.
    h.handle.reconcile(Vec::new()).await.unwrap();
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.counts.running, 5);
}

#[tokio::test(start_paused = true)]
async fn small_fleets_may_be_emptied() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    let specs = vec![
        ServerSpec::stdio("a", "npx", vec![]),
        ServerSpec::stdio("b", "npx", vec![]),
    ];
    h.handle.reconcile(specs).await.unwrap();

    h.handle.reconcile(Vec::new()).await.unwrap();
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.counts.running, 0);
    assert!(status.servers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn spec_change_restarts_with_new_environment() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    h.handle.reconcile(vec![memory_spec()]).await.unwrap();
    assert_eq!(h.runner.count(), 1);

    // Unchanged spec: no restart.
    h.handle.reconcile(vec![memory_spec()]).await.unwrap();
    assert_eq!(h.runner.count(), 1);

    // Changed env: stop then start.
    let changed = memory_spec().with_env("LOG_LEVEL", "debug");
    h.handle.reconcile(vec![changed]).await.unwrap();
    assert_eq!(h.runner.count(), 2);
    assert_eq!(
        h.runner.plan(1).env.get("LOG_LEVEL").map(String::as_str),
        Some("debug")
    );
}

#[tokio::test(start_paused = true)]
async fn non_whitelisted_command_fails_before_spawn() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    let spec = ServerSpec::stdio("evil", "bash", vec!["-c".into(), "id".into()]);
    h.handle.reconcile(vec![spec]).await.unwrap();

    let status = h.handle.status().await.unwrap();
    let server = &status.servers[0];
    assert_eq!(server.status, RunState::Failed);
    assert_eq!(server.error_type, Some(ErrorKind::Config));
    assert_eq!(h.runner.count(), 0);
    assert_eq!(status.port_pool.allocated, 0);
}

#[tokio::test(start_paused = true)]
async fn secrets_are_overlaid_onto_child_environment() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    h.secrets
        .save(
            "memory",
            &[("BRAVE_API_KEY".to_string(), "bsk-123".to_string())]
                .into_iter()
                .collect(),
        )
        .await
        .unwrap();

    h.handle.reconcile(vec![memory_spec()]).await.unwrap();
    assert_eq!(
        h.runner.plan(0).env.get("BRAVE_API_KEY").map(String::as_str),
        Some("bsk-123")
    );
}

#[tokio::test(start_paused = true)]
async fn remediation_request_restarts_within_caps() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    h.handle.reconcile(vec![memory_spec()]).await.unwrap();
    assert_eq!(h.runner.count(), 1);

    h.handle
        .sender()
        .send(SupervisorMsg::ProbeObserved {
            server_id: "memory".to_string(),
            healthy: false,
            auth_error: false,
            remediate: true,
        })
        .await
        .unwrap();

    let status = h.handle.status().await.unwrap();
    assert_eq!(h.runner.count(), 2);
    assert_eq!(status.servers[0].restart_count, 1);
    assert!(status.servers[0].healthy);
}

#[tokio::test(start_paused = true)]
async fn operator_restart_resets_restart_counter() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    let spec = memory_spec().with_proxy_type_hint(ProxyKind::Mcpo);
    h.handle.reconcile(vec![spec]).await.unwrap();

    inject_exit(&h.handle, "memory", 1).await;
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.servers[0].restart_count, 1);

    h.handle.restart("memory").await.unwrap();
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.servers[0].restart_count, 0);
    assert_eq!(status.servers[0].status, RunState::Running);
}

#[tokio::test(start_paused = true)]
async fn operations_on_unknown_servers_error() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    assert!(matches!(
        h.handle.start("ghost").await.unwrap_err(),
        SupervisorError::UnknownServer(_)
    ));
    assert!(matches!(
        h.handle.stop("ghost").await.unwrap_err(),
        SupervisorError::UnknownServer(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn clean_exit_is_not_recorded_as_error() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    let spec = memory_spec().with_proxy_type_hint(ProxyKind::Mcpo);
    h.handle.reconcile(vec![spec]).await.unwrap();

    inject_exit(&h.handle, "memory", 0).await;
    let status = h.handle.status().await.unwrap();
    // Restarted (desired still wants it) but no error recorded for exit 0.
    assert_eq!(h.runner.count(), 2);
    assert!(status.servers[0].last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn needs_proxy_false_is_skipped() {
    let h = harness(RecordingRunner::new(), ScriptedProber::healthy());
    let mut spec = memory_spec();
    spec.needs_proxy = false;
    h.handle.reconcile(vec![spec]).await.unwrap();

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.servers[0].status, RunState::Skipped);
    assert_eq!(h.runner.count(), 0);
}

//! Composition root.
//!
//! This is the only place where the runner, prober, secret store, mode
//! strategy, monitor, and watcher are wired together. Handlers receive the
//! finished context and never construct infrastructure themselves.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use mcpgate_axum::{AppState, AxumContext};
use mcpgate_core::{ProxyMode, Settings, config, paths};
use mcpgate_secrets::SecretStore;
use mcpgate_supervisor::{
    ConfigWatcher, GatewayControl, HealthMonitor, HttpProber, IndividualGateway,
    MultiTransportSupervisor, SharedHealthHistory, SupervisorConfig, TokioBridgeRunner,
    UnifiedGateway, UnifiedOptions, UnifiedSupervisor, content_hash, spawn_supervisor,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Everything the serve loop needs.
pub struct AppContext {
    pub state: AppState,
    pub gateway: Arc<dyn GatewayControl>,
    /// Multi-transport fan-out, when enabled on top of unified mode.
    pub aux: Option<Arc<MultiTransportSupervisor>>,
    pub cancel: CancellationToken,
}

/// Wire up the full gateway for the configured mode.
pub async fn bootstrap(settings: &Settings) -> Result<AppContext> {
    let secrets = Arc::new(SecretStore::open(
        &paths::secrets_dir(),
        &paths::tmpfs_secrets_dir(),
    ));
    let history: SharedHealthHistory = Arc::new(RwLock::new(HashMap::new()));
    let prober = Arc::new(HttpProber::new());
    let runner = Arc::new(TokioBridgeRunner);
    let cancel = CancellationToken::new();

    // Initial desired set. A missing or broken file is not fatal: the
    // watcher picks up the first valid write.
    let (desired, initial_hash) = match std::fs::read(&settings.config_path) {
        Ok(content) => {
            let hash = content_hash(&content);
            match config::parse_config(&content) {
                Ok(desired) => (desired, Some(hash)),
                Err(e) => {
                    warn!(error = %e, "initial config invalid, starting with empty desired set");
                    (Vec::new(), Some(hash))
                }
            }
        }
        Err(e) => {
            warn!(
                path = %settings.config_path.display(),
                error = %e,
                "config file not readable, starting with empty desired set"
            );
            (Vec::new(), None)
        }
    };

    let mut aux = None;
    let gateway: Arc<dyn GatewayControl> = match settings.mode {
        ProxyMode::Individual => {
            let (handle, targets) = spawn_supervisor(
                SupervisorConfig {
                    default_proxy_type: settings.default_proxy_type,
                    port_range_start: settings.port_range_start,
                    port_range_end: settings.port_range_end,
                    workdir_root: paths::bridge_workdir_root(),
                    bind_host: "127.0.0.1".to_string(),
                },
                runner,
                prober.clone(),
                secrets.clone(),
            );
            handle.reconcile(desired).await?;

            let monitor = HealthMonitor::new(
                targets,
                history.clone(),
                prober.clone(),
                handle.sender(),
                cancel.child_token(),
            );
            tokio::spawn(monitor.run());

            Arc::new(IndividualGateway::new(
                handle,
                settings.config_path.clone(),
            ))
        }
        ProxyMode::Unified => {
            let unified = UnifiedSupervisor::new(
                UnifiedOptions {
                    // The unified bridge takes the first port of the range;
                    // transport gateways draw from the rest.
                    port: settings.port_range_start,
                    bind_host: "127.0.0.1".to_string(),
                    workdir_root: paths::bridge_workdir_root(),
                    config_path: settings.config_path.clone(),
                },
                runner.clone(),
                prober.clone(),
            );

            if settings.transports.any() {
                let multi = MultiTransportSupervisor::new(
                    unified.clone(),
                    runner,
                    prober.clone(),
                    settings.transports,
                    paths::bridge_workdir_root(),
                    (settings.port_range_start + 1, settings.port_range_end),
                );
                if let Err(e) = multi.start(desired).await {
                    warn!(error = %e, "multi-transport start failed");
                }
                aux = Some(multi);
            } else if let Err(e) = unified.start(desired).await {
                warn!(error = %e, "unified bridge start failed");
            }

            tokio::spawn(unified.clone().run(cancel.child_token()));
            Arc::new(UnifiedGateway::new(unified))
        }
    };

    let watcher = ConfigWatcher::new(
        settings.config_path.clone(),
        gateway.clone(),
        initial_hash,
        cancel.child_token(),
    );
    tokio::spawn(watcher.run());

    let state: AppState = Arc::new(AxumContext {
        gateway: gateway.clone(),
        secrets,
        history,
    });

    Ok(AppContext {
        state,
        gateway,
        aux,
        cancel,
    })
}

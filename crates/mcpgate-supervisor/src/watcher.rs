//! Live configuration watching.
//!
//! The config file often sits on a bind mount that never delivers inotify
//! events, so the watcher polls the file's mtime once a second and only
//! acts when it moves. A content hash gates the actual reload, so `touch`
//! without changes is free. The reload itself goes through the active
//! gateway, which re-parses the file and reconciles.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::GatewayControl;

/// Poll cadence for the config file's mtime.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls the config file and triggers gateway reloads on change.
pub struct ConfigWatcher {
    path: PathBuf,
    gateway: Arc<dyn GatewayControl>,
    cancel: CancellationToken,
    last_seen_mtime: Option<SystemTime>,
    last_hash: Option<String>,
}

impl ConfigWatcher {
    /// `initial_hash` is the content hash of the config the gateway already
    /// loaded at boot, so the first poll does not re-reconcile it.
    #[must_use]
    pub fn new(
        path: PathBuf,
        gateway: Arc<dyn GatewayControl>,
        initial_hash: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        let last_seen_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        Self {
            path,
            gateway,
            cancel,
            last_seen_mtime,
            last_hash: initial_hash,
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        let mut ticker = interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(path = %self.path.display(), "config watcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll().await,
                () = self.cancel.cancelled() => {
                    debug!("config watcher cancelled");
                    break;
                }
            }
        }
    }

    async fn poll(&mut self) {
        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        if mtime == self.last_seen_mtime {
            return;
        }
        // Remember the mtime even if the read fails, so a broken file does
        // not log an error every second.
        self.last_seen_mtime = mtime;

        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "config file not readable, keeping previous desired set");
                return;
            }
        };
        let hash = content_hash(&content);
        if self.last_hash.as_deref() == Some(hash.as_str()) {
            debug!("config touched but unchanged, skipping reload");
            return;
        }
        self.last_hash = Some(hash);

        match self.gateway.reload_config().await {
            Ok(servers) => info!(servers, "config changed, reconciled"),
            Err(e) => {
                // Keep the previous desired set; the mass-shutdown guard in
                // the supervisor is the second line of defense.
                warn!(error = %e, "config reload failed, keeping previous desired set");
            }
        }
    }
}

/// Hex sha256 of the config content, shared with the boot path.
#[must_use]
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{HealthProber, ProbeOutcome};
    use crate::runner::{BridgeChild, BridgeRunner};
    use crate::service::IndividualGateway;
    use crate::supervisor::{SupervisorConfig, spawn_supervisor};
    use async_trait::async_trait;
    use mcpgate_core::ProxyKind;
    use tempfile::TempDir;

    struct OkRunner;

    #[async_trait]
    impl BridgeRunner for OkRunner {
        async fn launch(
            &self,
            _plan: &crate::launcher::LaunchPlan,
            _events: tokio::sync::mpsc::Sender<crate::events::SupervisorMsg>,
        ) -> Result<BridgeChild, crate::launcher::LaunchError> {
            Ok(BridgeChild::inert(Some(1)))
        }
    }

    struct OkProber;

    #[async_trait]
    impl HealthProber for OkProber {
        async fn probe(&self, _port: u16, _timeout: Duration) -> ProbeOutcome {
            ProbeOutcome {
                healthy: true,
                status_code: Some(200),
                endpoint: Some("/openapi.json".into()),
                response_time_ms: Some(1),
                ..ProbeOutcome::default()
            }
        }
    }

    struct Fixture {
        watcher: ConfigWatcher,
        handle: crate::supervisor::SupervisorHandle,
        config_path: std::path::PathBuf,
        _tmp: TempDir,
    }

    fn fixture(initial_config: &str) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.json");
        std::fs::write(&config_path, initial_config).unwrap();

        let secrets = Arc::new(mcpgate_secrets::SecretStore::open(
            &tmp.path().join("secrets"),
            &tmp.path().join("secrets-tmp"),
        ));
        let (handle, _targets) = spawn_supervisor(
            SupervisorConfig {
                default_proxy_type: ProxyKind::Mcpo,
                port_range_start: 4000,
                port_range_end: 4005,
                workdir_root: tmp.path().join("work"),
                bind_host: "127.0.0.1".to_string(),
            },
            Arc::new(OkRunner),
            Arc::new(OkProber),
            secrets,
        );
        let gateway = Arc::new(IndividualGateway::new(handle.clone(), config_path.clone()));

        let mut watcher = ConfigWatcher::new(
            config_path.clone(),
            gateway,
            None,
            CancellationToken::new(),
        );
        // Force the first poll to see the file as new.
        watcher.last_seen_mtime = None;

        Fixture {
            watcher,
            handle,
            config_path,
            _tmp: tmp,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn config_rewrite_triggers_reconcile() {
        let mut f = fixture(r#"{"mcpServers": {}}"#);

        f.watcher.poll().await;
        assert_eq!(f.handle.status().await.unwrap().servers.len(), 0);

        std::fs::write(
            &f.config_path,
            r#"{"mcpServers": {"memory": {"command": "npx", "args": ["-y", "x"]}}}"#,
        )
        .unwrap();
        f.watcher.last_seen_mtime = None; // coarse-mtime filesystems
        f.watcher.poll().await;

        let status = f.handle.status().await.unwrap();
        assert_eq!(status.servers.len(), 1);
        assert_eq!(status.servers[0].server_id, "memory");
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_rewrite_keeps_previous_desired_set() {
        let mut f = fixture(r#"{"mcpServers": {"memory": {"command": "npx"}}}"#);

        f.watcher.poll().await;
        assert_eq!(f.handle.status().await.unwrap().servers.len(), 1);

        std::fs::write(&f.config_path, b"{broken json").unwrap();
        f.watcher.last_seen_mtime = None;
        f.watcher.poll().await;

        assert_eq!(f.handle.status().await.unwrap().servers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_without_change_skips_reload() {
        let mut f = fixture(r#"{"mcpServers": {"memory": {"command": "npx"}}}"#);
        f.watcher.poll().await;

        let before = f.handle.status().await.unwrap().servers[0].started_at;

        // Same content, new mtime.
        std::fs::write(
            &f.config_path,
            r#"{"mcpServers": {"memory": {"command": "npx"}}}"#,
        )
        .unwrap();
        f.watcher.last_seen_mtime = None;
        f.watcher.poll().await;

        let after = f.handle.status().await.unwrap().servers[0].started_at;
        assert_eq!(before, after);
    }
}

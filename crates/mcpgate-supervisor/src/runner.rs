//! The spawn seam.
//!
//! [`BridgeRunner`] turns a launch plan into a running child. The production
//! implementation spawns real processes with piped output; tests provide
//! scripted runners so the whole reconcile loop runs under a paused clock.

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::events::SupervisorMsg;
use crate::launcher::{LaunchError, LaunchPlan};
use crate::process::{shutdown_child, spawn_stream_reader};

struct StopRequest {
    done: oneshot::Sender<()>,
}

/// Handle to one spawned bridge child.
///
/// The child itself is owned by a waiter task; the handle only carries the
/// pid and a stop channel. Dropping the handle leaves the child running
/// (the supervisor always stops explicitly).
#[derive(Debug)]
pub struct BridgeChild {
    pid: Option<u32>,
    stop_tx: mpsc::Sender<StopRequest>,
}

impl BridgeChild {
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Stop the child: SIGTERM, three-second grace, SIGKILL.
    ///
    /// Resolves once the child has been reaped. Stopping an already-exited
    /// child is a no-op.
    pub async fn stop(&self) {
        let (done, wait) = oneshot::channel();
        if self.stop_tx.send(StopRequest { done }).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// A handle with no process behind it; stop resolves immediately.
    ///
    /// Used by scripted runners in tests.
    #[must_use]
    pub fn inert(pid: Option<u32>) -> Self {
        let (stop_tx, mut stop_rx) = mpsc::channel::<StopRequest>(1);
        tokio::spawn(async move {
            while let Some(req) = stop_rx.recv().await {
                let _ = req.done.send(());
            }
        });
        Self { pid, stop_tx }
    }
}

/// Spawns bridge children from launch plans.
#[async_trait]
pub trait BridgeRunner: Send + Sync {
    /// Spawn the child described by `plan`.
    ///
    /// The runner wires the child's stdout/stderr into the classifier and
    /// reports unexpected exits through `events`.
    async fn launch(
        &self,
        plan: &LaunchPlan,
        events: mpsc::Sender<SupervisorMsg>,
    ) -> Result<BridgeChild, LaunchError>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioBridgeRunner;

#[async_trait]
impl BridgeRunner for TokioBridgeRunner {
    async fn launch(
        &self,
        plan: &LaunchPlan,
        events: mpsc::Sender<SupervisorMsg>,
    ) -> Result<BridgeChild, LaunchError> {
        let program = plan
            .argv
            .first()
            .ok_or_else(|| LaunchError::Spawn("empty argv".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(&plan.argv[1..]);
        // The environment was captured as a value at plan time; nothing
        // leaks in from the current process beyond what the plan carries.
        cmd.env_clear();
        cmd.envs(&plan.env);
        if let Some(cwd) = &plan.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::Spawn(format!("{program}: {e}")))?;
        let pid = child.id();
        debug!(
            server_id = %plan.server_id,
            pid = ?pid,
            port = %plan.port,
            proxy = %plan.proxy_kind,
            "spawned bridge child"
        );

        if let Some(stdout) = child.stdout.take() {
            spawn_stream_reader(stdout, plan.server_id.clone(), "stdout", events.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_stream_reader(stderr, plan.server_id.clone(), "stderr", events.clone());
        }

        let (stop_tx, mut stop_rx) = mpsc::channel::<StopRequest>(1);
        let server_id = plan.server_id.clone();
        let child_pid = pid.unwrap_or_default();

        tokio::spawn(async move {
            let report_exit = |status: std::process::ExitStatus| {
                let events = events.clone();
                let server_id = server_id.clone();
                async move {
                    let signal = exit_signal(&status);
                    debug!(
                        server_id = %server_id,
                        code = ?status.code(),
                        signal = ?signal,
                        "bridge child exited"
                    );
                    let _ = events
                        .send(SupervisorMsg::ChildExited {
                            server_id,
                            pid: child_pid,
                            code: status.code(),
                            signal,
                        })
                        .await;
                }
            };

            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => report_exit(status).await,
                        Err(e) => {
                            warn!(server_id = %server_id, error = %e, "wait on bridge child failed");
                        }
                    }
                }
                req = stop_rx.recv() => {
                    match req {
                        Some(req) => {
                            let _ = shutdown_child(&mut child).await;
                            let _ = req.done.send(());
                        }
                        None => {
                            // All handles dropped; still wait for the exit
                            // and report it.
                            if let Ok(status) = child.wait().await {
                                report_exit(status).await;
                            }
                        }
                    }
                }
            }
        });

        Ok(BridgeChild { pid, stop_tx })
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

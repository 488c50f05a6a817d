//! Periodic health monitoring.
//!
//! The monitor probes every live process on a fixed cadence, appends results
//! to the per-server history ring buffers, evaluates alert thresholds, and
//! proposes remediation to the supervisor through its bounded queue. It
//! never spawns or kills anything itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mcpgate_core::{AlertSeverity, HealthHistory, ServerKind};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{MonitorTarget, SupervisorMsg};
use crate::probe::{HealthProber, probe_timeout};

/// Probe cadence per live process.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive failures that trigger a remediation request.
const REMEDIATE_CONSECUTIVE: usize = 5;
/// Recent failure rate that triggers a remediation request.
const REMEDIATE_FAILURE_RATE: f64 = 0.9;

/// Shared probe history, written here and read by the management API.
pub type SharedHealthHistory = Arc<RwLock<HashMap<String, HealthHistory>>>;

/// Continuous monitor over the supervisor's live-process feed.
pub struct HealthMonitor {
    targets: watch::Receiver<Vec<MonitorTarget>>,
    history: SharedHealthHistory,
    prober: Arc<dyn HealthProber>,
    events: mpsc::Sender<SupervisorMsg>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        targets: watch::Receiver<Vec<MonitorTarget>>,
        history: SharedHealthHistory,
        prober: Arc<dyn HealthProber>,
        events: mpsc::Sender<SupervisorMsg>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            targets,
            history,
            prober,
            events,
            cancel,
        }
    }

    /// Run until cancelled. One tick probes all live processes concurrently.
    pub async fn run(mut self) {
        let mut ticker = interval(PROBE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("health monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                () = self.cancel.cancelled() => {
                    debug!("health monitor cancelled");
                    break;
                }
            }
        }
    }

    async fn tick(&mut self) {
        let now = Instant::now();
        let targets: Vec<MonitorTarget> = self
            .targets
            .borrow_and_update()
            .iter()
            // Probes during a start's warmup window are not trusted.
            .filter(|t| t.warmup_until <= now)
            .cloned()
            .collect();
        if targets.is_empty() {
            return;
        }

        let probes = targets.iter().map(|target| {
            let prober = self.prober.clone();
            let kind = if target.remote {
                ServerKind::Sse
            } else {
                ServerKind::Stdio
            };
            async move { prober.probe(target.port, probe_timeout(kind)).await }
        });
        let outcomes = futures_util::future::join_all(probes).await;

        for (target, outcome) in targets.iter().zip(outcomes) {
            let record = outcome.to_record();
            let auth_error = record.auth_error;
            let healthy = record.healthy;

            let (metrics, alerts) = {
                let mut history = self.history.write().await;
                let entry = history.entry(target.server_id.clone()).or_default();
                entry.push(record);
                (entry.metrics(), entry.alerts())
            };

            for alert in &alerts {
                match alert.severity {
                    AlertSeverity::High => {
                        warn!(server_id = %target.server_id, kind = ?alert.kind, "{}", alert.message);
                    }
                    AlertSeverity::Medium | AlertSeverity::Low => {
                        info!(server_id = %target.server_id, kind = ?alert.kind, "{}", alert.message);
                    }
                }
            }

            // Remediation policy: auth failures are surfaced, never restarted;
            // slow responses alert but never remediate.
            let remediate = !auth_error
                && (metrics.consecutive_failures >= REMEDIATE_CONSECUTIVE
                    || (metrics.samples >= 10
                        && metrics.recent_failure_rate >= REMEDIATE_FAILURE_RATE));

            // Bounded queue: drop the observation rather than block probing.
            let msg = SupervisorMsg::ProbeObserved {
                server_id: target.server_id.clone(),
                healthy,
                auth_error,
                remediate,
            };
            if let Err(e) = self.events.try_send(msg) {
                warn!(server_id = %target.server_id, error = %e, "supervisor queue full, dropping probe event");
            }
        }
    }
}

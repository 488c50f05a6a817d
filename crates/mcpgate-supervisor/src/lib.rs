//! The supervision engine for mcpgate.
//!
//! Declarative-state reconciliation over a dynamic set of bridge children:
//! port allocation with reuse cooldowns, health-driven restart, proxy-type
//! fallback, crash-loop damping, stderr classification, and a polling
//! configuration watcher. The supervisor runs as a single-writer actor;
//! the health monitor and config watcher are independent loops that feed it
//! events.

mod classifier;
mod events;
mod launcher;
mod monitor;
mod multi_transport;
mod port_pool;
mod probe;
mod process;
mod runner;
mod service;
mod supervisor;
mod unified;
mod watcher;

pub use classifier::{Classified, classify_block, classify_exit_code, classify_line};
pub use events::{MonitorTarget, SupervisorError, SupervisorMsg};
pub use launcher::{BridgeLauncher, LaunchError, LaunchPlan};
pub use monitor::{HealthMonitor, PROBE_INTERVAL, SharedHealthHistory};
pub use multi_transport::{GatewayStatus, MultiTransportSupervisor};
pub use port_pool::{PortPool, REUSE_COOLDOWN};
pub use probe::{HealthProber, HttpProber, PROBE_ENDPOINTS, ProbeOutcome, probe_timeout};
pub use process::{STOP_GRACE, shutdown_child, spawn_stream_reader};
pub use runner::{BridgeChild, BridgeRunner, TokioBridgeRunner};
pub use service::{GatewayControl, IndividualGateway};
pub use supervisor::{SupervisorConfig, SupervisorHandle, spawn_supervisor};
pub use unified::{UnifiedGateway, UnifiedOptions, UnifiedSupervisor};
pub use watcher::{ConfigWatcher, POLL_INTERVAL, content_hash};

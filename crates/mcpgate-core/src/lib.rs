//! Core domain types and configuration loading for mcpgate.
//!
//! This crate holds the pure domain model: server specifications, health and
//! error records, status DTOs, the configuration document loader, and the
//! environment-driven settings. No process spawning, no HTTP, no crypto -
//! those live in the adapter crates.

pub mod config;
pub mod domain;
pub mod paths;
pub mod settings;

// Re-export commonly used types for convenience
pub use config::{ConfigDigest, ConfigError, load_config};
pub use domain::{
    AlertKind, AlertSeverity, ErrorKind, ErrorRecord, HealthAlert, HealthHistory, HealthMetrics,
    HealthRecord, OpenapiEndpoint, PortPoolStats, ProxyKind, RunState, ServerKind, ServerSpec,
    ServerStatusEntry, StatusCounts, StatusReport,
};
pub use settings::{ProxyMode, Settings, SettingsError, TransportKind, TransportToggles};

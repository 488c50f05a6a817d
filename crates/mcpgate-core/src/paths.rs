//! Filesystem locations used by mcpgate.

use std::path::PathBuf;

/// Root directory for persistent state.
///
/// Falls back to a dot-directory in the working directory when the platform
/// data directory cannot be resolved (minimal containers).
#[must_use]
pub fn data_root() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from(".mcpgate"), |dir| dir.join("mcpgate"))
}

/// Default location of the watched configuration document, used when
/// `CLAUDE_CONFIG_PATH` is unset.
#[must_use]
pub fn default_config_path() -> PathBuf {
    data_root().join("claude_config.json")
}

/// Preferred (persistent) directory for encrypted secret bundles.
#[must_use]
pub fn secrets_dir() -> PathBuf {
    data_root().join("secrets")
}

/// Tmpfs fallback for secret bundles when the persistent directory is not
/// writable. Survives until reboot only.
#[must_use]
pub fn tmpfs_secrets_dir() -> PathBuf {
    std::env::temp_dir().join("mcpgate-secrets")
}

/// Scratch space for generated bridge working directories.
#[must_use]
pub fn bridge_workdir_root() -> PathBuf {
    std::env::temp_dir().join("mcpgate-bridges")
}

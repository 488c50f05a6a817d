//! Config file reading, parsing, and change detection.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use super::document::RawServerEntry;
use crate::domain::{ServerKind, ServerSpec};

/// Errors that reject a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate server id {0:?}")]
    DuplicateId(String),
}

/// Identity of a loaded document: mtime plus content hash.
///
/// The watcher compares digests to short-circuit reloads where the file was
/// touched but not changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDigest {
    pub mtime: Option<SystemTime>,
    pub content_hash: String,
}

impl ConfigDigest {
    fn of(mtime: Option<SystemTime>, content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self {
            mtime,
            content_hash: format!("{:x}", hasher.finalize()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfigDocument {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: BTreeMap<String, serde_json::Value>,
}

/// Load and parse the config document at `path`.
///
/// Returns the deterministic desired set (sorted by id) plus a digest for
/// change detection.
pub fn load_config(path: &Path) -> Result<(Vec<ServerSpec>, ConfigDigest), ConfigError> {
    let content = std::fs::read(path)?;
    let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
    let digest = ConfigDigest::of(mtime, &content);
    let specs = parse_config(&content)?;
    Ok((specs, digest))
}

/// Parse a config document from raw bytes.
pub fn parse_config(content: &[u8]) -> Result<Vec<ServerSpec>, ConfigError> {
    let document: RawConfigDocument = serde_json::from_slice(content)?;

    let mut specs: Vec<ServerSpec> = Vec::with_capacity(document.mcp_servers.len());
    for (raw_id, value) in document.mcp_servers {
        let id = raw_id.trim().to_string();
        if id.is_empty() {
            warn!("skipping server entry with blank id");
            continue;
        }
        if specs.iter().any(|spec| spec.id == id) {
            return Err(ConfigError::DuplicateId(id));
        }

        let entry: RawServerEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(error) => {
                warn!(server_id = %id, %error, "skipping malformed server entry");
                continue;
            }
        };

        match build_spec(&id, entry) {
            Some(spec) => {
                for warning in spec.lint() {
                    warn!(server_id = %id, "{warning}");
                }
                specs.push(spec);
            }
            None => {
                warn!(
                    server_id = %id,
                    "skipping entry: no command and no sse/streamable-http url"
                );
            }
        }
    }

    specs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(specs)
}

/// Apply the kind-discrimination rules to one raw entry.
fn build_spec(id: &str, entry: RawServerEntry) -> Option<ServerSpec> {
    let remote_kind = match entry.transport.as_deref().map(str::trim) {
        Some("sse") if entry.has_url() => Some(ServerKind::Sse),
        Some("streamable-http") if entry.has_url() => Some(ServerKind::StreamableHttp),
        _ => None,
    };

    if let Some(kind) = remote_kind {
        let mut spec = ServerSpec::remote(id, kind, entry.url.unwrap_or_default());
        spec.headers = entry.headers;
        spec.env = entry.env;
        spec.always_allow = entry.always_allow;
        // SSE and streamable-http are always proxied for OpenAPI compatibility.
        spec.needs_proxy = true;
        return Some(spec);
    }

    let command = entry.command?;
    let mut spec = ServerSpec::stdio(id, command, entry.args);
    spec.env = entry.env;
    spec.cwd = entry.cwd;
    spec.env_file = entry.env_file;
    spec.proxy_type_hint = entry.proxy_type;
    spec.needs_proxy = entry.needs_proxy.unwrap_or(true);
    spec.always_allow = entry.always_allow;
    Some(spec)
}

//! Server specification domain types.
//!
//! A [`ServerSpec`] is the declarative, immutable description of one managed
//! MCP server. Specs are produced by the configuration loader, frozen for a
//! reconcile cycle, and replaced wholesale on reload.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Transport kind of a managed server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerKind {
    /// Local subprocess speaking MCP over stdin/stdout.
    #[default]
    Stdio,
    /// Remote server speaking MCP over server-sent events.
    Sse,
    /// Remote server speaking MCP over streamable HTTP.
    StreamableHttp,
}

impl ServerKind {
    /// Whether this kind points at a remote URL rather than a subprocess.
    #[must_use]
    pub const fn is_remote(self) -> bool {
        matches!(self, Self::Sse | Self::StreamableHttp)
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse => write!(f, "sse"),
            Self::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

/// Which bridge implementation fronts a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyKind {
    /// The `mcpo` bridge (MCP -> OpenAPI, single server per process).
    Mcpo,
    /// The `mcp-bridge` bridge (config-file driven).
    McpBridge,
}

impl ProxyKind {
    /// The alternate bridge, used when building a fallback try-order.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Mcpo => Self::McpBridge,
            Self::McpBridge => Self::Mcpo,
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mcpo => write!(f, "mcpo"),
            Self::McpBridge => write!(f, "mcp-bridge"),
        }
    }
}

/// Declarative identity and desired state for one managed server.
///
/// The `id` is the correlation key across every subsystem: port pool entries,
/// health history, error records, and secret bundles are all keyed by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Stable identifier, unique within a desired set.
    pub id: String,
    /// Transport kind.
    pub kind: ServerKind,

    // --- Stdio fields ---
    /// Command to execute (stdio kind only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Ordered arguments for the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables for the child process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Working directory for the child process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Optional dotenv file read at spawn time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<PathBuf>,
    /// Pin the bridge implementation; disables fallback when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_type_hint: Option<ProxyKind>,

    // --- Remote fields ---
    /// Upstream URL (sse / streamable-http kinds only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Headers forwarded to the upstream.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Whether this server is fronted by a bridge at all.
    pub needs_proxy: bool,
    /// Opaque passthrough list forwarded to bridge config.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub always_allow: Vec<String>,
}

impl ServerSpec {
    /// Create a stdio spec with defaults.
    #[must_use]
    pub fn stdio(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            kind: ServerKind::Stdio,
            command: Some(command.into()),
            args,
            env: BTreeMap::new(),
            cwd: None,
            env_file: None,
            proxy_type_hint: None,
            url: None,
            headers: BTreeMap::new(),
            needs_proxy: true,
            always_allow: Vec::new(),
        }
    }

    /// Create a remote spec (`sse` or `streamable-http`).
    #[must_use]
    pub fn remote(id: impl Into<String>, kind: ServerKind, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            env_file: None,
            proxy_type_hint: None,
            url: Some(url.into()),
            headers: BTreeMap::new(),
            needs_proxy: true,
            always_allow: Vec::new(),
        }
    }

    /// Pin the bridge implementation.
    #[must_use]
    pub const fn with_proxy_type_hint(mut self, kind: ProxyKind) -> Self {
        self.proxy_type_hint = Some(kind);
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Informational lint: warnings about this spec that do not reject it.
    ///
    /// The loader logs these; only duplicate ids and port-range problems are
    /// hard errors at load time.
    #[must_use]
    pub fn lint(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.id.chars().any(char::is_whitespace) {
            warnings.push(format!("server id {:?} contains whitespace", self.id));
        }
        if let Some(command) = &self.command {
            if command.is_empty() {
                warnings.push(format!("server {:?} has an empty command", self.id));
            } else if command.contains(char::is_whitespace) {
                warnings.push(format!(
                    "server {:?}: command {:?} contains whitespace; arguments belong in `args`",
                    self.id, command
                ));
            }
        }
        if self.kind.is_remote() && self.url.as_deref().is_none_or(str::is_empty) {
            warnings.push(format!("server {:?} is remote but has no url", self.id));
        }

        warnings
    }
}

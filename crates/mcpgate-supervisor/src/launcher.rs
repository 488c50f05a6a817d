//! Maps a `(ServerSpec, port, proxy type)` triple to a launch plan.
//!
//! The launcher never spawns anything; it validates the command line,
//! composes the child environment as an explicit value, and (for
//! `mcp-bridge`) generates the config file the bridge reads. The supervisor
//! performs the actual spawn from the returned plan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mcpgate_core::{ProxyKind, ServerKind, ServerSpec};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

/// Commands a stdio spec may run, matched on basename.
const COMMAND_WHITELIST: &[&str] = &[
    "uvx", "python", "python3", "node", "npm", "npx", "uv", "pip", "pip3",
];

/// Shell metacharacters that reject an argument outright.
const FORBIDDEN_CHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '\\',
];

const MAX_ARG_LENGTH: usize = 1000;
const MAX_ARGS: usize = 50;

/// Errors that reject a launch attempt before any spawn happens.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("command {0:?} is not on the launch whitelist")]
    CommandNotAllowed(String),

    #[error("spec has no command")]
    MissingCommand,

    #[error("spec has no url")]
    MissingUrl,

    #[error("unsafe argument {arg:?}: {reason}")]
    UnsafeArgument { arg: String, reason: String },

    #[error("too many arguments ({0}, limit {MAX_ARGS})")]
    TooManyArguments(usize),

    #[error("{proxy} cannot front a {kind} server")]
    UnsupportedTransport { proxy: ProxyKind, kind: ServerKind },

    #[error("failed to prepare bridge workdir: {0}")]
    Workdir(#[from] std::io::Error),

    #[error("spawn failed: {0}")]
    Spawn(String),
}

/// Everything the supervisor needs to spawn one bridge child.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub server_id: String,
    pub proxy_kind: ProxyKind,
    pub port: u16,
    pub argv: Vec<String>,
    /// Complete child environment, captured as a value at plan time.
    pub env: BTreeMap<String, String>,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Generated directory to delete when the child stops (mcp-bridge).
    pub workdir: Option<PathBuf>,
}

/// Builds launch plans under a scratch root for generated workdirs.
#[derive(Debug, Clone)]
pub struct BridgeLauncher {
    workdir_root: PathBuf,
}

impl BridgeLauncher {
    #[must_use]
    pub fn new(workdir_root: PathBuf) -> Self {
        Self { workdir_root }
    }

    /// Build the launch plan for one attempt.
    ///
    /// `secrets` are the decrypted values overlaid onto the spec env; they
    /// win over spec-level variables of the same name.
    pub fn plan(
        &self,
        spec: &ServerSpec,
        port: u16,
        proxy_kind: ProxyKind,
        secrets: &BTreeMap<String, String>,
    ) -> Result<LaunchPlan, LaunchError> {
        match (spec.kind, proxy_kind) {
            (ServerKind::Stdio, ProxyKind::Mcpo) => self.plan_mcpo_stdio(spec, port, secrets),
            (ServerKind::Stdio, ProxyKind::McpBridge) => {
                self.plan_mcp_bridge(spec, port, secrets)
            }
            (ServerKind::Sse | ServerKind::StreamableHttp, ProxyKind::Mcpo) => {
                self.plan_mcpo_remote(spec, port, secrets)
            }
            (kind, proxy) => Err(LaunchError::UnsupportedTransport { proxy, kind }),
        }
    }

    fn plan_mcpo_stdio(
        &self,
        spec: &ServerSpec,
        port: u16,
        secrets: &BTreeMap<String, String>,
    ) -> Result<LaunchPlan, LaunchError> {
        let command = validated_command(spec)?;
        validate_args(&spec.args)?;

        let mut argv = vec![
            "uvx".to_string(),
            "mcpo".to_string(),
            "--host".to_string(),
            "0.0.0.0".to_string(),
            "--port".to_string(),
            port.to_string(),
            "--".to_string(),
            command.to_string(),
        ];
        argv.extend(spec.args.iter().cloned());

        Ok(LaunchPlan {
            server_id: spec.id.clone(),
            proxy_kind: ProxyKind::Mcpo,
            port,
            argv,
            env: compose_env(spec, secrets, &self.workdir_root),
            cwd: spec.cwd.clone(),
            workdir: None,
        })
    }

    fn plan_mcp_bridge(
        &self,
        spec: &ServerSpec,
        port: u16,
        secrets: &BTreeMap<String, String>,
    ) -> Result<LaunchPlan, LaunchError> {
        let command = validated_command(spec)?;
        validate_args(&spec.args)?;

        let env = compose_env(spec, secrets, &self.workdir_root);
        let workdir = self.workdir_root.join(format!("{}-{port}", spec.id));
        std::fs::create_dir_all(&workdir)?;

        // mcp-bridge is config-file driven: the argv is fixed and everything
        // interesting lives in <workdir>/config.json.
        let mut servers = serde_json::Map::new();
        servers.insert(
            spec.id.clone(),
            json!({
                "command": command,
                "args": spec.args,
                "env": env_overlay(spec, secrets),
            }),
        );
        let config = json!({
            "inference_server": {
                "base_url": "http://127.0.0.1:1/v1",
                "api_key": "unused"
            },
            "mcp_servers": servers,
            "network": {
                "host": "0.0.0.0",
                "port": port
            },
            "logging": {
                "log_level": "INFO"
            }
        });
        std::fs::write(
            workdir.join("config.json"),
            serde_json::to_vec_pretty(&config).unwrap_or_default(),
        )?;
        debug!(server_id = %spec.id, workdir = %workdir.display(), "wrote mcp-bridge config");

        Ok(LaunchPlan {
            server_id: spec.id.clone(),
            proxy_kind: ProxyKind::McpBridge,
            port,
            argv: vec!["uvx".to_string(), "mcp-bridge".to_string()],
            env,
            cwd: Some(workdir.clone()),
            workdir: Some(workdir),
        })
    }

    fn plan_mcpo_remote(
        &self,
        spec: &ServerSpec,
        port: u16,
        secrets: &BTreeMap<String, String>,
    ) -> Result<LaunchPlan, LaunchError> {
        let url = spec
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(LaunchError::MissingUrl)?;
        validate_arg(url)?;

        let server_type = match spec.kind {
            ServerKind::Sse => "sse",
            ServerKind::StreamableHttp => "streamable-http",
            ServerKind::Stdio => unreachable!("remote plan for stdio spec"),
        };

        let mut argv = vec![
            "uvx".to_string(),
            "mcpo".to_string(),
            "--host".to_string(),
            "0.0.0.0".to_string(),
            "--port".to_string(),
            port.to_string(),
            "--server-type".to_string(),
            server_type.to_string(),
        ];
        if !spec.headers.is_empty() {
            argv.push("--header".to_string());
            argv.push(serde_json::to_string(&spec.headers).unwrap_or_default());
        }
        argv.push("--".to_string());
        argv.push(url.to_string());

        Ok(LaunchPlan {
            server_id: spec.id.clone(),
            proxy_kind: ProxyKind::Mcpo,
            port,
            argv,
            env: compose_env(spec, secrets, &self.workdir_root),
            cwd: None,
            workdir: None,
        })
    }
}

/// Validate a stdio spec's command and arguments without building a plan.
///
/// Unified mode uses this to drop unsafe entries from the multiplexed
/// config instead of refusing the whole bridge.
pub(crate) fn validate_stdio_spec(spec: &ServerSpec) -> Result<(), LaunchError> {
    validated_command(spec)?;
    validate_args(&spec.args)
}

/// Whitelist check on the command basename.
fn validated_command(spec: &ServerSpec) -> Result<&str, LaunchError> {
    let command = spec.command.as_deref().ok_or(LaunchError::MissingCommand)?;
    validate_arg(command)?;

    let basename = Path::new(command)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(command);
    if !COMMAND_WHITELIST.contains(&basename) {
        return Err(LaunchError::CommandNotAllowed(command.to_string()));
    }
    Ok(command)
}

fn validate_args(args: &[String]) -> Result<(), LaunchError> {
    if args.len() > MAX_ARGS {
        return Err(LaunchError::TooManyArguments(args.len()));
    }
    for arg in args {
        validate_arg(arg)?;
    }
    Ok(())
}

/// Argument hygiene for operator-supplied strings.
fn validate_arg(arg: &str) -> Result<(), LaunchError> {
    let reject = |reason: &str| LaunchError::UnsafeArgument {
        arg: arg.to_string(),
        reason: reason.to_string(),
    };

    if arg.len() > MAX_ARG_LENGTH {
        return Err(reject("exceeds length limit"));
    }
    if arg.contains('\0') {
        return Err(reject("contains NUL"));
    }
    if let Some(bad) = arg.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(reject(&format!("contains forbidden character {bad:?}")));
    }
    if arg.starts_with("../") {
        return Err(reject("parent-directory traversal"));
    }
    Ok(())
}

/// Spec env overlaid with env-file values and decrypted secrets.
///
/// Later sources win: env file < spec env < secrets.
fn env_overlay(spec: &ServerSpec, secrets: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    if let Some(path) = &spec.env_file {
        match dotenvy::from_path_iter(path) {
            Ok(iter) => {
                for item in iter {
                    match item {
                        Ok((key, value)) => {
                            env.insert(key, value);
                        }
                        Err(error) => {
                            warn!(server_id = %spec.id, %error, "skipping malformed env file line");
                        }
                    }
                }
            }
            Err(error) => {
                warn!(
                    server_id = %spec.id,
                    path = %path.display(),
                    %error,
                    "env file not readable"
                );
            }
        }
    }

    env.extend(spec.env.clone());
    env.extend(secrets.clone());
    env
}

/// Full child environment: inherited base, per-server overlay, bridge vars.
fn compose_env(
    spec: &ServerSpec,
    secrets: &BTreeMap<String, String>,
    workdir_root: &Path,
) -> BTreeMap<String, String> {
    // Capture the base environment as a value at plan time; nothing is read
    // from the process environment after this point.
    let mut env: BTreeMap<String, String> = std::env::vars().collect();
    env.extend(env_overlay(spec, secrets));

    // Bridge tooling caches live under the scratch root so repeated uvx/npx
    // runs do not re-download packages.
    let cache_root = workdir_root.join("cache");
    env.insert(
        "UV_CACHE_DIR".to_string(),
        cache_root.join("uv").display().to_string(),
    );
    env.insert(
        "NPM_CONFIG_CACHE".to_string(),
        cache_root.join("npm").display().to_string(),
    );

    if spec.kind.is_remote() {
        // Long-lived event streams: generous connect/read timeouts.
        env.insert("MCP_HTTP_CONNECT_TIMEOUT".to_string(), "30".to_string());
        env.insert("MCP_HTTP_READ_TIMEOUT".to_string(), "86400".to_string());
    }

    env
}

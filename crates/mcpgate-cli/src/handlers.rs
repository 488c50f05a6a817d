//! Command handlers.

use anyhow::Result;
use mcpgate_core::{Settings, load_config, paths};
use tracing::info;

use crate::bootstrap::bootstrap;

/// `mcpgate serve` - run the gateway until SIGTERM/SIGINT.
pub async fn serve(settings: Settings) -> Result<()> {
    let ctx = bootstrap(&settings).await?;

    let api = mcpgate_axum::serve(
        ctx.state.clone(),
        settings.manager_port,
        ctx.cancel.child_token(),
    );
    tokio::pin!(api);

    tokio::select! {
        result = &mut api => {
            // Bind failures and server errors are fatal.
            result?;
            anyhow::bail!("management API exited unexpectedly");
        }
        () = wait_for_signal() => {
            info!("shutdown signal received");
        }
    }

    // Stop the watcher, monitor, and API first, then the children.
    ctx.cancel.cancel();
    if let Some(aux) = &ctx.aux {
        aux.shutdown().await;
    } else {
        ctx.gateway.shutdown().await;
    }
    let _ = api.await;
    info!("shutdown complete");
    Ok(())
}

/// `mcpgate validate` - parse the config and report, non-zero on rejection.
pub fn validate(settings: &Settings) -> Result<()> {
    let (desired, _digest) = load_config(&settings.config_path)?;
    println!(
        "{}: {} server(s)",
        settings.config_path.display(),
        desired.len()
    );
    for spec in &desired {
        let proxy = if spec.needs_proxy { "proxied" } else { "direct" };
        println!("  {} [{}] {}", spec.id, spec.kind, proxy);
        for warning in spec.lint() {
            println!("    warning: {warning}");
        }
    }
    Ok(())
}

/// `mcpgate paths` - print resolved locations and settings.
pub fn print_paths(settings: &Settings) {
    println!("config:      {}", settings.config_path.display());
    println!("secrets:     {}", paths::secrets_dir().display());
    println!("workdirs:    {}", paths::bridge_workdir_root().display());
    println!("mode:        {:?}", settings.mode);
    println!(
        "port range:  {}-{}",
        settings.port_range_start, settings.port_range_end
    );
    println!("manager:     {}", settings.manager_port);
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings_with_config(path: &std::path::Path) -> Settings {
        Settings {
            config_path: path.to_path_buf(),
            ..Settings::default()
        }
    }

    #[test]
    fn validate_accepts_good_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mcpServers": {{"memory": {{"command": "npx", "args": ["-y", "x"]}}}}}}"#
        )
        .unwrap();
        file.flush().unwrap();

        assert!(validate(&settings_with_config(file.path())).is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mcpServers": {{"a": {{"command": "npx"}}, " a": {{"command": "npx"}}}}}}"#
        )
        .unwrap();
        file.flush().unwrap();

        assert!(validate(&settings_with_config(file.path())).is_err());
    }

    #[test]
    fn validate_rejects_missing_file() {
        let settings = settings_with_config(std::path::Path::new("/nonexistent/config.json"));
        assert!(validate(&settings).is_err());
    }
}

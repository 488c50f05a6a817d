//! CLI entry point.
//!
//! Reads settings from the environment, dispatches the subcommand, and
//! turns every fatal misconfiguration into a non-zero exit.

use clap::Parser;

use mcpgate_cli::{Cli, Commands, handlers};
use mcpgate_core::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Invalid port ranges and malformed env values are boot-time fatal.
    let settings = Settings::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => handlers::serve(settings).await,
        Commands::Validate => handlers::validate(&settings),
        Commands::Paths => {
            handlers::print_paths(&settings);
            Ok(())
        }
    }
}

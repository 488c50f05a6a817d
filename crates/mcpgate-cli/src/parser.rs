//! Command-line argument definitions.

use clap::{Parser, Subcommand};

/// Supervisor and reverse-gateway for MCP tool servers.
#[derive(Debug, Parser)]
#[command(name = "mcpgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the gateway until terminated (the default).
    Serve,
    /// Load and validate the configuration, then exit.
    Validate,
    /// Print resolved paths and settings.
    Paths,
}

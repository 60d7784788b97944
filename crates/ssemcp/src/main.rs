//! ssemcp - list and call tools on MCP servers over SSE
//!
//! Main entry point for the ssemcp CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{call, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// ssemcp - list and call tools on MCP servers over SSE
#[derive(Parser)]
#[command(name = "ssemcp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// TOML file with [[servers]] entries
    #[arg(long, global = true, env = "SSEMCP_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// SSE endpoint URL of an ad hoc server (takes precedence over --config)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Server to use from the config file
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Extra header in KEY=VALUE format (repeatable)
    #[arg(long = "header", short = 'H', global = true)]
    pub headers: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and list the server's tools
    Tools(tools::ToolsArgs),

    /// Call one tool
    Call(call::CallArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable with --json.
    let filter = if cli.verbose {
        "ssemcp=debug,ssemcp_client=debug,info"
    } else {
        "ssemcp=info,ssemcp_client=warn,warn"
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(cli.verbose)
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
                ),
        )
        .init();

    let server = commands::resolve_server(
        cli.config.as_deref(),
        cli.url.as_deref(),
        cli.server.as_deref(),
        &cli.headers,
    )?;

    let ctx = commands::Context {
        server,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
    }
}

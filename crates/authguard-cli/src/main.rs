//! authguard - command-line client for token-guarded HTTP APIs.
//!
//! Main entry point for the authguard CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod session_cookie;

use commands::{config, get, login, logout, probe, status};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// authguard - talk to a token-guarded API with automatic token refresh
#[derive(Parser)]
#[command(name = "authguard-cli")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Server URL (default: from config, else http://localhost:8888)
    #[arg(long, global = true, env = "AUTHGUARD_SERVER_URL")]
    pub server: Option<String>,

    /// Load this config file instead of discovering one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask the server whether authentication is enabled
    Probe(probe::ProbeArgs),

    /// Log in with username and password
    Login(login::LoginArgs),

    /// End the session and erase stored tokens
    Logout(logout::LogoutArgs),

    /// Show session and token status
    Status(status::StatusArgs),

    /// Send a guarded GET request and print the JSON response
    Get(get::GetArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "authguard_cli=debug,authguard=debug,authguard_config=debug,info"
    } else {
        "authguard_cli=info,authguard=info,warn"
    };

    let log_dir = authguard_config::xdg_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "authguard.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "authguard_cli=trace,authguard=trace,authguard_config=trace,info",
                )),
        )
        .init();

    let loaded = match &cli.config {
        Some(path) => commands::LoadedSettings::from_file(path)?,
        None => commands::LoadedSettings::discover()?,
    };
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let server_url = cli
        .server
        .unwrap_or_else(|| loaded.config.server.url.clone());

    let ctx = commands::Context {
        config: loaded.config,
        sources: loaded.sources,
        server_url,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Probe(args) => probe::run(args, &ctx).await,
        Commands::Login(args) => login::run(args, &ctx).await,
        Commands::Logout(args) => logout::run(args, &ctx).await,
        Commands::Status(args) => status::run(args, &ctx).await,
        Commands::Get(args) => get::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}

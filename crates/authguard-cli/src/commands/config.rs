//! Config command - configuration management.

use anyhow::Result;
use clap::{Args, Subcommand};

use authguard_config::GuardConfig;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,

    /// Show which config files were loaded
    Which,

    /// Show configuration, token and session file paths
    Path,

    /// Write a user config file with defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Path => cmd_path(ctx),
        ConfigCommand::Init { force } => cmd_init(force),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let mut config = ctx.config.clone();
    config.server.url = ctx.server_url.clone();

    if ctx.json_output {
        return ctx.print_json(&config);
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    if ctx.sources.is_empty() {
        println!("No config files loaded (using defaults)");
        return Ok(());
    }
    println!("Loaded (lowest precedence first):");
    for path in &ctx.sources {
        println!("  {}", path.display());
    }
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    let show = |label: &str, path: Option<std::path::PathBuf>| match path {
        Some(p) => println!("{:<8} {}", label, p.display()),
        None => println!("{:<8} (no config directory)", label),
    };
    show("config:", authguard_config::xdg_config_path());
    show("tokens:", authguard_config::token_file_path(&ctx.config));
    show("session:", crate::session_cookie::session_file());
    Ok(())
}

fn cmd_init(force: bool) -> Result<()> {
    let path = authguard_config::xdg_config_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    authguard_config::save_config(&GuardConfig::default(), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

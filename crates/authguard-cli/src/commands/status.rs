//! Status command - shows auth mode, session marker and token lifetime.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {}

/// Status response for JSON output.
#[derive(Debug, Serialize)]
struct StatusOutput {
    server_url: String,
    reachable: bool,
    auth_enabled: Option<bool>,
    session_present: bool,
    token: Option<TokenOutput>,
}

#[derive(Debug, Serialize)]
struct TokenOutput {
    expires_in_secs: u64,
    expired: bool,
    stale: bool,
}

/// Run the status command.
pub async fn run(_args: StatusArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client()?;
    let probe = client.probe().await;
    let session_present = client.session_present();
    let token = client.token_info().await?;

    if ctx.json_output {
        return ctx.print_json(&StatusOutput {
            server_url: ctx.server_url.clone(),
            reachable: probe.is_ok(),
            auth_enabled: probe.as_ref().ok().map(|c| c.enabled),
            session_present,
            token: token.as_ref().map(|t| TokenOutput {
                expires_in_secs: t.expires_in_secs,
                expired: t.is_expired,
                stale: t.is_stale,
            }),
        });
    }

    let green = Style::new().green();
    let red = Style::new().red();
    let dim = Style::new().dim();

    println!();
    println!("{}", style("Session Status").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!("  {} {}", dim.apply_to("Server:"), ctx.server_url);

    match &probe {
        Ok(caps) if caps.enabled => {
            println!("  {} {}", dim.apply_to("Auth:"), green.apply_to("● enabled"));
        }
        Ok(_) => {
            println!("  {} {}", dim.apply_to("Auth:"), dim.apply_to("○ disabled"));
        }
        Err(e) => {
            println!("  {} {}", dim.apply_to("Auth:"), red.apply_to("● unreachable"));
            if ctx.verbose {
                println!("  {} {}", dim.apply_to("Error:"), e);
            }
        }
    }

    if session_present {
        println!("  {} {}", dim.apply_to("Session:"), green.apply_to("● present"));
    } else {
        println!("  {} {}", dim.apply_to("Session:"), red.apply_to("● none"));
    }

    match token {
        Some(info) => println!("  {} {}", dim.apply_to("Token:"), info.expires_in_display()),
        None => println!("  {} {}", dim.apply_to("Token:"), dim.apply_to("none stored")),
    }

    println!();
    Ok(())
}

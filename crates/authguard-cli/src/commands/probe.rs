//! Probe command - asks the server whether authentication is enabled.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::Context;

/// Arguments for the probe command.
#[derive(Args, Debug)]
pub struct ProbeArgs {}

#[derive(Debug, Serialize)]
struct ProbeOutput {
    server_url: String,
    enabled: bool,
    onboarding_complete: bool,
}

/// Run the probe command.
pub async fn run(_args: ProbeArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client()?;
    let capabilities = client.probe().await?;

    if ctx.json_output {
        return ctx.print_json(&ProbeOutput {
            server_url: ctx.server_url.clone(),
            enabled: capabilities.enabled,
            onboarding_complete: capabilities.onboarding_complete,
        });
    }

    if capabilities.enabled {
        println!("Authentication is enabled on {}", ctx.server_url);
    } else {
        println!("Authentication is disabled on {}", ctx.server_url);
    }
    if !capabilities.onboarding_complete {
        println!("Onboarding has not been completed yet.");
    }
    Ok(())
}

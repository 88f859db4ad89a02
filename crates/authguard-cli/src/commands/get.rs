//! Get command - sends a guarded GET request.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for the get command.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// API path relative to the API prefix (e.g. `cameras`)
    pub path: String,
}

/// Run the get command.
pub async fn run(args: GetArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client()?;
    client.probe().await?;

    let result = client.get::<serde_json::Value>(&args.path).await;
    // A refresh may have rotated the cookie even when the request failed.
    ctx.save_session(&client)?;

    let body = result?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

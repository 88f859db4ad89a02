//! Logout command - ends the session and erases stored tokens.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for the logout command.
#[derive(Args, Debug)]
pub struct LogoutArgs {}

/// Run the logout command.
pub async fn run(_args: LogoutArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client()?;
    client.probe().await?;

    let result = client.logout().await;
    ctx.save_session(&client)?;

    match result {
        Ok(()) => println!("Logged out."),
        Err(e) if e.is_session_expired() => println!("No active session; local tokens removed."),
        Err(e) => {
            eprintln!("Server logout failed, local tokens removed anyway.");
            return Err(e.into());
        }
    }
    Ok(())
}

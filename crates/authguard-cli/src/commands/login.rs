//! Login command - password login against the identity endpoint.

use std::io::Write;

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for the login command.
#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Username (prompted for when omitted)
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password (prompted for when omitted)
    #[arg(long, env = "AUTHGUARD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Log in again even if a session is active
    #[arg(long)]
    pub force: bool,
}

/// Run the login command.
pub async fn run(args: LoginArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client()?;
    let capabilities = client.probe().await?;

    if !capabilities.enabled {
        println!("Authentication is disabled on {}; nothing to do.", ctx.server_url);
        return Ok(());
    }

    if !args.force
        && client.session_present()
        && let Ok(Some(info)) = client.token_info().await
        && !info.is_expired
    {
        println!(
            "Already logged in (token expires in {})",
            info.expires_in_display()
        );
        println!("Run 'authguard-cli logout' first, or pass --force.");
        return Ok(());
    }

    let username = match args.username {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    if username.is_empty() {
        println!("No username provided, aborting.");
        return Ok(());
    }
    let password = match args.password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ")?,
    };

    match client.login(&username, &password).await {
        Ok(tokens) => {
            ctx.save_session(&client)?;
            if ctx.json_output {
                ctx.print_json(&serde_json::json!({
                    "username": username,
                    "expires_at": tokens.expires_at,
                }))?;
            } else {
                println!("Logged in as {}.", username);
                if !client.session_present() {
                    println!("Warning: the server did not set a session cookie.");
                }
            }
            Ok(())
        }
        Err(e) if e.is_invalid_credentials() => {
            anyhow::bail!("{}", e.user_message())
        }
        Err(e) => Err(e.into()),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

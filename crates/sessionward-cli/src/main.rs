//! sessionward - an interactive shell over a self-renewing API session.
//!
//! The shell plays the part of one browser tab: it signs in, sends requests
//! that renew the access credential on demand, and follows the navigation
//! signals the session emits when it ends.

mod shell;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionward_core::auth::ChannelNavigator;
use sessionward_core::{Config, SessionContext};

use shell::{describe_navigation, Command, Shell};

type InputLines = Lines<BufReader<Stdin>>;

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=sessionward_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    info!("sessionward starting");

    let config = Config::load().context("Failed to load config")?;
    println!("API: {}", config.api_base_url);

    let (navigator, mut navigation_rx) = ChannelNavigator::new();
    let ctx = SessionContext::new(config, Arc::new(navigator))?;
    let mut shell = Shell::new(ctx);

    println!("Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt(&shell)?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match shell::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = run(&mut shell, command, &mut lines).await {
                    println!("Error: {}", e);
                }
            }
            Err(e) => println!("{}", e),
        }

        // Navigation is fire-and-forget; show whatever the session asked for
        while let Ok(navigation) = navigation_rx.try_recv() {
            println!("{}", describe_navigation(&navigation));
        }
    }

    info!("sessionward shutting down");
    Ok(())
}

fn prompt(shell: &Shell) -> Result<()> {
    let who = shell
        .ctx
        .store
        .principal()
        .map(|p| format!("{}@", p.display_name()))
        .unwrap_or_default();
    print!("{}sessionward> ", who);
    io::stdout().flush()?;
    Ok(())
}

async fn run(shell: &mut Shell, command: Command, lines: &mut InputLines) -> Result<()> {
    match command {
        Command::Login { email } => {
            let email = match email.or_else(|| shell.ctx.config.last_email.clone()) {
                Some(email) => {
                    println!("Email: {}", email);
                    email
                }
                None => prompt_email(lines).await?,
            };
            let password = prompt_password().await?;
            println!("Authenticating...");
            shell.login(&email, &password).await?;
        }
        Command::Logout => shell.logout(),
        Command::WhoAmI => shell.whoami(),
        Command::Request { method, path, body } => {
            shell.request(method, &path, body.as_ref()).await
        }
        Command::Burst { count, path } => shell.burst(count, &path).await,
        Command::Guard { path } => shell.guard(&path),
        Command::Cookie => shell.cookie(),
        Command::History => shell.show_history(),
        Command::Help => println!("{}", shell::HELP),
        Command::Quit => {}
    }
    Ok(())
}

async fn prompt_email(lines: &mut InputLines) -> Result<String> {
    print!("Email: ");
    io::stdout().flush()?;
    let email = lines
        .next_line()
        .await?
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("Email required"))?;
    Ok(email)
}

async fn prompt_password() -> Result<String> {
    let password = tokio::task::spawn_blocking(|| rpassword::prompt_password("Password: "))
        .await
        .context("Password prompt failed")??;
    if password.is_empty() {
        return Err(anyhow!("Password required"));
    }
    Ok(password)
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Obtain an API token by approving this device in a browser.
//!
//! Usage: device-login [login] [--endpoint <url>] [--output <path>] [--no-browser]
//!        device-login whoami

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use devicelink::client::{Credentials, DeviceLoginClient};
use std::path::PathBuf;
use std::time::Duration;

/// Link this machine to your account and save its API token.
#[derive(Parser, Debug)]
#[command(name = "device-login")]
#[command(about = "Obtain an API token through the device authorization flow")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    login: LoginArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Link this device (the default)
    Login(LoginArgs),

    /// Show the account the saved token belongs to
    Whoami {
        /// Credentials file to read instead of the default location.
        #[arg(long)]
        credentials: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Server base URL.
    #[arg(long, env = "DEVICELINK_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    /// Write credentials here instead of the user config directory.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print the URL only; do not try to open a browser.
    #[arg(long)]
    no_browser: bool,

    /// Give up after this many seconds (the code's own expiry also applies).
    #[arg(long, default_value = "600")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Command::Login(args)) => login(args).await,
        Some(Command::Whoami { credentials }) => whoami(credentials).await,
        None => login(cli.login).await,
    }
}

async fn login(args: LoginArgs) -> anyhow::Result<()> {
    let client = DeviceLoginClient::new(&args.endpoint)?;
    let code = client
        .request_code()
        .await
        .context("Failed to request device code")?;

    eprintln!("Visit the following URL while logged in and enter the code:");
    eprintln!();
    eprintln!("  URL:  {}", code.verification_url);
    eprintln!("  Code: {}", code.user_code);
    eprintln!();

    if !args.no_browser {
        if let Err(e) = open::that(&code.verification_url) {
            tracing::warn!(error = %e, "Could not open a browser");
            eprintln!("Could not open a browser; open the URL manually.");
        }
    }

    eprintln!("Waiting for authorization...");

    let token = client
        .wait_for_token(&code, Duration::from_secs(args.timeout_secs))
        .await
        .context("Device authorization failed")?;

    let credentials = Credentials::new(&args.endpoint, &token);
    let path = match args.output {
        Some(path) => {
            credentials
                .save_to(&path)
                .context("Failed to write credentials file")?;
            path
        }
        None => credentials
            .save()
            .context("Failed to write credentials file")?,
    };

    eprintln!("Device linked. Credentials saved to {}", path.display());
    Ok(())
}

async fn whoami(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => Credentials::default_path()?,
    };
    let Some(credentials) =
        Credentials::load_from(&path).context("Failed to read credentials file")?
    else {
        bail!("Not logged in; run `device-login` first");
    };

    let client = DeviceLoginClient::new(&credentials.endpoint)?;
    let profile = client
        .fetch_profile(&credentials.token)
        .await
        .context("Failed to fetch profile")?;

    println!(
        "{} ({}) on {}",
        profile.username.as_deref().unwrap_or("-"),
        profile.email,
        credentials.endpoint
    );
    Ok(())
}

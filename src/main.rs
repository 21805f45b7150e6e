//! `glyph-authd`: the logon gateway daemon.
//!
//! Loads the TOML configuration, applies `GLYPH_AUTH_*` overrides, seeds the in-memory
//! account directory and serves until CTRL+C.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use glyph_auth::config::AuthConfig;
use glyph_auth::error::Result;
use glyph_auth::protocol::InMemoryAccountDirectory;
use glyph_auth::service::AuthService;
use glyph_auth::utils::logging;

#[derive(Parser, Debug)]
#[command(name = "glyph-authd")]
#[command(about = "SRP6 logon gateway", version)]
struct Args {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    listen: Option<String>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn load_config(args: &Args) -> Result<AuthConfig> {
    let mut config = match &args.config {
        Some(path) => AuthConfig::from_file(path)?,
        None => AuthConfig::default(),
    };
    config.apply_env()?;
    if let Some(listen) = &args.listen {
        config.server.address = listen.clone();
    }
    config.validate_strict()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if args.print_config {
        println!("{}", AuthConfig::example_config());
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("glyph-authd: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("glyph-authd: {e}");
        return ExitCode::FAILURE;
    }

    let accounts = Arc::new(InMemoryAccountDirectory::from_entries(&config.accounts));
    info!(
        address = %config.server.address,
        accounts = accounts.len(),
        "Starting glyph-authd"
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    match AuthService::new(config, accounts).run(shutdown_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Auth service failed");
            ExitCode::FAILURE
        }
    }
}

#![forbid(unsafe_code)]

//! `irslackd` — single-user IRC server that impersonates a Slack workspace.
//!
//! Bootstraps configuration, builds the bridge, and runs its lifecycle
//! until a shutdown signal arrives or a fatal error (spec §4.6, §7) is hit.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use irslackd::bridge::Bridge;
use irslackd::config::{Cli, Config};
use irslackd::errors::is_fatal;
use irslackd::{AppError, Result};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let debug = cli.debug;

    let config = Config::from_cli(cli)?;
    init_tracing(debug || config.debug)?;
    info!(
        port = config.port,
        autojoin = config.autojoin,
        log_suffix = %config.log_suffix,
        "irslackd bootstrap"
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let bridge = Bridge::new(config).await?;

    let code = tokio::select! {
        outcome = bridge.run() => {
            match outcome {
                Ok(code) => {
                    info!(code, "bridge exited");
                    code
                }
                Err(err) => {
                    error!(%err, "bridge exited with a fatal error");
                    if is_fatal(&err) { 1 } else { 2 }
                }
            }
        }
        () = shutdown_signal() => {
            info!("shutdown signal received; exiting");
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;
    Ok(())
}

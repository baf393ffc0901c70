#![forbid(unsafe_code)]

//! `ci-connection-wait` — decide whether this job halts, and if so, wait
//! for an operator to attach.
//!
//! The state directory is removed when this process finishes, however the
//! wait ended.

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ci_connection::connect::{notify_binary_path, ConnectionInstructions};
use ci_connection::halt::HaltDecision;
use ci_connection::labels::LabelClient;
use ci_connection::logging::{init_tracing, LogFormat};
use ci_connection::session::SessionServer;
use ci_connection::snapshot::StateDir;
use ci_connection::{AppError, CiEnvironment, ConnectionConfig, Result};

#[derive(Debug, Parser)]
#[command(
    name = "ci-connection-wait",
    about = "Halt a CI job and wait for a remote debugging session",
    version,
    long_about = None
)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Wait for a connection without checking any other condition.
    #[arg(long)]
    wait_regardless: bool,

    /// Evaluate every condition for the log, then wait regardless.
    #[arg(long)]
    wait_after_conditions_check: bool,
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
    }

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(&args)));

    match result {
        Ok(()) => {}
        Err(AppError::HaltAmbiguous(reason)) => {
            error!(%reason, "cannot decide whether to halt");
            std::process::exit(1);
        }
        Err(err) => {
            error!(%err, "waiting for connection failed");
            std::process::exit(1);
        }
    }
}

async fn run(args: &Cli) -> Result<()> {
    let config = ConnectionConfig::load_or_default(args.config.as_deref())?;
    let env = CiEnvironment::from_process_env();
    let state_dir = StateDir::resolve(&config, &env)?;
    let _cleanup = state_dir.cleanup_guard();

    let labels = LabelClient::new(&config.api, &env)?;
    let decision = HaltDecision::new(
        env.clone(),
        config.labels.clone(),
        state_dir,
        labels,
    )
    .wait_after_checks(args.wait_after_conditions_check);

    let Some(trigger) = decision.decide(args.wait_regardless).await? else {
        info!("no conditions for halting the workflow for connection were met");
        return Ok(());
    };
    info!(?trigger, "halting for connection");

    let instructions = ConnectionInstructions::new(&env, &notify_binary_path());
    println!("{}", instructions.render());

    let server = SessionServer::bind(config.server_addr(), &config).await?;
    let ct = CancellationToken::new();
    let shutdown_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_ct.cancel();
    });

    let termination = server.run(ct).await?;
    info!(reason = %termination, "waiting process terminated");
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

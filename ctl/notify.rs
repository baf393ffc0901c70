#![forbid(unsafe_code)]

//! `ci-connection-notify` — run on the runner by an attaching operator.
//!
//! Tells the waiting job a session started, keeps it alive while the
//! interactive shell runs, and tells it the session ended.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use ci_connection::logging::{init_tracing, LogFormat};
use ci_connection::session::client::attach;
use ci_connection::session::SessionClient;
use ci_connection::snapshot::StateDir;
use ci_connection::{CiEnvironment, ConnectionConfig, Result};

#[derive(Debug, Parser)]
#[command(
    name = "ci-connection-notify",
    about = "Attach to a halted CI job and replay its failing step",
    version,
    long_about = None
)]
struct Cli {
    /// Do not replay the saved or server environment in the shell.
    #[arg(long)]
    no_env: bool,

    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "session failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Cli) -> Result<()> {
    let config = ConnectionConfig::load_or_default(args.config.as_deref())?;
    let env = CiEnvironment::from_process_env();
    let state_dir = StateDir::resolve(&config, &env)?;

    let client = SessionClient::new(config.server_addr());
    let status = attach(&client, &state_dir, config.keep_alive(), args.no_env)?;
    info!(%status, "interactive session ended");
    Ok(())
}

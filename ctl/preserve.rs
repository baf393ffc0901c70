#![forbid(unsafe_code)]

//! `ci-connection-preserve` — run after a failing step to save what a
//! debugging session should replay: the command, its directory, and a
//! filtered copy of the environment.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use ci_connection::logging::{init_tracing, LogFormat};
use ci_connection::snapshot::env::names_or_empty;
use ci_connection::snapshot::{EnvSnapshot, StateDir};
use ci_connection::{CiEnvironment, ConnectionConfig, Result};

#[derive(Debug, Parser)]
#[command(
    name = "ci-connection-preserve",
    about = "Save the execution state of a failing CI step",
    version,
    long_about = None
)]
struct Cli {
    /// The failing command. Defaults to `$BASH_COMMAND`.
    #[arg(long)]
    shell_command: Option<String>,

    /// Directory the command ran in. Defaults to the current directory.
    #[arg(long)]
    execution_dir: Option<PathBuf>,

    /// Save the environment (default).
    #[arg(long, overrides_with = "no_save_env")]
    save_env: bool,

    /// Save an empty environment instead.
    #[arg(long, overrides_with = "save_env")]
    no_save_env: bool,

    /// Comma-separated names to leave out of the saved environment.
    #[arg(long)]
    env_vars_denylist: Option<String>,

    /// Comma-separated names to save exclusively.
    #[arg(long)]
    env_vars_allowlist: Option<String>,

    /// Where to write the state. Defaults to the state directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,

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

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "failed to save execution state");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> Result<()> {
    let state_dir = match args.out_dir {
        Some(dir) => StateDir::new(dir),
        None => {
            let config = ConnectionConfig::load_or_default(args.config.as_deref())?;
            StateDir::resolve(&config, &CiEnvironment::from_process_env())?
        }
    };

    let shell_command = args
        .shell_command
        .or_else(|| std::env::var("BASH_COMMAND").ok())
        .filter(|command| !command.is_empty());
    let directory = match args.execution_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    // `overrides_with` leaves at most one of the pair set.
    let save_env = args.save_env || !args.no_save_env;
    let env = if save_env {
        let denylist = names_or_empty(args.env_vars_denylist.as_deref(), "--env-vars-denylist");
        let allowlist = names_or_empty(args.env_vars_allowlist.as_deref(), "--env-vars-allowlist");
        EnvSnapshot::capture(&denylist, &allowlist)
    } else {
        EnvSnapshot::default()
    };

    let state = state_dir.persist(
        shell_command,
        Some(directory.display().to_string()),
        Some(env),
    )?;
    info!(
        path = %state_dir.info_path().display(),
        vars = state.env.as_ref().map_or(0, EnvSnapshot::len),
        "execution state preserved"
    );
    Ok(())
}

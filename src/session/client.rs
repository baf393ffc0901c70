//! Attaching client: announces the session, keeps it alive, and replays
//! the captured execution context in an interactive shell.
//!
//! Every message goes over a fresh connection (connect, send, optionally
//! read one reply, close), so a restarted listener is picked up by the
//! next send. A process-wide lock serializes those sequences between the
//! heartbeat thread and the main thread. Transport failures are logged and
//! the message is dropped; the next heartbeat tick is the retry.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::protocol::Signal;
use crate::snapshot::{EnvSnapshot, StateDir};
use crate::{AppError, Result};

/// Connect and read timeout for one exchange.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking protocol client.
#[derive(Debug, Clone)]
pub struct SessionClient {
    addr: SocketAddr,
    send_lock: Arc<Mutex<()>>,
}

impl SessionClient {
    /// Client for the server at `addr`.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            send_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Send `signal` without waiting for a reply.
    ///
    /// Failures are logged and the message is dropped.
    pub fn send(&self, signal: Signal) {
        if let Err(err) = self.exchange(signal) {
            error!(addr = %self.addr, %signal, %err, "message not delivered");
        }
    }

    /// Send `signal` and read the server's reply.
    ///
    /// Returns `None` when the message could not be delivered (logged) or
    /// `signal` has no reply.
    #[must_use]
    pub fn request(&self, signal: Signal) -> Option<String> {
        match self.exchange(signal) {
            Ok(reply) => reply,
            Err(err) => {
                error!(addr = %self.addr, %signal, %err, "request not delivered");
                None
            }
        }
    }

    fn exchange(&self, signal: Signal) -> Result<Option<String>> {
        let _guard = self
            .send_lock
            .lock()
            .map_err(|_| AppError::Protocol("send lock poisoned".into()))?;

        let mut stream = TcpStream::connect_timeout(&self.addr, IO_TIMEOUT).map_err(|err| {
            if err.kind() == ErrorKind::ConnectionRefused {
                AppError::Protocol(format!(
                    "could not connect to server at {}; is it running?",
                    self.addr
                ))
            } else {
                AppError::Io(err.to_string())
            }
        })?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.write_all(signal.encode().as_bytes())?;
        stream.flush()?;

        if !signal.expects_response() {
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(None);
        }

        // The server closes the connection after replying.
        let mut reply = String::new();
        stream.read_to_string(&mut reply)?;
        Ok(Some(reply))
    }

    /// Ask the server for its environment.
    #[must_use]
    pub fn request_env_state(&self) -> Option<EnvSnapshot> {
        let reply = self.request(Signal::EnvStateRequested)?;
        if reply.trim().is_empty() {
            warn!("server closed the connection without an environment");
            return None;
        }
        match EnvSnapshot::from_json(&reply) {
            Ok(env) => Some(env),
            Err(err) => {
                error!(%err, "could not parse env state response");
                None
            }
        }
    }

    /// Start sending `keep_alive` every `period` on a background thread.
    #[must_use]
    pub fn start_heartbeat(&self, period: Duration) -> Heartbeat {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let client = self.clone();
        let handle = thread::Builder::new()
            .name("keep-alive".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        debug!("sending keep-alive");
                        client.send(Signal::KeepAlive);
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(%err, "failed to start keep-alive thread");
                None
            }
        };
        Heartbeat {
            stop: Some(stop_tx),
            handle,
        }
    }
}

/// Running heartbeat. Dropping it stops the timer without waiting.
#[derive(Debug)]
pub struct Heartbeat {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Stop the timer and wait for an in-flight send to finish.
    pub fn stop(mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("keep-alive thread panicked");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop.take();
    }
}

/// Context to reproduce in the replay shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayContext {
    /// The failing command, shown to the operator.
    pub shell_command: Option<String>,
    /// Directory to start the shell in.
    pub directory: Option<String>,
    /// Environment to overlay on the client's own.
    pub env: Option<EnvSnapshot>,
}

/// Work out what to replay.
///
/// An environment saved in the state file wins over `request_env`. A file
/// whose `env` is `null` or absent has no captured environment, so
/// `request_env` is consulted, the same as when there is no file. An empty
/// `env` object is a captured empty environment and is replayed as-is.
/// With `no_env` no environment is replayed at all.
#[must_use]
pub fn resolve_replay<F>(state_dir: &StateDir, no_env: bool, request_env: F) -> ReplayContext
where
    F: FnOnce() -> Option<EnvSnapshot>,
{
    let saved = state_dir.load();
    if saved.is_some() {
        debug!(path = %state_dir.info_path().display(), "found execution state file");
    }
    let saved = saved.unwrap_or_default();

    let env = if no_env {
        None
    } else if saved.env.is_some() {
        saved.env
    } else {
        request_env()
    };

    ReplayContext {
        shell_command: saved.shell_command,
        directory: saved.directory,
        env,
    }
}

/// Interactive shell for this platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellProgram {
    /// Executable.
    pub program: &'static str,
    /// Arguments.
    pub args: &'static [&'static str],
}

impl ShellProgram {
    /// `bash -i` on Linux or a Linux-like shell, else PowerShell.
    #[must_use]
    pub fn detect(is_linux: bool, ostype: Option<&str>, msystem: Option<&str>) -> Self {
        if is_linux || is_linux_like(ostype, msystem) {
            Self {
                program: "bash",
                args: &["-i"],
            }
        } else {
            Self {
                program: "powershell.exe",
                args: &["-NoExit"],
            }
        }
    }

    /// Detect from the running process.
    #[must_use]
    pub fn for_current_platform() -> Self {
        let ostype = std::env::var("OSTYPE").ok();
        let msystem = std::env::var("MSYSTEM").ok();
        Self::detect(
            cfg!(target_os = "linux"),
            ostype.as_deref(),
            msystem.as_deref(),
        )
    }
}

fn is_linux_like(ostype: Option<&str>, msystem: Option<&str>) -> bool {
    let ostype = ostype.unwrap_or_default().to_lowercase();
    let msystem = msystem.unwrap_or_default().to_lowercase();
    ["linux-gnu", "msys", "cygwin"]
        .iter()
        .any(|token| ostype.contains(token))
        || ["mingw", "msys"].iter().any(|token| msystem.contains(token))
}

/// Build the shell command for `context`.
#[must_use]
pub fn shell_command(shell: &ShellProgram, context: &ReplayContext) -> Command {
    let mut command = Command::new(shell.program);
    command.args(shell.args);

    // Captured values override the inherited environment; the rest,
    // including variables that are not UTF-8, passes through untouched.
    if let Some(ref env) = context.env {
        command.envs(env.iter());
    }
    if let Some(ref dir) = context.directory {
        let dir = PathBuf::from(dir);
        if dir.is_dir() {
            command.current_dir(dir);
        } else {
            warn!(directory = %dir.display(), "captured directory does not exist; staying put");
        }
    }
    command
}

/// Print the captured failing command for the operator.
pub fn print_failed_command(command: &str) {
    let rule = "=".repeat(100);
    println!("{rule}");
    println!("Failed command was:\n{command}\n");
    println!("{rule}");
}

/// Run a full attach: announce, heartbeat, replay, shell, close.
///
/// # Errors
///
/// Returns `AppError::Io` if the shell cannot be started.
pub fn attach(
    client: &SessionClient,
    state_dir: &StateDir,
    keep_alive: Duration,
    no_env: bool,
) -> Result<ExitStatus> {
    client.send(Signal::ConnectionEstablished);
    let heartbeat = client.start_heartbeat(keep_alive);

    let context = resolve_replay(state_dir, no_env, || {
        client.request_env_state()
    });

    if let Some(ref command) = context.shell_command {
        print_failed_command(command);
    }

    let shell = ShellProgram::for_current_platform();
    info!(shell = shell.program, "launching interactive session");
    let status = shell_command(&shell, &context)
        .status()
        .map_err(|err| AppError::Io(format!("failed to start {}: {err}", shell.program)));

    drop(heartbeat);
    client.send(Signal::ConnectionClosed);
    status
}

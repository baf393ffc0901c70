//! Loopback session server the halted job waits on.
//!
//! One loop owns the [`SessionState`]. It accepts connections, receives
//! parsed signals from per-connection tasks over a channel, and runs the
//! periodic timeout check. Connection tasks read once, answer
//! `env_state_requested` themselves (it never touches session state), and
//! close. The listening socket is dropped when the loop ends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::state::{SessionPhase, SessionState, SessionTimeouts, Termination};
use crate::config::ConnectionConfig;
use crate::protocol::{parse_batch, Inbound, Signal, MAX_READ_BYTES};
use crate::snapshot::env::process_vars;
use crate::snapshot::EnvSnapshot;
use crate::{AppError, Result};

/// How long a connection may stay silent before it is dropped.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

const SIGNAL_QUEUE: usize = 32;

/// Where `env_state_requested` answers come from.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// The server process environment.
    #[default]
    Process,
    /// A fixed set of variables.
    Fixed(Vec<(String, String)>),
}

impl EnvSource {
    /// Current snapshot with only the secret names removed.
    #[must_use]
    pub fn snapshot(&self) -> EnvSnapshot {
        match self {
            Self::Process => EnvSnapshot::capture_trusted(process_vars()),
            Self::Fixed(vars) => EnvSnapshot::capture_trusted(vars.iter().cloned()),
        }
    }
}

/// Listener plus the settings for one wait.
pub struct SessionServer {
    listener: TcpListener,
    tick: Duration,
    timeouts: SessionTimeouts,
    env_source: Arc<EnvSource>,
    phase_tx: watch::Sender<SessionPhase>,
}

impl SessionServer {
    /// Bind `addr` with timeouts and tick cadence from `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, config: &ConnectionConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| AppError::Protocol(format!("failed to bind {addr}: {err}")))?;
        let (phase_tx, _) = watch::channel(SessionPhase::WaitingInitial);
        Ok(Self {
            listener,
            tick: config.tick(),
            timeouts: SessionTimeouts::from_config(config),
            env_source: Arc::new(EnvSource::Process),
            phase_tx,
        })
    }

    /// Answer environment requests from `source`.
    #[must_use]
    pub fn with_env_source(mut self, source: EnvSource) -> Self {
        self.env_source = Arc::new(source);
        self
    }

    /// Override the timeout check cadence.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Override the inactivity timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Bound address.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|err| AppError::Protocol(format!("no local address: {err}")))
    }

    /// Watch the session phase while [`Self::run`] is in progress.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    /// Wait until the client closes the session, the active timeout
    /// elapses, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept errors are logged.
    pub async fn run(self, cancel: CancellationToken) -> Result<Termination> {
        let addr = self.local_addr()?;
        let span = info_span!("session_server", %addr);
        self.serve(cancel).instrument(span).await
    }

    async fn serve(self, cancel: CancellationToken) -> Result<Termination> {
        let Self {
            listener,
            tick,
            timeouts,
            env_source,
            phase_tx,
        } = self;

        let (signal_tx, mut signal_rx) = mpsc::channel::<Signal>(SIGNAL_QUEUE);
        let mut state = SessionState::new(timeouts, Instant::now().into_std());
        let mut ticker = interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("listening for connection notifications");

        let termination = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    state.terminate();
                    break Termination::Cancelled;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let conn = handle_connection(
                                stream,
                                signal_tx.clone(),
                                Arc::clone(&env_source),
                            )
                            .instrument(info_span!("session_conn", %peer));
                            tokio::spawn(conn);
                        }
                        Err(err) => warn!(%err, "accept failed"),
                    }
                }
                Some(signal) = signal_rx.recv() => {
                    let now = Instant::now().into_std();
                    match signal {
                        Signal::ConnectionEstablished => info!("remote connection detected"),
                        Signal::KeepAlive => info!("keep-alive received"),
                        Signal::ConnectionClosed => info!("close requested by client"),
                        Signal::EnvStateRequested => {}
                    }
                    state.apply(signal, now);
                    phase_tx.send_replace(state.phase());
                    if state.close_pending() {
                        if let Some(termination) = state.check(now) {
                            break termination;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let now = Instant::now().into_std();
                    if let Some(termination) = state.check(now) {
                        break termination;
                    }
                    info!(
                        idle_secs = state.idle(now).as_secs(),
                        timeout_secs = state.timeout().as_secs(),
                        "time since last keep-alive"
                    );
                }
            }
        };

        phase_tx.send_replace(SessionPhase::Terminating);
        drop(listener);
        info!(reason = %termination, "shutting down the waiting process");
        Ok(termination)
    }
}

/// Read one batch from `stream`, dispatch it, and close.
async fn handle_connection(
    mut stream: TcpStream,
    signals: mpsc::Sender<Signal>,
    env_source: Arc<EnvSource>,
) {
    let mut buf = vec![0_u8; MAX_READ_BYTES];
    let read = match timeout(READ_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(read)) => read,
        Ok(Err(err)) => {
            warn!(%err, "session read error");
            return;
        }
        Err(_) => {
            warn!("connection sent nothing before the read timeout");
            return;
        }
    };

    let raw = String::from_utf8_lossy(&buf[..read]);
    for inbound in parse_batch(&raw) {
        match inbound {
            Inbound::Known(Signal::EnvStateRequested) => {
                info!("environment state requested (pass --no-env to skip next time)");
                if let Err(err) = write_env_state(&mut stream, &env_source).await {
                    warn!(%err, "failed to send environment state");
                } else {
                    info!("environment state sent to the client");
                }
            }
            Inbound::Known(signal) => {
                if signals.send(signal).await.is_err() {
                    debug!(%signal, "server loop already finished");
                }
            }
            Inbound::Unknown(message) => warn!(%message, "unknown message received"),
        }
    }

    if let Err(err) = stream.shutdown().await {
        debug!(%err, "session connection shutdown");
    }
}

async fn write_env_state(stream: &mut TcpStream, source: &EnvSource) -> Result<()> {
    let mut line = source.snapshot().to_json()?;
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

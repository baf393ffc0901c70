//! Keep-alive/timeout state machine for one wait.
//!
//! `WaitingInitial` moves to `Connected` on the first
//! `connection_established`, which also switches to the longer reconnect
//! timeout. A close signal, or inactivity longer than the active timeout,
//! moves to `Terminating`. State changes only through [`SessionState::apply`]
//! and [`SessionState::check`]; the caller supplies the clock.

use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use crate::config::ConnectionConfig;
use crate::protocol::Signal;

/// Phase of the waiting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No client has connected yet.
    WaitingInitial,
    /// A client announced itself.
    Connected,
    /// The wait is over.
    Terminating,
}

/// Why the wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The client sent `connection_closed`.
    Closed,
    /// No activity for longer than `timeout`.
    TimedOut {
        /// The timeout that was active.
        timeout: Duration,
    },
    /// The waiting process was asked to shut down.
    Cancelled,
}

impl Display for Termination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("connection was terminated"),
            Self::TimedOut { timeout } => {
                write!(f, "no connection for {} seconds", timeout.as_secs())
            }
            Self::Cancelled => f.write_str("shutdown requested"),
        }
    }
}

/// Per-phase inactivity timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Before any client connects.
    pub initial: Duration,
    /// After a client has connected; tolerates reconnects.
    pub reconnect: Duration,
}

impl SessionTimeouts {
    /// Timeouts from config.
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            initial: config.initial_timeout(),
            reconnect: config.reconnect_timeout(),
        }
    }
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}

/// State of one wait.
#[derive(Debug, Clone)]
pub struct SessionState {
    phase: SessionPhase,
    last_activity: Instant,
    timeout: Duration,
    timeouts: SessionTimeouts,
    close_pending: bool,
}

impl SessionState {
    /// Fresh state, waiting for the first client as of `now`.
    #[must_use]
    pub fn new(timeouts: SessionTimeouts, now: Instant) -> Self {
        Self {
            phase: SessionPhase::WaitingInitial,
            last_activity: now,
            timeout: timeouts.initial,
            timeouts,
            close_pending: false,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Active inactivity timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a close signal arrived.
    #[must_use]
    pub fn close_pending(&self) -> bool {
        self.close_pending
    }

    /// Time since the last activity.
    #[must_use]
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Apply a received signal.
    pub fn apply(&mut self, signal: Signal, now: Instant) {
        if self.phase == SessionPhase::Terminating {
            return;
        }
        match signal {
            Signal::ConnectionEstablished => {
                self.last_activity = now;
                if self.phase == SessionPhase::WaitingInitial {
                    self.phase = SessionPhase::Connected;
                    self.timeout = self.timeouts.reconnect;
                }
            }
            Signal::KeepAlive => self.last_activity = now,
            Signal::ConnectionClosed => self.close_pending = true,
            Signal::EnvStateRequested => {}
        }
    }

    /// Periodic check; ends the wait on a pending close or a timeout.
    pub fn check(&mut self, now: Instant) -> Option<Termination> {
        let termination = if self.close_pending {
            Termination::Closed
        } else if self.idle(now) > self.timeout {
            Termination::TimedOut {
                timeout: self.timeout,
            }
        } else {
            return None;
        };
        self.phase = SessionPhase::Terminating;
        Some(termination)
    }

    /// Mark the wait as over without a check, e.g. on shutdown.
    pub fn terminate(&mut self) {
        self.phase = SessionPhase::Terminating;
    }
}

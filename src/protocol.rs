//! Session wire protocol shared by the waiting server and the attaching client.
//!
//! ## Protocol
//!
//! Every message travels over its own short-lived loopback TCP connection
//! as one UTF-8 line:
//! ```text
//! connection_established
//! keep_alive
//! env_state_requested
//! connection_closed
//! ```
//!
//! Only `env_state_requested` is answered: the server writes one line with a
//! JSON object of environment variables and closes the connection.

use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default listener address.
pub const DEFAULT_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12455);

/// Largest single read the server accepts from one connection.
pub const MAX_READ_BYTES: usize = 1024;

/// A protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// A client has attached.
    ConnectionEstablished,
    /// The client's shell exited; stop waiting.
    ConnectionClosed,
    /// Periodic liveness proof.
    KeepAlive,
    /// Client asks for the server's environment.
    EnvStateRequested,
}

impl Signal {
    /// Every signal, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::ConnectionEstablished,
        Self::ConnectionClosed,
        Self::KeepAlive,
        Self::EnvStateRequested,
    ];

    /// Wire literal for this signal.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "connection_established",
            Self::ConnectionClosed => "connection_closed",
            Self::KeepAlive => "keep_alive",
            Self::EnvStateRequested => "env_state_requested",
        }
    }

    /// Parse one trimmed line. Matching is case-sensitive.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == line)
    }

    /// Line-terminated wire form.
    #[must_use]
    pub fn encode(self) -> String {
        format!("{}\n", self.as_str())
    }

    /// Whether the server answers this signal.
    #[must_use]
    pub const fn expects_response(self) -> bool {
        matches!(self, Self::EnvStateRequested)
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a received batch: either a known signal or the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Recognized signal.
    Known(Signal),
    /// Unrecognized text, kept for logging.
    Unknown(String),
}

/// Split a raw read into its non-empty lines.
///
/// A single read may carry several messages when a client writes them
/// back to back.
#[must_use]
pub fn parse_batch(raw: &str) -> Vec<Inbound> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match Signal::parse(line) {
            Some(signal) => Inbound::Known(signal),
            None => Inbound::Unknown(line.to_owned()),
        })
        .collect()
}

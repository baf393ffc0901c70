//! Waiting session: the server the halted job blocks on and the client an
//! attacher runs against it.

pub mod client;
pub mod server;
pub mod state;

pub use client::SessionClient;
pub use server::{EnvSource, SessionServer};
pub use state::{SessionPhase, SessionState, SessionTimeouts, Termination};

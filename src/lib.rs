//! Halt a CI job and wait for an interactive debugging session on the
//! runner, replaying the environment, directory, and failing command of
//! an earlier step.

#![forbid(unsafe_code)]

pub mod config;
pub mod connect;
pub mod errors;
pub mod halt;
pub mod labels;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod snapshot;

pub use config::{CiEnvironment, ConnectionConfig};
pub use errors::{AppError, Result};

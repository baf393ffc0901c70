//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or socket operation failure.
    Io(String),
    /// HTTP client construction or transport failure.
    Http(String),
    /// Session protocol failure (bind, accept, malformed response).
    Protocol(String),
    /// Execution-state snapshot could not be read, written, or parsed.
    Snapshot(String),
    /// Label retrieval failed and no other halt trigger fired.
    HaltAmbiguous(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Snapshot(msg) => write!(f, "snapshot: {msg}"),
            Self::HaltAmbiguous(msg) => write!(f, "halt ambiguous: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Snapshot(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

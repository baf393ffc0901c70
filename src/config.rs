//! Configuration parsing, validation, and the CI environment view.
//!
//! [`ConnectionConfig`] holds tunables loaded from an optional TOML file;
//! every field has a default so an empty document is a valid config.
//! [`CiEnvironment`] is a one-time capture of the CI variables the halt
//! decision and label client read, passed down explicitly instead of being
//! looked up ad hoc from the process environment.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::protocol::DEFAULT_ADDR;
use crate::snapshot::env::process_vars;
use crate::{AppError, Result};

/// Label names that trigger a halt when attached to the pull request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LabelNames {
    /// Halt unconditionally.
    #[serde(default = "default_halt_always")]
    pub halt_always: String,
    /// Halt only when this is a re-run (attempt 2+).
    #[serde(default = "default_halt_on_retry")]
    pub halt_on_retry: String,
    /// Halt only when a prior step preserved a failing execution state.
    #[serde(default = "default_halt_on_error")]
    pub halt_on_error: String,
}

impl Default for LabelNames {
    fn default() -> Self {
        Self {
            halt_always: default_halt_always(),
            halt_on_retry: default_halt_on_retry(),
            halt_on_error: default_halt_on_error(),
        }
    }
}

fn default_halt_always() -> String {
    "CI Connection Halt - Always".into()
}

fn default_halt_on_retry() -> String {
    "CI Connection Halt - On Retry".into()
}

fn default_halt_on_error() -> String {
    "CI Connection Halt - On Error".into()
}

/// Label API client settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ApiConfig {
    /// API root; replaced by `GITHUB_API_URL` when that variable is set.
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Value of the `X-GitHub-Api-Version` header.
    #[serde(default = "default_api_version")]
    pub version: String,
    /// Total request attempts per fetch.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Backoff base; attempt `n` waits `base * 2^(n-2)`.
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            version: default_api_version(),
            attempts: default_attempts(),
            backoff_base_seconds: default_backoff_base_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.github.com".into()
}

fn default_api_version() -> String {
    "2022-11-28".into()
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_base_seconds() -> u64 {
    2
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_host() -> IpAddr {
    DEFAULT_ADDR.ip()
}

fn default_port() -> u16 {
    DEFAULT_ADDR.port()
}

fn default_initial_timeout_seconds() -> u64 {
    10 * 60
}

fn default_reconnect_timeout_seconds() -> u64 {
    15 * 60
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_keep_alive_seconds() -> u64 {
    30
}

/// Tunables for the waiting server, the attaching client, and label lookup.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionConfig {
    /// Loopback address the session server binds.
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Session server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Inactivity timeout before any client has connected.
    #[serde(default = "default_initial_timeout_seconds")]
    pub initial_timeout_seconds: u64,
    /// Inactivity timeout once a client has connected.
    #[serde(default = "default_reconnect_timeout_seconds")]
    pub reconnect_timeout_seconds: u64,
    /// Cadence of the server's timeout check.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// Client heartbeat period.
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,
    /// Override for the per-run state directory.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Halt label names.
    #[serde(default)]
    pub labels: LabelNames,
    /// Label API settings.
    #[serde(default)]
    pub api: ApiConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            initial_timeout_seconds: default_initial_timeout_seconds(),
            reconnect_timeout_seconds: default_reconnect_timeout_seconds(),
            tick_seconds: default_tick_seconds(),
            keep_alive_seconds: default_keep_alive_seconds(),
            state_dir: None,
            labels: LabelNames::default(),
            api: ApiConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::load_from_path`] failures.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Ok(Self::default()),
        }
    }

    /// Socket address of the session server.
    #[must_use]
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Timeout while waiting for the first client.
    #[must_use]
    pub fn initial_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_timeout_seconds)
    }

    /// Timeout once a client has connected.
    #[must_use]
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_seconds)
    }

    /// Server ticker cadence.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    /// Client heartbeat period.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(AppError::Config("port must be greater than zero".into()));
        }
        if self.tick_seconds == 0 || self.keep_alive_seconds == 0 {
            return Err(AppError::Config(
                "tick_seconds and keep_alive_seconds must be greater than zero".into(),
            ));
        }
        if self.initial_timeout_seconds == 0 || self.reconnect_timeout_seconds == 0 {
            return Err(AppError::Config(
                "session timeouts must be greater than zero".into(),
            ));
        }
        if self.api.attempts == 0 {
            return Err(AppError::Config(
                "api.attempts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Typed view of the CI runner environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiEnvironment {
    /// `GITHUB_TOKEN`
    pub token: Option<String>,
    /// `GITHUB_REPOSITORY`, `owner/repo`.
    pub repository: Option<String>,
    /// `GITHUB_REF`
    pub git_ref: Option<String>,
    /// `GITHUB_EVENT_PATH`
    pub event_path: Option<PathBuf>,
    /// `GITHUB_API_URL`
    pub api_url: Option<String>,
    /// `GITHUB_EVENT_NAME`
    pub event_name: Option<String>,
    /// `GITHUB_RUN_ATTEMPT`, unparsed.
    pub run_attempt: Option<String>,
    /// `RUNNER_DEBUG`
    pub runner_debug: Option<String>,
    /// `HALT_DISPATCH_INPUT`
    pub halt_dispatch_input: Option<String>,
    /// `MLCI_WAIT_AFTER_HALT_CHECK`
    pub wait_after_halt_check: Option<String>,
    /// `HOME`
    pub home: Option<PathBuf>,
    /// `CONNECTION_POD_NAME`
    pub pod_name: Option<String>,
    /// `CONNECTION_CLUSTER`
    pub cluster: Option<String>,
    /// `CONNECTION_LOCATION`
    pub location: Option<String>,
    /// `CONNECTION_NS`
    pub namespace: Option<String>,
}

impl CiEnvironment {
    /// Capture the relevant variables from the current process environment.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self::from_vars(process_vars())
    }

    /// Build from an explicit set of variables.
    #[must_use]
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut take = |name: &str| map.remove(name);

        Self {
            token: take("GITHUB_TOKEN").filter(|t| !t.is_empty()),
            repository: take("GITHUB_REPOSITORY"),
            git_ref: take("GITHUB_REF"),
            event_path: take("GITHUB_EVENT_PATH").map(PathBuf::from),
            api_url: take("GITHUB_API_URL").filter(|u| !u.is_empty()),
            event_name: take("GITHUB_EVENT_NAME"),
            run_attempt: take("GITHUB_RUN_ATTEMPT"),
            runner_debug: take("RUNNER_DEBUG"),
            halt_dispatch_input: take("HALT_DISPATCH_INPUT"),
            wait_after_halt_check: take("MLCI_WAIT_AFTER_HALT_CHECK"),
            home: take("HOME").map(PathBuf::from),
            pod_name: take("CONNECTION_POD_NAME"),
            cluster: take("CONNECTION_CLUSTER"),
            location: take("CONNECTION_LOCATION"),
            namespace: take("CONNECTION_NS"),
        }
    }

    /// API root to use: `GITHUB_API_URL` wins over the configured default.
    #[must_use]
    pub fn api_base_url<'a>(&'a self, config: &'a ApiConfig) -> &'a str {
        self.api_url.as_deref().unwrap_or(&config.base_url)
    }
}

//! On-disk execution state for replay in a debugging session.
//!
//! Layout under the per-run state directory:
//! - `execution_state.json`: one [`ExecutionState`] document
//! - `env.txt`: the captured environment as `KEY='VALUE'` lines
//!
//! Writes go through a temp file in the same directory and are renamed
//! into place.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::env::EnvSnapshot;
use crate::config::{CiEnvironment, ConnectionConfig};
use crate::{AppError, Result};

/// Directory name created under `$HOME`.
pub const STATE_DIR_NAME: &str = ".workflow_state";

/// Execution-state document file name.
pub const EXECUTION_STATE_FILE: &str = "execution_state.json";

/// Shell-sourceable environment file name.
pub const ENV_TEXT_FILE: &str = "env.txt";

/// Context captured when a prior command failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// The failing shell command.
    #[serde(default)]
    pub shell_command: Option<String>,
    /// Working directory at the time of failure.
    #[serde(default)]
    pub directory: Option<String>,
    /// Environment captured at the time of failure.
    #[serde(default)]
    pub env: Option<EnvSnapshot>,
}

/// Per-run state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Use `root` as the state directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<home>/.workflow_state`
    #[must_use]
    pub fn under_home(home: &Path) -> Self {
        Self::new(home.join(STATE_DIR_NAME))
    }

    /// Resolve from config override or `$HOME`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when neither is available.
    pub fn resolve(config: &ConnectionConfig, env: &CiEnvironment) -> Result<Self> {
        if let Some(ref dir) = config.state_dir {
            return Ok(Self::new(dir.clone()));
        }
        env.home
            .as_deref()
            .map(Self::under_home)
            .ok_or_else(|| AppError::Config("HOME is not set and no state_dir configured".into()))
    }

    /// Directory root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the execution-state document.
    #[must_use]
    pub fn info_path(&self) -> PathBuf {
        self.root.join(EXECUTION_STATE_FILE)
    }

    /// Path of the shell-sourceable environment file.
    #[must_use]
    pub fn env_text_path(&self) -> PathBuf {
        self.root.join(ENV_TEXT_FILE)
    }

    /// Whether a prior failure left an execution state behind.
    #[must_use]
    pub fn has_execution_state(&self) -> bool {
        self.info_path().is_file()
    }

    /// Write a new execution state, replacing any previous one.
    ///
    /// The companion env file is rewritten when `env` is present and
    /// removed otherwise, so nothing from an earlier capture survives.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Snapshot` if the directory or files cannot be written.
    pub fn persist(
        &self,
        shell_command: Option<String>,
        directory: Option<String>,
        env: Option<EnvSnapshot>,
    ) -> Result<ExecutionState> {
        let state = ExecutionState {
            shell_command,
            directory,
            env,
        };
        let body = serde_json::to_string_pretty(&state)?;
        self.write_atomic(&self.info_path(), body.as_bytes())?;

        match state.env {
            Some(ref env) if !env.is_empty() => {
                self.write_env_text(env)?;
            }
            _ => remove_if_present(&self.env_text_path())?,
        }

        info!(path = %self.info_path().display(), "execution state saved");
        Ok(state)
    }

    /// Write the `KEY='VALUE'` form of `env`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Snapshot` if the file cannot be written.
    pub fn write_env_text(&self, env: &EnvSnapshot) -> Result<PathBuf> {
        let path = self.env_text_path();
        self.write_atomic(&path, env.to_shell_text().as_bytes())?;
        debug!(path = %path.display(), vars = env.len(), "env text saved");
        Ok(path)
    }

    /// Read the execution state; missing or unparseable files yield `None`.
    #[must_use]
    pub fn load(&self) -> Option<ExecutionState> {
        let path = self.info_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no execution state file");
                return None;
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read execution state");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(path = %path.display(), %err, "could not parse execution state");
                None
            }
        }
    }

    /// Delete the whole directory. A missing directory is not an error.
    pub fn remove_all(&self) {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(path = %self.root.display(), "execution state deleted"),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no execution state data to delete");
            }
            Err(err) => warn!(path = %self.root.display(), %err, "failed to delete execution state"),
        }
    }

    /// Guard that deletes the directory when dropped.
    #[must_use]
    pub fn cleanup_guard(&self) -> StateCleanupGuard {
        StateCleanupGuard { dir: self.clone() }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|err| {
            AppError::Snapshot(format!(
                "failed to create state directory {}: {err}",
                self.root.display()
            ))
        })?;
        let mut tmp = NamedTempFile::new_in(&self.root)
            .map_err(|err| AppError::Snapshot(format!("failed to create temp file: {err}")))?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.flush())
            .map_err(|err| AppError::Snapshot(format!("failed to write temp file: {err}")))?;
        tmp.persist(path).map_err(|err| {
            AppError::Snapshot(format!("failed to replace {}: {}", path.display(), err.error))
        })?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Snapshot(format!(
            "failed to remove {}: {err}",
            path.display()
        ))),
    }
}

/// Removes the state directory on drop, whichever way the scope exits.
#[derive(Debug)]
pub struct StateCleanupGuard {
    dir: StateDir,
}

impl Drop for StateCleanupGuard {
    fn drop(&mut self) {
        debug!("deleting execution state data");
        self.dir.remove_all();
    }
}

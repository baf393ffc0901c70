//! Connection instructions printed by the waiting job.
//!
//! The main command runs the notify binary as the remote entrypoint so the
//! job learns about the session. The fallback opens a bare shell, which
//! the job never hears about.

use std::path::{Path, PathBuf};

use crate::config::CiEnvironment;

/// File name of the attaching client binary.
pub const NOTIFY_BINARY: &str = "ci-connection-notify";

/// Commands an operator can run to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInstructions {
    /// Attach and notify the waiting job.
    pub main: String,
    /// Attach with a plain shell.
    pub fallback: String,
}

impl ConnectionInstructions {
    /// Build instructions for this runner.
    #[must_use]
    pub fn new(env: &CiEnvironment, notify_binary: &Path) -> Self {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        let base = format!(
            "ml-actions-connect --runner={} --ns={} --loc={} --cluster={}",
            field(&env.pod_name),
            field(&env.namespace),
            field(&env.location),
            field(&env.cluster),
        );

        let mut entrypoint = notify_binary.display().to_string();
        if cfg!(windows) {
            entrypoint = entrypoint.replace('\\', "\\\\");
        }

        Self {
            main: format!("{base} --entrypoint=\"{entrypoint}\""),
            fallback: format!("{base} --entrypoint=\"bash -i\""),
        }
    }

    /// Operator-facing text block.
    #[must_use]
    pub fn render(&self) -> String {
        let rule = "-".repeat(100);
        format!(
            "{rule}\nCONNECTION COMMAND (MAIN):\n{}\n{rule}\n\n\
             CONNECTION COMMAND (FALLBACK):\n{}\n\n\
             If the main command doesn't work, use the fallback above.\n\
             The fallback does not let the runner know a connection was made,\n\
             and will not keep the runner waiting. When using it, add a wait\n\
             after the 'Wait for Connection' step in your workflow manually.\n",
            self.main, self.fallback
        )
    }
}

/// Path of the notify binary next to the running executable.
#[must_use]
pub fn notify_binary_path() -> PathBuf {
    let name = format!("{NOTIFY_BINARY}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

//! Decide whether the job should halt and wait for a debugging session.
//!
//! Triggers are evaluated cheapest first and the first one that fires
//! wins, so the label lookup (a network round trip) only happens when
//! nothing local already decided. When the labels cannot be retrieved and
//! nothing else fired, the decision is ambiguous and fatal: silently not
//! halting would skip a requested session.

use tracing::{debug, error, info, warn};

use crate::config::{CiEnvironment, LabelNames};
use crate::labels::{LabelSet, LabelSource};
use crate::snapshot::StateDir;
use crate::{AppError, Result};

/// Values that read as "off" for a flag variable, compared lowercased.
const NEGATIVE_TOKENS: [&str; 7] = ["0", "false", "n", "no", "none", "null", "n/a"];

/// Events for which runner debug logging alone requests a halt.
const DEBUG_HALT_EVENTS: [&str; 2] = ["schedule", "workflow_dispatch"];

/// Interpret a flag variable: set, non-empty, and not a negative token.
#[must_use]
pub fn is_true_like(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        let lowered = v.to_lowercase();
        !lowered.is_empty() && !NEGATIVE_TOKENS.contains(&lowered.as_str())
    })
}

/// Parse `GITHUB_RUN_ATTEMPT`, assuming the first attempt when unusable.
#[must_use]
pub fn parse_run_attempt(raw: Option<&str>) -> u32 {
    match raw.map(str::trim).map(str::parse::<u32>) {
        Some(Ok(attempt)) => attempt,
        _ => {
            error!(?raw, "could not read GITHUB_RUN_ATTEMPT, assuming first attempt");
            1
        }
    }
}

/// The condition that caused a halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltTrigger {
    /// The caller asked for a wait directly.
    ExplicitOverride,
    /// The dispatch input flag is set.
    DispatchInput,
    /// Runner debug logging on a scheduled or manually dispatched run.
    DebugScheduled,
    /// The halt-always label is attached.
    LabelAlways,
    /// The halt-on-retry label is attached and this is a re-run.
    LabelOnRetry,
    /// The halt-on-error label is attached and a prior failure was preserved.
    LabelOnPriorFailure,
    /// Wait-after-checks was requested; halting regardless of the checks.
    WaitAfterChecks,
}

/// Combines every halt trigger into one decision.
pub struct HaltDecision<L> {
    env: CiEnvironment,
    label_names: LabelNames,
    state_dir: StateDir,
    source: L,
    wait_after_checks: bool,
    run_attempt: u32,
}

impl<L: LabelSource> HaltDecision<L> {
    /// Build a decision over `env`, reading labels from `source`.
    ///
    /// Wait-after-checks is taken from `MLCI_WAIT_AFTER_HALT_CHECK`.
    #[must_use]
    pub fn new(env: CiEnvironment, label_names: LabelNames, state_dir: StateDir, source: L) -> Self {
        let wait_after_checks = is_true_like(env.wait_after_halt_check.as_deref());
        let run_attempt = parse_run_attempt(env.run_attempt.as_deref());
        Self {
            env,
            label_names,
            state_dir,
            source,
            wait_after_checks,
            run_attempt,
        }
    }

    /// Also request wait-after-checks from the caller.
    #[must_use]
    pub fn wait_after_checks(mut self, requested: bool) -> Self {
        self.wait_after_checks |= requested;
        self
    }

    /// Workflow run attempt used by the retry label.
    #[must_use]
    pub fn run_attempt(&self) -> u32 {
        self.run_attempt
    }

    /// Whether the job should halt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::HaltAmbiguous` when the labels could not be
    /// retrieved, no other trigger fired, and wait-after-checks is off.
    pub async fn should_halt(&self, explicit_override: bool) -> Result<bool> {
        Ok(self.decide(explicit_override).await?.is_some())
    }

    /// The trigger that fired, or `None` when the job should continue.
    ///
    /// # Errors
    ///
    /// See [`Self::should_halt`].
    pub async fn decide(&self, explicit_override: bool) -> Result<Option<HaltTrigger>> {
        info!("checking if the workflow should be halted for a connection");

        if explicit_override && !self.wait_after_checks {
            info!("wait for connection requested explicitly by the caller");
            return Ok(Some(HaltTrigger::ExplicitOverride));
        }

        if is_true_like(self.env.halt_dispatch_input.as_deref()) {
            info!("halt requested via the dispatch input");
            return Ok(Some(HaltTrigger::DispatchInput));
        }
        debug!("no halt dispatch input detected");

        if self.debug_on_scheduled_run() {
            return Ok(Some(HaltTrigger::DebugScheduled));
        }

        // Anything cheaper than a label lookup must be checked above, since
        // a failed lookup is fatal from here on.
        match self.source.labels().await {
            Some(labels) => {
                if let Some(trigger) = self.label_trigger(&labels) {
                    return Ok(Some(trigger));
                }
            }
            None if !self.wait_after_checks => {
                error!("exiting: PR labels could not be retrieved and no other halting condition was met");
                return Err(AppError::HaltAmbiguous(
                    "label retrieval failed and no other halt trigger fired".into(),
                ));
            }
            None => warn!("PR labels could not be retrieved; halting anyway after checks"),
        }

        if self.wait_after_checks {
            info!("wait for connection requested after checks");
            return Ok(Some(HaltTrigger::WaitAfterChecks));
        }

        Ok(None)
    }

    fn debug_on_scheduled_run(&self) -> bool {
        let debug_enabled = is_true_like(self.env.runner_debug.as_deref());
        let event = self.env.event_name.as_deref().unwrap_or_default();
        let scheduled = DEBUG_HALT_EVENTS.contains(&event);

        if debug_enabled && scheduled {
            info!(event, "runner debugging is enabled on a schedule/workflow_dispatch run");
            return true;
        }
        if !scheduled {
            debug!(event, "job type is not schedule or workflow_dispatch");
        }
        if !debug_enabled {
            debug!("runner debug logging is not enabled");
        }
        false
    }

    fn label_trigger(&self, labels: &LabelSet) -> Option<HaltTrigger> {
        let names = &self.label_names;

        if labels.contains(&names.halt_on_error) {
            if self.state_dir.has_execution_state() {
                info!(label = %names.halt_on_error, "halt requested by label; found a preserved execution state");
                return Some(HaltTrigger::LabelOnPriorFailure);
            }
            debug!(
                label = %names.halt_on_error,
                path = %self.state_dir.info_path().display(),
                "label present but no execution state file"
            );
        }

        if labels.contains(&names.halt_always) {
            info!(label = %names.halt_always, "halt requested by label");
            return Some(HaltTrigger::LabelAlways);
        }

        if labels.contains(&names.halt_on_retry) {
            if self.run_attempt >= 2 {
                info!(
                    label = %names.halt_on_retry,
                    run_attempt = self.run_attempt,
                    "halt requested by label on a re-run"
                );
                return Some(HaltTrigger::LabelOnRetry);
            }
            debug!(label = %names.halt_on_retry, "label present but this is the first attempt");
        }

        None
    }
}

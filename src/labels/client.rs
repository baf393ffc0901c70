//! HTTP label client with retry, backoff, and identity downgrade.
//!
//! Each fetch makes up to `attempts` requests:
//! - `200` parses the body; a malformed body ends the fetch.
//! - `404` ends the fetch (private repository or missing permission).
//! - `401`/`403`/`429` with a token drops the token and retries at once;
//!   without a token it ends the fetch.
//! - Anything else, including transport errors, retries after
//!   `base * 2^(attempt - 2)`.
//!
//! The token is per-fetch state, so a downgrade never leaks into the
//! next fetch.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::event_file::labels_from_event_file;
use super::{extract_names, LabelSet, LabelSource};
use crate::config::{ApiConfig, CiEnvironment};
use crate::{AppError, Result};

const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

static PULL_REF_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"refs/pull/(\d+)/").ok());

/// Why an authorization-class status was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// `429`, or `403` with no remaining rate limit.
    RateLimited,
    /// Any other `401`/`403`.
    Permissions,
}

/// What to do after one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Parse the body.
    Parse,
    /// Stop without labels.
    Terminal,
    /// Drop the token and retry without waiting.
    Downgrade(AuthFailure),
    /// Retry after backoff.
    Backoff,
}

/// Classify an HTTP status for the retry loop.
#[must_use]
pub fn classify(status: u16, authenticated: bool, rate_limit_remaining: Option<&str>) -> Disposition {
    match status {
        200 => Disposition::Parse,
        404 => Disposition::Terminal,
        401 | 403 | 429 if !authenticated => Disposition::Terminal,
        429 => Disposition::Downgrade(AuthFailure::RateLimited),
        403 if rate_limit_remaining.map(str::trim) == Some("0") => {
            Disposition::Downgrade(AuthFailure::RateLimited)
        }
        401 | 403 => Disposition::Downgrade(AuthFailure::Permissions),
        _ => Disposition::Backoff,
    }
}

/// Delay before `attempt` (1-based): none for the first, then
/// `base * 2^(attempt - 2)`.
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if attempt < 2 {
        return Duration::ZERO;
    }
    let factor = 1_u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Label client for the triggering pull request.
#[derive(Debug, Clone)]
pub struct LabelClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    repository: Option<String>,
    token: Option<String>,
    git_ref: Option<String>,
    event_path: Option<PathBuf>,
    attempts: u32,
    backoff_base: Duration,
}

impl LabelClient {
    /// Build a client from API settings and the CI environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig, env: &CiEnvironment) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| AppError::Http(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            base_url: env
                .api_base_url(config)
                .trim_end_matches('/')
                .to_owned(),
            api_version: config.version.clone(),
            repository: env.repository.clone(),
            token: env.token.clone(),
            git_ref: env.git_ref.clone(),
            event_path: env.event_path.clone(),
            attempts: config.attempts.max(1),
            backoff_base: Duration::from_secs(config.backoff_base_seconds),
        })
    }

    /// Override the backoff base.
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Labels endpoint for `issue_id`.
    #[must_use]
    pub fn labels_url(&self, issue_id: &str) -> Option<String> {
        let repo = self.repository.as_deref()?;
        Some(format!(
            "{}/repos/{repo}/issues/{issue_id}/labels",
            self.base_url
        ))
    }

    /// Fetch labels for `issue_id` from the API.
    ///
    /// Returns `None` when no attempt produced a parseable `200`.
    pub async fn fetch_labels(&self, issue_id: &str) -> Option<LabelSet> {
        let Some(url) = self.labels_url(issue_id) else {
            error!("GITHUB_REPOSITORY is not set, cannot query labels");
            return None;
        };
        debug!(%url, issue_id, "label endpoint");

        let mut token = self.token.clone();
        let mut attempt = 1;
        while attempt <= self.attempts {
            let span = info_span!("label_fetch", attempt, authenticated = token.is_some());
            let next = self
                .attempt(&url, token.as_deref())
                .instrument(span)
                .await;

            match next {
                Step::Done(labels) => return labels,
                Step::Downgrade(reason) => {
                    match reason {
                        AuthFailure::RateLimited => {
                            warn!(attempt, "rate limited; retrying without token");
                        }
                        AuthFailure::Permissions => {
                            warn!(attempt, "token lacks permission or is invalid; retrying without token");
                        }
                    }
                    token = None;
                    attempt += 1;
                }
                Step::Backoff => {
                    attempt += 1;
                    if attempt <= self.attempts {
                        let delay = backoff_delay(self.backoff_base, attempt);
                        info!(
                            delay_secs = delay.as_secs_f64(),
                            attempt,
                            total = self.attempts,
                            "retrying label request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(attempts = self.attempts, "retrieval of PR labels via API failed");
        None
    }

    async fn attempt(&self, url: &str, token: Option<&str>) -> Step {
        info!("retrieving PR labels via API");
        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(API_VERSION_HEADER, &self.api_version);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                error!(%err, "label request failed");
                return Step::Backoff;
            }
        };

        let status = response.status().as_u16();
        let remaining = response
            .headers()
            .get(RATE_LIMIT_REMAINING_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        match classify(status, token.is_some(), remaining.as_deref()) {
            Disposition::Parse => match response.text().await {
                Ok(body) => {
                    debug!(%body, "API labels data");
                    Step::Done(parse_labels_body(&body))
                }
                Err(err) => {
                    error!(%err, "failed to read label response body");
                    Step::Backoff
                }
            },
            Disposition::Terminal => {
                error!(status, "label request failed with terminal status");
                Step::Done(None)
            }
            Disposition::Downgrade(reason) => {
                debug!(status, ?reason, "authorization-class status");
                Step::Downgrade(reason)
            }
            Disposition::Backoff => {
                error!(status, "label request failed");
                Step::Backoff
            }
        }
    }

    /// Labels from the runner's event payload file.
    #[must_use]
    pub fn labels_from_event_file(&self) -> Option<LabelSet> {
        let Some(ref path) = self.event_path else {
            error!("GITHUB_EVENT_PATH is not set");
            return None;
        };
        labels_from_event_file(path)
    }

    /// The most up-to-date labels for the current run.
    ///
    /// Outside a pull request there are no labels, so the result is an
    /// empty set. Inside one, the API is tried first, then the event file.
    pub async fn retrieve_labels(&self) -> Option<LabelSet> {
        let Some(ref git_ref) = self.git_ref else {
            error!("GITHUB_REF is not defined; is this running outside of GitHub Actions?");
            return None;
        };

        if !git_ref.starts_with("refs/pull/") {
            debug!(%git_ref, "not a PR workflow run, no labels");
            return Some(LabelSet::default());
        }

        let Some(issue) = pull_number(git_ref) else {
            error!(%git_ref, "could not extract PR number from GITHUB_REF");
            return None;
        };

        if let Some(labels) = self.fetch_labels(issue).await {
            debug!(labels = ?labels.names(), "final labels");
            return Some(labels);
        }

        info!("attempting to retrieve labels from the event file");
        self.labels_from_event_file()
    }
}

impl LabelSource for LabelClient {
    fn labels(&self) -> Pin<Box<dyn Future<Output = Option<LabelSet>> + Send + '_>> {
        Box::pin(self.retrieve_labels())
    }
}

enum Step {
    Done(Option<LabelSet>),
    Downgrade(AuthFailure),
    Backoff,
}

/// Pull-request number from a `refs/pull/<n>/...` ref.
#[must_use]
pub fn pull_number(git_ref: &str) -> Option<&str> {
    PULL_REF_RE
        .as_ref()?
        .captures(git_ref)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn parse_labels_body(body: &str) -> Option<LabelSet> {
    match serde_json::from_str::<Value>(body) {
        Ok(data) => extract_names(&data),
        Err(err) => {
            warn!(%err, %body, "failed to parse label JSON received from API");
            None
        }
    }
}

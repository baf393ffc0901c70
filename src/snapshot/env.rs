//! Environment capture with deny/allow filtering.
//!
//! The effective denylist is the fixed secret names, plus the caller's
//! names, plus the names listed in [`DENYLIST_ENV_VAR`]. The effective
//! allowlist is the caller's names plus those in [`ALLOWLIST_ENV_VAR`].
//! A variable survives when the allowlist is empty or names it, and the
//! denylist does not. Denial always wins.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Variables that are never captured or transmitted.
pub const SECRET_VARS: &[&str] = &["GITHUB_TOKEN"];

/// Comma-separated extra names to deny.
pub const DENYLIST_ENV_VAR: &str = "GML_ACTIONS_DEBUG_VARS_DENYLIST";

/// Comma-separated names to allow exclusively.
pub const ALLOWLIST_ENV_VAR: &str = "GML_ACTIONS_DEBUG_VARS_ALLOWLIST";

static NAME_LIST_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_,]+$").ok());

/// Parse a comma-separated list of variable names.
///
/// Surrounding whitespace is ignored and empty entries are dropped. The
/// list is rejected as a whole if it contains anything other than ASCII
/// letters, digits, underscores, and commas.
///
/// # Errors
///
/// Returns `AppError::Config` naming the offending value.
pub fn parse_name_list(raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if !NAME_LIST_RE
        .as_ref()
        .is_some_and(|re| re.is_match(trimmed))
    {
        return Err(AppError::Config(format!(
            "`{raw}` contains invalid characters; expected only letters, digits, underscores, and commas"
        )));
    }
    Ok(trimmed
        .split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Parse a name list read from `source`, discarding it entirely if malformed.
#[must_use]
pub fn names_or_empty(raw: Option<&str>, source: &str) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    parse_name_list(raw).unwrap_or_else(|err| {
        warn!(source, %err, "ignoring contents of variable list");
        Vec::new()
    })
}

/// The process environment as UTF-8 pairs.
///
/// Entries whose name or value is not valid UTF-8 are skipped with a
/// warning rather than aborting the capture.
#[must_use]
pub fn process_vars() -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (Ok(name), Err(_)) => {
                warn!(%name, "skipping variable with a non UTF-8 value");
                None
            }
            (Err(name), _) => {
                warn!(name = %name.to_string_lossy(), "skipping variable with a non UTF-8 name");
                None
            }
        })
        .collect()
}

/// Name-based filter applied to an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarFilter {
    denylist: BTreeSet<String>,
    allowlist: BTreeSet<String>,
}

impl VarFilter {
    /// Build a filter from caller lists. [`SECRET_VARS`] are always denied.
    #[must_use]
    pub fn new<D, A, S>(denylist: D, allowlist: A) -> Self
    where
        D: IntoIterator<Item = S>,
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut denylist: BTreeSet<String> = denylist.into_iter().map(Into::into).collect();
        denylist.extend(SECRET_VARS.iter().map(|s| (*s).to_owned()));
        Self {
            denylist,
            allowlist: allowlist.into_iter().map(Into::into).collect(),
        }
    }

    /// Deny only [`SECRET_VARS`]; allow everything else.
    #[must_use]
    pub fn secrets_only() -> Self {
        Self::new(Vec::<String>::new(), Vec::new())
    }

    /// Merge in names listed by [`DENYLIST_ENV_VAR`] and [`ALLOWLIST_ENV_VAR`].
    #[must_use]
    pub fn with_env_lists(mut self, deny_raw: Option<&str>, allow_raw: Option<&str>) -> Self {
        self.denylist.extend(names_or_empty(deny_raw, DENYLIST_ENV_VAR));
        self.allowlist.extend(names_or_empty(allow_raw, ALLOWLIST_ENV_VAR));
        self
    }

    /// Whether `name` survives the filter.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        (self.allowlist.is_empty() || self.allowlist.contains(name))
            && !self.denylist.contains(name)
    }

    /// Effective denylist.
    #[must_use]
    pub fn denylist(&self) -> &BTreeSet<String> {
        &self.denylist
    }

    /// Effective allowlist.
    #[must_use]
    pub fn allowlist(&self) -> &BTreeSet<String> {
        &self.allowlist
    }

    /// Apply the filter to a set of variables.
    #[must_use]
    pub fn apply<I, K, V>(&self, vars: I) -> EnvSnapshot
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        vars.into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| self.allows(k))
            .collect()
    }
}

/// Filtered environment variables, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvSnapshot(BTreeMap<String, String>);

impl EnvSnapshot {
    /// Capture the process environment with caller lists plus the
    /// list variables found in that same environment.
    #[must_use]
    pub fn capture(denylist: &[String], allowlist: &[String]) -> Self {
        Self::capture_from(process_vars(), denylist, allowlist)
    }

    /// Capture from an explicit environment.
    #[must_use]
    pub fn capture_from<I>(vars: I, denylist: &[String], allowlist: &[String]) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let lookup = |name: &str| {
            vars.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        let filter = VarFilter::new(denylist.iter().cloned(), allowlist.iter().cloned())
            .with_env_lists(lookup(DENYLIST_ENV_VAR), lookup(ALLOWLIST_ENV_VAR));
        debug!(
            denied = filter.denylist().len(),
            allowed = filter.allowlist().len(),
            "capturing environment"
        );
        filter.apply(vars.iter().cloned())
    }

    /// Snapshot for a trusted in-process request: secrets denied, nothing else.
    #[must_use]
    pub fn capture_trusted<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        VarFilter::secrets_only().apply(vars)
    }

    /// Value of one variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Number of captured variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Single-line JSON object, as sent over the wire.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Snapshot` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON object of string values.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Snapshot` if the text is not such an object.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw.trim())?)
    }

    /// `KEY='VALUE'` lines sorted by key, suitable for `source`.
    ///
    /// Single quotes inside values are written as `'\''`.
    #[must_use]
    pub fn to_shell_text(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}='{}'", v.replace('\'', r"'\''")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse the output of [`Self::to_shell_text`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Snapshot` on a line that is not `KEY='VALUE'`.
    pub fn parse_shell_text(text: &str) -> Result<Self> {
        let mut vars = BTreeMap::new();
        for (idx, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let malformed = || AppError::Snapshot(format!("malformed env line {}: {line}", idx + 1));
            let (key, quoted) = line.split_once('=').ok_or_else(malformed)?;
            let inner = quoted
                .strip_prefix('\'')
                .and_then(|rest| rest.strip_suffix('\''))
                .ok_or_else(malformed)?;
            vars.insert(key.to_owned(), inner.replace(r"'\''", "'"));
        }
        Ok(Self(vars))
    }
}

impl FromIterator<(String, String)> for EnvSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, String>> for EnvSnapshot {
    fn from(vars: BTreeMap<String, String>) -> Self {
        Self(vars)
    }
}

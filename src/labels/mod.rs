//! Pull-request label retrieval.
//!
//! Labels on the triggering pull request are one input to the halt
//! decision. The API is the primary source since labels in the event
//! payload can be stale; the payload file is the fallback.

pub mod client;
pub mod event_file;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::error;

pub use client::LabelClient;

/// Label names attached to a pull request at fetch time, in API order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    /// Whether `name` is attached.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|label| label == name)
    }

    /// Label names in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for LabelSet {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

impl<const N: usize> From<[&str; N]> for LabelSet {
    fn from(names: [&str; N]) -> Self {
        Self(names.iter().map(|s| (*s).to_owned()).collect())
    }
}

/// Anything that can report the current pull-request labels.
///
/// `None` means the labels could not be determined at all, which the halt
/// decision treats differently from an empty set.
pub trait LabelSource: Send + Sync {
    /// Retrieve the labels.
    fn labels(&self) -> Pin<Box<dyn Future<Output = Option<LabelSet>> + Send + '_>>;
}

/// Fixed labels, or a fixed failure when `None`.
#[derive(Debug, Clone, Default)]
pub struct StaticLabels(pub Option<LabelSet>);

impl LabelSource for StaticLabels {
    fn labels(&self) -> Pin<Box<dyn Future<Output = Option<LabelSet>> + Send + '_>> {
        let labels = self.0.clone();
        Box::pin(async move { labels })
    }
}

/// Extract `name` fields from a JSON array of label objects.
///
/// Anything other than an array of objects carrying a string `name` is
/// malformed and yields `None`.
#[must_use]
pub fn extract_names(data: &Value) -> Option<LabelSet> {
    let Some(items) = data.as_array() else {
        error!(%data, "label data is not a list, cannot extract labels");
        return None;
    };
    let names: Option<Vec<String>> = items
        .iter()
        .map(|item| item.get("name").and_then(Value::as_str).map(str::to_owned))
        .collect();
    if names.is_none() {
        error!(%data, "failed to extract label names");
    }
    names.map(LabelSet)
}

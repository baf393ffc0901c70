//! Fallback label source: the static event payload written by the runner.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{error, info};

use super::{extract_names, LabelSet};

/// Read `pull_request.labels` from the event payload at `path`.
///
/// A payload without that path yields an empty set; a missing file or
/// invalid JSON yields `None`.
#[must_use]
pub fn labels_from_event_file(path: &Path) -> Option<LabelSet> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            error!(path = %path.display(), %err, "failed to read event payload");
            return None;
        }
    };
    let payload: Value = match serde_json::from_str(&raw) {
        Ok(payload) => payload,
        Err(err) => {
            error!(path = %path.display(), %err, "failed to parse event payload");
            return None;
        }
    };
    if !payload.is_object() {
        error!(path = %path.display(), "event payload is not an object");
        return None;
    }

    let labels = payload
        .get("pull_request")
        .and_then(|pr| pr.get("labels"))
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let labels = extract_names(&labels)?;
    info!(labels = ?labels.names(), "using fallback labels from event file");
    Some(labels)
}

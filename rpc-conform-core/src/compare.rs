//! Response comparison with don't-care sentinels
//!
//! An expected response may pin `result` or `error` to `null`. That means
//! "the field must be present, its content is not compared": live chain data
//! (block numbers, hashes, timestamps) rolls forward between recording and
//! replay. A field that is absent from the expected response is compared
//! normally.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

/// Verdict outcome of a single fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Skipped,
}

/// Kind of change, read from expected (base) to actual (overlay)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
    Changed,
}

/// A single difference between expected and actual
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffEntry {
    /// Dotted path, e.g. `result.transactions[0].hash`. Empty for the root.
    pub path: String,
    pub kind: DiffKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "<root>" } else { self.path.as_str() };
        let show = |v: &Option<Value>| v.as_ref().map(Value::to_string).unwrap_or_default();
        match self.kind {
            DiffKind::Added => write!(f, "+ {}: {}", path, show(&self.actual)),
            DiffKind::Removed => write!(f, "- {}: {}", path, show(&self.expected)),
            DiffKind::Changed => write!(
                f,
                "~ {}: {} -> {}",
                path,
                show(&self.expected),
                show(&self.actual)
            ),
        }
    }
}

/// Result of comparing an actual response against an expected one
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub outcome: Outcome,
    /// Present only on failure
    pub diff: Option<Vec<DiffEntry>>,
}

impl Comparison {
    pub fn pass() -> Self {
        Self {
            outcome: Outcome::Pass,
            diff: None,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

/// Compare `actual` against `expected`
pub fn compare(actual: &Value, expected: &Value) -> Comparison {
    // serde_json maps compare by key, so field order is irrelevant here
    if actual == expected {
        return Comparison::pass();
    }

    if dont_care(expected, actual, "result") || dont_care(expected, actual, "error") {
        return Comparison::pass();
    }

    Comparison {
        outcome: Outcome::Fail,
        diff: Some(diff(expected, actual)),
    }
}

/// `expected.<field>` is present and null, and `actual.<field>` is present
fn dont_care(expected: &Value, actual: &Value, field: &str) -> bool {
    matches!(expected.get(field), Some(Value::Null)) && actual.get(field).is_some()
}

/// Structured delta with `expected` as the base and `actual` as the overlay
pub fn diff(expected: &Value, actual: &Value) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    walk(expected, actual, "", &mut entries);
    entries
}

fn walk(expected: &Value, actual: &Value, path: &str, out: &mut Vec<DiffEntry>) {
    match (expected, actual) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, base_value) in base {
                let child = key_path(path, key);
                match overlay.get(key) {
                    Some(overlay_value) => walk(base_value, overlay_value, &child, out),
                    None => out.push(removed(child, base_value)),
                }
            }
            for (key, overlay_value) in overlay {
                if !base.contains_key(key) {
                    out.push(added(key_path(path, key), overlay_value));
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) => {
            for i in 0..base.len().max(overlay.len()) {
                let child = format!("{}[{}]", path, i);
                match (base.get(i), overlay.get(i)) {
                    (Some(b), Some(o)) => walk(b, o, &child, out),
                    (Some(b), None) => out.push(removed(child, b)),
                    (None, Some(o)) => out.push(added(child, o)),
                    (None, None) => {}
                }
            }
        }
        _ if expected == actual => {}
        _ => out.push(DiffEntry {
            path: path.to_string(),
            kind: DiffKind::Changed,
            expected: Some(expected.clone()),
            actual: Some(actual.clone()),
        }),
    }
}

fn key_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn added(path: String, value: &Value) -> DiffEntry {
    DiffEntry {
        path,
        kind: DiffKind::Added,
        expected: None,
        actual: Some(value.clone()),
    }
}

fn removed(path: String, value: &Value) -> DiffEntry {
    DiffEntry {
        path,
        kind: DiffKind::Removed,
        expected: Some(value.clone()),
        actual: None,
    }
}

/// JSON form of a delta, as written to the diff artifact
pub fn render_diff(entries: &[DiffEntry]) -> Value {
    json!({
        "differences": entries.len(),
        "entries": entries,
    })
}

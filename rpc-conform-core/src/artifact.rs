//! Failure artifacts
//!
//! A failing fixture leaves three sibling files under
//! `<output>/<api>/`: the actual response, the expected (or reference)
//! response and the diff. Large payloads can be diffed by an external
//! command instead of the built-in delta.

use crate::config::RunConfig;
use crate::select::SelectedTest;
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from artifact persistence
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to write artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize artifact {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Paths of the three artifacts of one fixture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub actual: PathBuf,
    pub expected: PathBuf,
    pub diff: PathBuf,
}

/// Writes artifacts below the output directory
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
    diff_tool: Option<String>,
    large_payload_threshold: u64,
}

impl ArtifactWriter {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            diff_tool: config.diff_tool.clone(),
            large_payload_threshold: config.large_payload_threshold,
        }
    }

    /// Deterministic artifact names for fixture `index` of `test`.
    /// Plain `.json` files drop their extension; archives keep the full
    /// file name so that `t.json` and `t.tar.gz` stay apart. The index
    /// suffix is only used for multi-fixture containers.
    pub fn paths(&self, test: &SelectedTest, index: Option<usize>) -> ArtifactPaths {
        let file_name = test.file_name();
        let stem = file_name.strip_suffix(".json").unwrap_or(&file_name);
        let base = match index {
            Some(i) => format!("{}_{}", stem, i),
            None => stem.to_string(),
        };
        let dir = self.output_dir.join(&test.api);

        ArtifactPaths {
            actual: dir.join(format!("{}-response.json", base)),
            expected: dir.join(format!("{}-expected.json", base)),
            diff: dir.join(format!("{}-diff.json", base)),
        }
    }

    /// Persist a failed fixture
    pub fn persist_failure(
        &self,
        paths: &ArtifactPaths,
        actual: Option<&Value>,
        expected: Option<&Value>,
        builtin_diff: &Value,
    ) -> Result<(), ArtifactError> {
        let mut payload_size = 0;
        if let Some(actual) = actual {
            payload_size += write_json(&paths.actual, actual)?;
        }
        if let Some(expected) = expected {
            payload_size += write_json(&paths.expected, expected)?;
        }

        let external = match &self.diff_tool {
            Some(tool) if payload_size > self.large_payload_threshold && actual.is_some() && expected.is_some() => {
                run_diff_tool(tool, &paths.expected, &paths.actual)
                    .map(|output| json!({ "tool": tool, "output": output }))
            }
            _ => None,
        };

        write_json(&paths.diff, external.as_ref().unwrap_or(builtin_diff)).map(|_| ())
    }

    /// Persist a passing fixture (dump-on-pass)
    pub fn persist_pass(
        &self,
        paths: &ArtifactPaths,
        actual: &Value,
        expected: &Value,
    ) -> Result<(), ArtifactError> {
        write_json(&paths.actual, actual)?;
        write_json(&paths.expected, expected)?;
        Ok(())
    }
}

/// Run `<tool> <expected> <actual>`; `None` falls back to the built-in delta
fn run_diff_tool(tool: &str, expected: &Path, actual: &Path) -> Option<String> {
    let mut parts = tool.split_whitespace();
    let program = parts.next()?;

    debug!("Running diff tool: {} {} {}", tool, expected.display(), actual.display());
    let output = match Command::new(program).args(parts).arg(expected).arg(actual).output() {
        Ok(output) => output,
        Err(e) => {
            warn!("Diff tool {} failed to start: {}", program, e);
            return None;
        }
    };

    // diff-style tools exit 1 when the inputs differ
    match output.status.code() {
        Some(0) | Some(1) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
        _ => {
            warn!(
                "Diff tool {} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            None
        }
    }
}

/// Pretty-print `value` to `path`, creating the group directory on demand
fn write_json(path: &Path, value: &Value) -> Result<u64, ArtifactError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| ArtifactError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    write_bytes(path, text.as_bytes())
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<u64, ArtifactError> {
    let io_error = |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, bytes).map_err(io_error)?;
    Ok(bytes.len() as u64)
}

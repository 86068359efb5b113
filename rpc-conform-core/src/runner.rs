//! Run controller
//!
//! Walks the selection one test at a time: load fixtures, dispatch, compare,
//! persist artifacts on failure, and apply the abort-vs-continue policy.
//! Nothing runs concurrently, so every artifact belongs to exactly one
//! in-flight fixture.

use crate::artifact::{ArtifactError, ArtifactPaths, ArtifactWriter};
use crate::compare::{compare, render_diff, Comparison, DiffEntry, Outcome};
use crate::config::{ComparisonMode, ErrorPolicy, RunConfig};
use crate::dispatch::{Dispatcher, TransportError};
use crate::fixture::{self, Fixture, FixtureError};
use crate::report::{RunOutcome, RunReport, Reporter, TestRecord};
use crate::select::{SelectError, SelectedTest, Selection};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that end a run
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Fixture(#[from] FixtureError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("Failed to write report: {0}")]
    Report(#[from] io::Error),
}

/// Run counters. One test file counts once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub executed: usize,
    pub not_executed: usize,
    pub success: usize,
    pub failed: usize,
}

impl RunSummary {
    /// Count an executed test
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Pass => {
                self.executed += 1;
                self.success += 1;
            }
            Outcome::Fail => {
                self.executed += 1;
                self.failed += 1;
            }
            Outcome::Skipped => self.not_executed += 1,
        }
    }

    /// Add another summary's counters
    pub fn merge(&mut self, other: &RunSummary) {
        self.executed += other.executed;
        self.not_executed += other.not_executed;
        self.success += other.success;
        self.failed += other.failed;
    }
}

/// Identity of one fixture within the corpus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixtureId {
    pub global_number: usize,
    pub api: String,
    pub file: String,
    /// 0-based position within the container
    pub index: usize,
    pub method: String,
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{} ({})", self.api, self.file, self.index, self.method)
    }
}

/// Verdict for one fixture
#[derive(Debug, Clone)]
pub struct Verdict {
    pub fixture: FixtureId,
    pub outcome: Outcome,
    pub diff: Option<Vec<DiffEntry>>,
    /// Why the fixture failed without a comparison (transport or decode)
    pub reason: Option<String>,
    pub artifacts: Option<ArtifactPaths>,
    pub request: Value,
    pub actual: Option<Value>,
    pub expected: Option<Value>,
}

impl Verdict {
    fn new(test: &SelectedTest, index: usize, fixture: &Fixture) -> Self {
        Self {
            fixture: FixtureId {
                global_number: test.global_number,
                api: test.api.clone(),
                file: test.file_name(),
                index,
                method: fixture.method().unwrap_or_default().to_string(),
            },
            outcome: Outcome::Pass,
            diff: None,
            reason: None,
            artifacts: None,
            request: fixture.request.clone(),
            actual: None,
            expected: None,
        }
    }
}

/// Result of one test file
#[derive(Debug, Clone)]
pub struct TestResult {
    pub test: SelectedTest,
    pub outcome: Outcome,
    pub verdicts: Vec<Verdict>,
    /// Container-level failure (undecodable file)
    pub reason: Option<String>,
    pub duration: Duration,
}

impl TestResult {
    fn new(test: &SelectedTest, verdicts: Vec<Verdict>, reason: Option<String>, duration: Duration) -> Self {
        let failed = reason.is_some() || verdicts.iter().any(|v| v.outcome == Outcome::Fail);
        Self {
            test: test.clone(),
            outcome: if failed { Outcome::Fail } else { Outcome::Pass },
            verdicts,
            reason,
            duration,
        }
    }

    /// First failure reason, for one-line reports
    pub fn failure_reason(&self) -> Option<String> {
        if let Some(reason) = &self.reason {
            return Some(reason.clone());
        }
        let failed = self.verdicts.iter().find(|v| v.outcome == Outcome::Fail)?;
        match (&failed.reason, &failed.diff) {
            (Some(reason), _) => Some(reason.clone()),
            (None, Some(diff)) => Some(format!("{}: {} difference(s)", failed.fixture, diff.len())),
            (None, None) => Some(format!("{}: mismatch", failed.fixture)),
        }
    }
}

/// Drives a selection through dispatch and comparison
pub struct Runner<D: Dispatcher> {
    config: RunConfig,
    dispatcher: D,
    artifacts: ArtifactWriter,
}

impl<D: Dispatcher> Runner<D> {
    pub fn new(config: RunConfig, dispatcher: D) -> Self {
        let artifacts = ArtifactWriter::new(&config);
        Self {
            config,
            dispatcher,
            artifacts,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Execute the selection `loops` times and report through `reporter`
    pub async fn run<W: Write>(
        &self,
        selection: &Selection,
        reporter: &mut Reporter<W>,
    ) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let mut report = RunReport::new(self.config.mode);

        if selection.not_found() {
            let request = selection.request.as_deref().unwrap_or_default();
            warn!("Nothing in the corpus matches {}", request);
            reporter.not_found(request)?;
            report.outcome = RunOutcome::NotFound;
            report.duration = started.elapsed();
            return Ok(report);
        }

        let loops = self.config.loops.max(1);
        let mut summary = RunSummary::default();

        for iteration in 1..=loops {
            if loops > 1 {
                info!("Test iteration {}/{}", iteration, loops);
                reporter.iteration(iteration, loops)?;
            }

            let aborted = match self.run_loop(selection, reporter, &mut summary, &mut report).await {
                Ok(aborted) => aborted,
                Err(e) => {
                    error!("Run interrupted: {}", e);
                    reporter.summary(&summary)?;
                    return Err(e);
                }
            };

            if aborted {
                report.outcome = RunOutcome::Aborted;
                break;
            }

            if self.config.reset_per_loop && iteration < loops {
                reporter.summary(&summary)?;
                report.summaries.push(std::mem::take(&mut summary));
            }
        }

        reporter.summary(&summary)?;
        report.summaries.push(summary);
        report.duration = started.elapsed();
        Ok(report)
    }

    /// One pass over the selection. Returns true when aborted.
    async fn run_loop<W: Write>(
        &self,
        selection: &Selection,
        reporter: &mut Reporter<W>,
        summary: &mut RunSummary,
        report: &mut RunReport,
    ) -> Result<bool, RunError> {
        for test in &selection.items {
            if test.skip {
                summary.record(Outcome::Skipped);
                reporter.skipped(test)?;
                report.records.push(TestRecord::skipped(test));
                continue;
            }

            let result = self.run_test(test).await?;
            summary.record(result.outcome);
            reporter.test(&result)?;
            report.records.push(TestRecord::from(&result));

            if result.outcome == Outcome::Fail && self.config.abort_on_fail {
                error!("Aborting at first failure: {}", test);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run every fixture of one test file
    pub async fn run_test(&self, test: &SelectedTest) -> Result<TestResult, RunError> {
        let started = Instant::now();

        let fixtures = match fixture::load(&test.path) {
            Ok(fixtures) => fixtures,
            Err(e) if e.is_configuration() || self.config.abort_on_fail => return Err(e.into()),
            Err(e) => {
                warn!("{}: {}", test, e);
                return Ok(TestResult::new(test, Vec::new(), Some(e.to_string()), started.elapsed()));
            }
        };

        let multi = fixtures.len() > 1;
        let mut verdicts = Vec::with_capacity(fixtures.len());
        for (index, fixture) in fixtures.iter().enumerate() {
            let verdict = self.run_fixture(test, index, multi, fixture).await?;
            let failed = verdict.outcome == Outcome::Fail;
            verdicts.push(verdict);
            if failed && self.config.abort_on_fail {
                break;
            }
        }

        Ok(TestResult::new(test, verdicts, None, started.elapsed()))
    }

    async fn run_fixture(
        &self,
        test: &SelectedTest,
        index: usize,
        multi: bool,
        fixture: &Fixture,
    ) -> Result<Verdict, RunError> {
        let mut verdict = Verdict::new(test, index, fixture);
        let paths = self.artifacts.paths(test, multi.then_some(index));
        let method = verdict.fixture.method.clone();
        let endpoints = &self.config.endpoints;

        let primary = !(self.config.mode == ComparisonMode::SingleTarget && self.config.use_reference);
        let actual = match self.dispatcher.send(&endpoints.url_for(&method, primary), &fixture.request).await {
            Ok(response) => response,
            Err(e) => return self.record_error(verdict, &paths, e.into(), self.config.transport_errors),
        };

        let expected = match self.config.mode {
            ComparisonMode::SingleTarget => match &fixture.response {
                Some(expected) => expected.clone(),
                None => {
                    verdict.actual = Some(actual);
                    let err = FixtureError::MissingResponse {
                        path: test.path.clone(),
                        index,
                    };
                    return self.record_error(verdict, &paths, err.into(), self.decode_policy());
                }
            },
            ComparisonMode::CrossCompare => {
                match self.dispatcher.send(&endpoints.url_for(&method, false), &fixture.request).await {
                    Ok(response) => response,
                    Err(e) => {
                        verdict.actual = Some(actual);
                        return self.record_error(verdict, &paths, e.into(), self.config.reference_errors);
                    }
                }
            }
        };

        let comparison = if self.config.is_uncompared(&test.api) {
            debug!("{}: content not compared for {}", verdict.fixture, test.api);
            Comparison::pass()
        } else {
            compare(&actual, &expected)
        };

        match comparison.outcome {
            Outcome::Fail => {
                let diff = comparison.diff.unwrap_or_default();
                self.artifacts
                    .persist_failure(&paths, Some(&actual), Some(&expected), &render_diff(&diff))?;
                debug!("{}: {} difference(s)", verdict.fixture, diff.len());
                verdict.outcome = Outcome::Fail;
                verdict.diff = Some(diff);
                verdict.artifacts = Some(paths);
            }
            _ if self.config.dump_on_pass => {
                self.artifacts.persist_pass(&paths, &actual, &expected)?;
                verdict.artifacts = Some(paths);
            }
            _ => {}
        }

        verdict.actual = Some(actual);
        verdict.expected = Some(expected);
        Ok(verdict)
    }

    /// Decode failures follow the abort-vs-continue policy
    fn decode_policy(&self) -> ErrorPolicy {
        if self.config.abort_on_fail {
            ErrorPolicy::Abort
        } else {
            ErrorPolicy::RecordFailure
        }
    }

    /// Propagate `err`, or turn it into a failed verdict with a reason
    fn record_error(
        &self,
        mut verdict: Verdict,
        paths: &ArtifactPaths,
        err: RunError,
        policy: ErrorPolicy,
    ) -> Result<Verdict, RunError> {
        if policy == ErrorPolicy::Abort {
            return Err(err);
        }

        let reason = err.to_string();
        warn!("{}: {}", verdict.fixture, reason);
        self.artifacts.persist_failure(
            paths,
            verdict.actual.as_ref(),
            verdict.expected.as_ref(),
            &json!({ "reason": reason }),
        )?;

        verdict.outcome = Outcome::Fail;
        verdict.reason = Some(reason);
        verdict.artifacts = Some(paths.clone());
        Ok(verdict)
    }
}

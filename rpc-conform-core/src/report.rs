//! Run reporting
//!
//! `Reporter` prints human-readable progress and the final tally.
//! `RunReport` collects everything machine-readable about a run and renders
//! it as a JSON summary or a JUnit suite.

use crate::compare::Outcome;
use crate::config::ComparisonMode;
use crate::runner::{RunSummary, TestResult, Verdict};
use crate::select::SelectedTest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{self, Write};
use std::time::Duration;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Stopped at the first failure
    Aborted,
    /// The requested API or test number does not exist
    NotFound,
}

/// Per-test line of the machine-readable report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRecord {
    pub global_number: usize,
    pub api: String,
    pub file: String,
    pub outcome: Outcome,
    pub fixtures: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
}

impl TestRecord {
    pub fn skipped(test: &SelectedTest) -> Self {
        Self {
            global_number: test.global_number,
            api: test.api.clone(),
            file: test.file_name(),
            outcome: Outcome::Skipped,
            fixtures: 0,
            duration_ms: 0,
            reason: None,
            artifacts: Vec::new(),
        }
    }

    fn name(&self) -> String {
        format!("{}/{}", self.api, self.file)
    }
}

impl From<&TestResult> for TestRecord {
    fn from(result: &TestResult) -> Self {
        let artifacts = result
            .verdicts
            .iter()
            .filter(|v| v.outcome == Outcome::Fail)
            .filter_map(|v| v.artifacts.as_ref())
            .map(|paths| paths.diff.display().to_string())
            .collect();

        Self {
            global_number: result.test.global_number,
            api: result.test.api.clone(),
            file: result.test.file_name(),
            outcome: result.outcome,
            fixtures: result.verdicts.len(),
            duration_ms: result.duration.as_millis() as u64,
            reason: result.failure_reason(),
            artifacts,
        }
    }
}

/// Everything known about a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub mode: ComparisonMode,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// One summary per loop with `reset_per_loop`, otherwise a single one
    pub summaries: Vec<RunSummary>,
    pub records: Vec<TestRecord>,
}

impl RunReport {
    pub fn new(mode: ComparisonMode) -> Self {
        Self {
            outcome: RunOutcome::Completed,
            mode,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            summaries: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Counters over all loops
    pub fn total(&self) -> RunSummary {
        let mut total = RunSummary::default();
        for summary in &self.summaries {
            total.merge(summary);
        }
        total
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Completed => 0,
            RunOutcome::Aborted | RunOutcome::NotFound => 1,
        }
    }

    /// Machine-readable summary
    pub fn to_json(&self) -> Value {
        let mode = match self.mode {
            ComparisonMode::SingleTarget => "single_target",
            ComparisonMode::CrossCompare => "cross_compare",
        };

        json!({
            "outcome": self.outcome,
            "mode": mode,
            "started_at": self.started_at.to_rfc3339(),
            "duration_ms": self.duration.as_millis() as u64,
            "summary": self.total(),
            "loops": self.summaries,
            "tests": self.records,
        })
    }

    /// Export as JUnit XML
    pub fn to_junit_xml(&self) -> String {
        let total = self.total();
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuite name=\"rpc-conform\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" errors=\"0\" time=\"{:.3}\" timestamp=\"{}\">\n",
            self.records.len(),
            total.failed,
            total.not_executed,
            self.duration.as_secs_f64(),
            self.started_at.format("%Y-%m-%dT%H:%M:%S"),
        ));

        for record in &self.records {
            xml.push_str(&format!(
                "  <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\"",
                escape(&record.api),
                escape(&record.name()),
                record.duration_ms as f64 / 1000.0
            ));

            match record.outcome {
                Outcome::Pass => xml.push_str(" />\n"),
                Outcome::Skipped => xml.push_str(">\n    <skipped/>\n  </testcase>\n"),
                Outcome::Fail => {
                    let msg = record.reason.as_deref().unwrap_or("mismatch");
                    xml.push_str(">\n");
                    xml.push_str(&format!("    <failure message=\"{}\"/>\n", escape(msg)));
                    xml.push_str("  </testcase>\n");
                }
            }
        }

        xml.push_str("</testsuite>\n");
        xml
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Human-readable run output
pub struct Reporter<W: Write> {
    out: W,
    verbose: bool,
}

impl Reporter<io::Stdout> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(io::stdout(), verbose)
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self { out, verbose }
    }

    pub fn iteration(&mut self, iteration: usize, loops: usize) -> io::Result<()> {
        writeln!(self.out, "\nTest iteration {}/{}", iteration, loops)
    }

    pub fn skipped(&mut self, test: &SelectedTest) -> io::Result<()> {
        if self.verbose {
            writeln!(self.out, "{} ... skipped", test)?;
        }
        Ok(())
    }

    /// One line per test, or full detail in verbose mode
    pub fn test(&mut self, result: &TestResult) -> io::Result<()> {
        let status = match result.outcome {
            Outcome::Pass => "OK",
            Outcome::Fail => "FAILED",
            Outcome::Skipped => "skipped",
        };

        if !self.verbose {
            return writeln!(self.out, "{} ... {}", result.test, status);
        }

        writeln!(self.out, "{}", result.test)?;
        if let Some(reason) = &result.reason {
            writeln!(self.out, "  {}", reason)?;
        }
        for verdict in &result.verdicts {
            self.verdict(verdict)?;
        }
        writeln!(
            self.out,
            "  => {} ({} ms)",
            status,
            result.duration.as_millis()
        )
    }

    fn verdict(&mut self, verdict: &Verdict) -> io::Result<()> {
        writeln!(self.out, "  fixture {}", verdict.fixture)?;
        writeln!(self.out, "    request:  {}", verdict.request)?;
        if verdict.outcome != Outcome::Fail {
            return writeln!(self.out, "    verdict:  pass");
        }

        writeln!(self.out, "    verdict:  fail")?;
        if let Some(reason) = &verdict.reason {
            writeln!(self.out, "    reason:   {}", reason)?;
        }
        if let Some(expected) = &verdict.expected {
            writeln!(self.out, "    expected: {}", expected)?;
        }
        if let Some(actual) = &verdict.actual {
            writeln!(self.out, "    actual:   {}", actual)?;
        }
        if let Some(diff) = &verdict.diff {
            for entry in diff {
                writeln!(self.out, "      {}", entry)?;
            }
        }
        Ok(())
    }

    /// Final tally
    pub fn summary(&mut self, summary: &RunSummary) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "Number of executed tests:     {}", summary.executed)?;
        writeln!(self.out, "Number of NOT executed tests: {}", summary.not_executed)?;
        writeln!(self.out, "Number of success tests:      {}", summary.success)?;
        writeln!(self.out, "Number of failed tests:       {}", summary.failed)?;
        self.out.flush()
    }

    /// Replaces the tally when the requested test does not exist
    pub fn not_found(&mut self, request: &str) -> io::Result<()> {
        writeln!(self.out, "ERROR: test not found: {}", request)?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{DiffEntry, DiffKind};
    use crate::runner::FixtureId;
    use std::path::PathBuf;

    fn selected(number: usize, file: &str) -> SelectedTest {
        SelectedTest {
            global_number: number,
            api: "eth_getBalance".to_string(),
            local_number: number,
            path: PathBuf::from(format!("json/eth_getBalance/{}", file)),
            skip: false,
        }
    }

    fn failed_result() -> TestResult {
        let test = selected(2, "test_02.json");
        TestResult {
            test: test.clone(),
            outcome: Outcome::Fail,
            verdicts: vec![Verdict {
                fixture: FixtureId {
                    global_number: 2,
                    api: test.api.clone(),
                    file: test.file_name(),
                    index: 0,
                    method: "eth_getBalance".to_string(),
                },
                outcome: Outcome::Fail,
                diff: Some(vec![DiffEntry {
                    path: "result".to_string(),
                    kind: DiffKind::Changed,
                    expected: Some(json!("0x1")),
                    actual: Some(json!("0x0")),
                }]),
                reason: None,
                artifacts: None,
                request: json!({"method": "eth_getBalance"}),
                actual: Some(json!({"result": "0x0"})),
                expected: Some(json!({"result": "0x1"})),
            }],
            reason: None,
            duration: Duration::from_millis(12),
        }
    }

    fn output(reporter: Reporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn test_quiet_line_per_test() {
        let mut reporter = Reporter::new(Vec::new(), false);
        reporter.test(&failed_result()).unwrap();
        reporter.skipped(&selected(3, "test_03.json")).unwrap();
        assert_eq!(output(reporter), "[2.002] eth_getBalance/test_02.json ... FAILED\n");
    }

    #[test]
    fn test_verbose_shows_payloads_and_diff() {
        let mut reporter = Reporter::new(Vec::new(), true);
        reporter.test(&failed_result()).unwrap();
        let text = output(reporter);
        assert!(text.contains("request:  {\"method\":\"eth_getBalance\"}"));
        assert!(text.contains("expected: {\"result\":\"0x1\"}"));
        assert!(text.contains("~ result: \"0x1\" -> \"0x0\""));
        assert!(text.contains("=> FAILED"));
    }

    #[test]
    fn test_summary_lines() {
        let mut reporter = Reporter::new(Vec::new(), false);
        let summary = RunSummary { executed: 3, not_executed: 1, success: 2, failed: 1 };
        reporter.summary(&summary).unwrap();
        let text = output(reporter);
        assert!(text.contains("Number of executed tests:     3"));
        assert!(text.contains("Number of NOT executed tests: 1"));
        assert!(text.contains("Number of success tests:      2"));
        assert!(text.contains("Number of failed tests:       1"));
    }

    #[test]
    fn test_not_found_has_no_tally() {
        let mut reporter = Reporter::new(Vec::new(), false);
        reporter.not_found("API net_version, test 2").unwrap();
        let text = output(reporter);
        assert!(text.contains("test not found: API net_version, test 2"));
        assert!(!text.contains("Number of"));
    }

    #[test]
    fn test_report_json_and_exit_code() {
        let mut report = RunReport::new(ComparisonMode::CrossCompare);
        report.summaries.push(RunSummary { executed: 1, not_executed: 0, success: 0, failed: 1 });
        report.summaries.push(RunSummary { executed: 1, not_executed: 0, success: 1, failed: 0 });
        report.records.push(TestRecord::from(&failed_result()));
        report.outcome = RunOutcome::Aborted;

        let json = report.to_json();
        assert_eq!(json["outcome"], "aborted");
        assert_eq!(json["mode"], "cross_compare");
        assert_eq!(json["summary"]["executed"], 2);
        assert_eq!(json["loops"].as_array().unwrap().len(), 2);
        assert_eq!(json["tests"][0]["outcome"], "fail");
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_junit_xml() {
        let mut report = RunReport::new(ComparisonMode::SingleTarget);
        report.summaries.push(RunSummary { executed: 1, not_executed: 1, success: 0, failed: 1 });
        report.records.push(TestRecord::from(&failed_result()));
        report.records.push(TestRecord::skipped(&selected(3, "test_03.json")));

        let xml = report.to_junit_xml();
        assert!(xml.contains("tests=\"2\""));
        assert!(xml.contains("failures=\"1\""));
        assert!(xml.contains("skipped=\"1\""));
        assert!(xml.contains("name=\"eth_getBalance/test_02.json\""));
        assert!(xml.contains("<skipped/>"));
        assert!(xml.contains("1 difference(s)"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a<b & \"c\">"), "a&lt;b &amp; &quot;c&quot;&gt;");
    }
}

//! RPC Conform - JSON-RPC conformance runner
//!
//! Replays the fixture corpus against a candidate server and reports every
//! response that differs from the stored (or reference) one:
//! - single-target: candidate vs. stored expected responses
//! - `--cross-compare`: candidate vs. live reference server

use clap::{Parser, ValueEnum};
use rpc_conform_core::config::DEFAULT_LARGE_PAYLOAD_THRESHOLD;
use rpc_conform_core::endpoint::{
    DEFAULT_CANDIDATE_PORT, DEFAULT_CONTROL_PORT, DEFAULT_HOST, DEFAULT_REFERENCE_PORT,
};
use rpc_conform_core::{
    select, Endpoints, ErrorPolicy, HttpDispatcher, Reporter, RunConfig, RunReport, Runner,
    SelectionFilter, TestNumber,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "rpc-conform")]
#[command(about = "Differential conformance runner for JSON-RPC servers")]
#[command(version)]
struct Cli {
    /// Run a single API group
    #[arg(short, long)]
    api: Option<String>,

    /// Test number: global without --api, per-API with it; -1 runs all
    #[arg(short, long, default_value = "-1", allow_hyphen_values = true)]
    test: TestNumber,

    /// Comma-separated API groups to skip
    #[arg(short = 'x', long, value_delimiter = ',')]
    exclude_api: Vec<String>,

    /// Comma-separated global test numbers to skip
    #[arg(short = 'X', long, value_delimiter = ',')]
    exclude_test: Vec<usize>,

    /// Verbose report and debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Keep going after a failing test
    #[arg(short = 'c', long = "continue")]
    continue_on_fail: bool,

    /// Dump response/expected files for passing tests too
    #[arg(short, long)]
    dump: bool,

    /// Replay the selection this many times
    #[arg(short, long, default_value = "1")]
    loops: usize,

    /// Report and reset the counters after every loop
    #[arg(long)]
    reset_per_loop: bool,

    /// Fixture corpus root
    #[arg(short = 'b', long, default_value = "./json")]
    corpus: PathBuf,

    /// Artifact output directory
    #[arg(short, long, default_value = "./results")]
    output: PathBuf,

    /// Compare the candidate against the live reference server
    #[arg(short = 'f', long, conflicts_with = "reference")]
    cross_compare: bool,

    /// Send single-target requests to the reference server
    #[arg(short, long)]
    reference: bool,

    /// Host of all servers
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Candidate server port
    #[arg(long, default_value_t = DEFAULT_CANDIDATE_PORT)]
    candidate_port: u16,

    /// Reference server port
    #[arg(long, default_value_t = DEFAULT_REFERENCE_PORT)]
    reference_port: u16,

    /// Control-plane (engine_) port
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    control_port: u16,

    /// Transport timeout (seconds)
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Candidate transport errors: abort the run or record a failure
    #[arg(long, value_enum, default_value_t = PolicyArg::Abort)]
    transport_errors: PolicyArg,

    /// Reference transport errors in cross-compare mode
    #[arg(long, value_enum, default_value_t = PolicyArg::Abort)]
    reference_errors: PolicyArg,

    /// Extra API group whose content is not compared in cross-compare mode
    #[arg(long = "skip-compare-api")]
    skip_compare_api: Vec<String>,

    /// External diff command for large payloads (run as `<cmd> <expected> <actual>`)
    #[arg(long)]
    diff_tool: Option<String>,

    /// Combined payload size (bytes) above which --diff-tool is used
    #[arg(long, default_value_t = DEFAULT_LARGE_PAYLOAD_THRESHOLD)]
    large_payload_threshold: u64,

    /// Write a JSON run report
    #[arg(long)]
    report_file: Option<PathBuf>,

    /// Write a JUnit XML report
    #[arg(long)]
    junit_xml: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PolicyArg {
    /// Stop the run
    Abort,
    /// Record a failed test and continue
    Fail,
}

impl From<PolicyArg> for ErrorPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Abort => ErrorPolicy::Abort,
            PolicyArg::Fail => ErrorPolicy::RecordFailure,
        }
    }
}

impl Cli {
    fn filter(&self) -> SelectionFilter {
        let mut filter = SelectionFilter {
            test_number: self.test,
            ..Default::default()
        };
        if let Some(api) = self.api.as_deref().filter(|a| !a.is_empty()) {
            filter = filter.with_api(api);
        }
        for api in &self.exclude_api {
            filter = filter.excluding_api(api.trim());
        }
        for number in &self.exclude_test {
            filter = filter.excluding_test(*number);
        }
        filter
    }

    fn config(&self) -> RunConfig {
        let endpoints = Endpoints {
            host: self.host.clone(),
            candidate_port: self.candidate_port,
            reference_port: self.reference_port,
            control_port: self.control_port,
        };

        let mut config = RunConfig::new(&self.output)
            .with_endpoints(endpoints)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_loops(self.loops, self.reset_per_loop)
            .with_verbose(self.verbose)
            .with_error_policies(self.transport_errors.into(), self.reference_errors.into());

        if self.cross_compare {
            config = config.cross_compare();
        }
        if self.reference {
            config = config.against_reference();
        }
        if self.continue_on_fail {
            config = config.continue_on_fail();
        }
        if self.dump {
            config = config.with_dump_on_pass();
        }
        for api in &self.skip_compare_api {
            config = config.with_uncompared_api(api);
        }
        if let Some(tool) = &self.diff_tool {
            config = config.with_diff_tool(tool, self.large_payload_threshold);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = cli.config();
    info!(
        "Corpus {} -> candidate {}",
        cli.corpus.display(),
        config.endpoints.url(rpc_conform_core::Target::Candidate)
    );

    let selection = select(&cli.corpus, &cli.filter())?;
    let dispatcher = HttpDispatcher::new(config.timeout)?;
    let runner = Runner::new(config, dispatcher);
    let mut reporter = Reporter::stdout(runner.config().verbose);

    let report = runner.run(&selection, &mut reporter).await?;

    if let Some(path) = &cli.report_file {
        write_report(path, serde_json::to_string_pretty(&report.to_json())?)?;
        info!("Report written to: {}", path.display());
    }
    if let Some(path) = &cli.junit_xml {
        write_report(path, report.to_junit_xml())?;
        info!("JUnit XML written to: {}", path.display());
    }

    exit_with(&report);
    Ok(())
}

fn write_report(path: &Path, contents: String) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}

fn exit_with(report: &RunReport) {
    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
}

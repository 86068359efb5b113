//! Configuration for a conformance run
//!
//! Combines endpoint addresses, comparison mode, failure policy and
//! artifact settings.

use crate::endpoint::Endpoints;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// API groups whose content is not compared in cross-compare mode. Their
/// answers legitimately differ between two independently running servers.
pub const DEFAULT_UNCOMPARED_APIS: &[&str] = &[
    "admin_nodeInfo",
    "admin_peers",
    "erigon_nodeInfo",
    "net_peerCount",
    "txpool_content",
    "txpool_status",
];

/// Default payload size above which the external diff tool is used
pub const DEFAULT_LARGE_PAYLOAD_THRESHOLD: u64 = 1024 * 1024;

/// How verdicts are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComparisonMode {
    /// Live candidate response against the stored expected response
    #[default]
    SingleTarget,
    /// Live candidate response against a live reference response
    CrossCompare,
}

/// What to do when a transport call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Stop the run and exit non-zero
    #[default]
    Abort,
    /// Record a failed test and continue
    RecordFailure,
}

/// Complete run configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub endpoints: Endpoints,

    /// Transport timeout for every request
    pub timeout: Duration,

    pub mode: ComparisonMode,

    /// Single-target runs query the reference server instead of the candidate
    pub use_reference: bool,

    /// Stop at the first failing fixture
    pub abort_on_fail: bool,

    /// Write response/expected artifacts for passing fixtures too
    pub dump_on_pass: bool,

    /// Number of times the whole selection is replayed
    pub loops: usize,

    /// Start every loop with fresh counters instead of accumulating
    pub reset_per_loop: bool,

    /// Verbose per-fixture output
    pub verbose: bool,

    /// Root of the artifact tree
    pub output_dir: PathBuf,

    /// Candidate-side transport failures
    pub transport_errors: ErrorPolicy,

    /// Reference-side transport failures in cross-compare mode
    pub reference_errors: ErrorPolicy,

    /// API groups exempt from content comparison in cross-compare mode
    pub uncompared_apis: BTreeSet<String>,

    /// External diff command for large payloads
    pub diff_tool: Option<String>,

    /// Size (bytes, expected + actual) above which `diff_tool` is used
    pub large_payload_threshold: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            timeout: crate::dispatch::DEFAULT_TIMEOUT,
            mode: ComparisonMode::SingleTarget,
            use_reference: false,
            abort_on_fail: true,
            dump_on_pass: false,
            loops: 1,
            reset_per_loop: false,
            verbose: false,
            output_dir: PathBuf::from("./results"),
            transport_errors: ErrorPolicy::Abort,
            reference_errors: ErrorPolicy::Abort,
            uncompared_apis: DEFAULT_UNCOMPARED_APIS.iter().map(|s| s.to_string()).collect(),
            diff_tool: None,
            large_payload_threshold: DEFAULT_LARGE_PAYLOAD_THRESHOLD,
        }
    }
}

impl RunConfig {
    /// Create config writing artifacts below `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    /// Set endpoint addresses
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set transport timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Compare candidate against reference instead of stored responses
    pub fn cross_compare(mut self) -> Self {
        self.mode = ComparisonMode::CrossCompare;
        self
    }

    /// Single-target runs go to the reference server
    pub fn against_reference(mut self) -> Self {
        self.use_reference = true;
        self
    }

    /// Keep going after failures
    pub fn continue_on_fail(mut self) -> Self {
        self.abort_on_fail = false;
        self
    }

    /// Dump artifacts for passing fixtures as well
    pub fn with_dump_on_pass(mut self) -> Self {
        self.dump_on_pass = true;
        self
    }

    /// Replay the selection `loops` times
    pub fn with_loops(mut self, loops: usize, reset_per_loop: bool) -> Self {
        self.loops = loops.max(1);
        self.reset_per_loop = reset_per_loop;
        self
    }

    /// Verbose per-fixture output
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set transport failure policies
    pub fn with_error_policies(mut self, transport: ErrorPolicy, reference: ErrorPolicy) -> Self {
        self.transport_errors = transport;
        self.reference_errors = reference;
        self
    }

    /// Exempt another API group from cross-compare content checks
    pub fn with_uncompared_api(mut self, api: impl Into<String>) -> Self {
        self.uncompared_apis.insert(api.into());
        self
    }

    /// Route large payload diffs through an external command
    pub fn with_diff_tool(mut self, command: impl Into<String>, threshold: u64) -> Self {
        self.diff_tool = Some(command.into());
        self.large_payload_threshold = threshold;
        self
    }

    /// Whether `api` skips content comparison in this run
    pub fn is_uncompared(&self, api: &str) -> bool {
        self.mode == ComparisonMode::CrossCompare && self.uncompared_apis.contains(api)
    }
}

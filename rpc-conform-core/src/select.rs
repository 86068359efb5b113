//! Test selection over a corpus tree
//!
//! The corpus is `<root>/<api>/<test file>`. Every test file gets a global
//! number (1..N across the whole corpus, groups and files in sorted order)
//! and a local number (1..n within its group). Numbering never depends on
//! the filter, so "test 37" names the same file on every run.

use crate::fixture::is_fixture_file;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors from corpus traversal
#[derive(Error, Debug)]
pub enum SelectError {
    #[error("Corpus directory not found: {0}")]
    CorpusMissing(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Which API group to run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ApiFilter {
    #[default]
    All,
    Named(String),
}

impl ApiFilter {
    /// Empty string means every group
    pub fn from_arg(arg: &str) -> Self {
        if arg.is_empty() {
            ApiFilter::All
        } else {
            ApiFilter::Named(arg.to_string())
        }
    }

    fn matches(&self, api: &str) -> bool {
        match self {
            ApiFilter::All => true,
            ApiFilter::Named(name) => name == api,
        }
    }
}

/// Which test number to run. Global without an API filter, local with one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestNumber {
    #[default]
    All,
    Number(usize),
}

impl TestNumber {
    fn matches(&self, number: usize) -> bool {
        match self {
            TestNumber::All => true,
            TestNumber::Number(n) => *n == number,
        }
    }
}

impl FromStr for TestNumber {
    type Err = String;

    /// `-1` (or an empty string) selects every test
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "-1" {
            return Ok(TestNumber::All);
        }
        match s.parse::<usize>() {
            Ok(0) => Err("test numbers start at 1".to_string()),
            Ok(n) => Ok(TestNumber::Number(n)),
            Err(_) => Err(format!("invalid test number: {}", s)),
        }
    }
}

/// User-specified selection
#[derive(Debug, Clone, Default)]
pub struct SelectionFilter {
    pub api: ApiFilter,
    pub test_number: TestNumber,
    pub excluded_apis: BTreeSet<String>,
    pub excluded_tests: BTreeSet<usize>,
}

impl SelectionFilter {
    /// Run a single API group
    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = ApiFilter::Named(api.into());
        self
    }

    /// Run a single test number
    pub fn with_test(mut self, number: usize) -> Self {
        self.test_number = TestNumber::Number(number);
        self
    }

    /// Skip an API group
    pub fn excluding_api(mut self, api: impl Into<String>) -> Self {
        self.excluded_apis.insert(api.into());
        self
    }

    /// Skip a test by global number
    pub fn excluding_test(mut self, global_number: usize) -> Self {
        self.excluded_tests.insert(global_number);
        self
    }

    /// Whether a specific API or test number was asked for
    pub fn is_specific(&self) -> bool {
        self.api != ApiFilter::All || self.test_number != TestNumber::All
    }

    /// Human-readable form of the API/test-number request
    pub fn describe(&self) -> String {
        let api = match &self.api {
            ApiFilter::All => "all APIs".to_string(),
            ApiFilter::Named(name) => format!("API {}", name),
        };
        match self.test_number {
            TestNumber::All => api,
            TestNumber::Number(n) => format!("{}, test {}", api, n),
        }
    }

    /// Inclusion rule, ignoring exclusions
    fn includes(&self, api: &str, global_number: usize, local_number: usize) -> bool {
        match &self.api {
            ApiFilter::All => self.test_number.matches(global_number),
            named => named.matches(api) && self.test_number.matches(local_number),
        }
    }

    fn skips(&self, api: &str, global_number: usize, local_number: usize) -> bool {
        self.excluded_apis.contains(api)
            || self.excluded_tests.contains(&global_number)
            || !self.includes(api, global_number, local_number)
    }
}

/// One API group of the corpus, files in sorted order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusGroup {
    pub api: String,
    pub files: Vec<PathBuf>,
}

/// A numbered test file and its skip decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedTest {
    pub global_number: usize,
    pub api: String,
    pub local_number: usize,
    pub path: PathBuf,
    pub skip: bool,
}

impl SelectedTest {
    /// File name without directories
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for SelectedTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}.{:03}] {}/{}",
            self.global_number,
            self.local_number,
            self.api,
            self.file_name()
        )
    }
}

/// Ordered work list for a run
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub items: Vec<SelectedTest>,
    /// Tests matched by the API/test-number filter, exclusions aside
    pub requested_matches: usize,
    /// Description of a specific request, if one was made
    pub request: Option<String>,
}

impl Selection {
    /// A specific API or test number was requested and nothing matched it
    pub fn not_found(&self) -> bool {
        self.request.is_some() && self.requested_matches == 0
    }

    /// Tests that will execute
    pub fn runnable(&self) -> impl Iterator<Item = &SelectedTest> {
        self.items.iter().filter(|t| !t.skip)
    }

    pub fn skipped(&self) -> usize {
        self.items.iter().filter(|t| t.skip).count()
    }
}

/// Walk `corpus_root` and apply `filter`
pub fn select(corpus_root: &Path, filter: &SelectionFilter) -> Result<Selection, SelectError> {
    let groups = scan(corpus_root)?;
    let selection = plan(&groups, filter);
    debug!(
        "Selected {} of {} tests under {}",
        selection.runnable().count(),
        selection.items.len(),
        corpus_root.display()
    );
    Ok(selection)
}

/// Number the tests of an already-ordered corpus and decide skips
pub fn plan(groups: &[CorpusGroup], filter: &SelectionFilter) -> Selection {
    let mut selection = Selection {
        request: filter.is_specific().then(|| filter.describe()),
        ..Default::default()
    };
    let mut global_number = 0;

    for group in groups {
        for (index, path) in group.files.iter().enumerate() {
            global_number += 1;
            let local_number = index + 1;

            if filter.includes(&group.api, global_number, local_number) {
                selection.requested_matches += 1;
            }

            selection.items.push(SelectedTest {
                global_number,
                api: group.api.clone(),
                local_number,
                path: path.clone(),
                skip: filter.skips(&group.api, global_number, local_number),
            });
        }
    }

    selection
}

/// Read the corpus layout: sorted group directories, sorted fixture files
pub fn scan(corpus_root: &Path) -> Result<Vec<CorpusGroup>, SelectError> {
    if !corpus_root.is_dir() {
        return Err(SelectError::CorpusMissing(corpus_root.to_path_buf()));
    }

    let mut groups = Vec::new();
    for dir in sorted_entries(corpus_root)? {
        if !dir.is_dir() {
            continue;
        }
        let api = match dir.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        let files = sorted_entries(&dir)?
            .into_iter()
            .filter(|p| p.is_file() && is_fixture_file(p))
            .collect();
        groups.push(CorpusGroup { api, files });
    }

    Ok(groups)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, SelectError> {
    let io_error = |source| SelectError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

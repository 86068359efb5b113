//! RPC Conform Core Library
//!
//! Differential conformance engine for JSON-RPC services. Replays a corpus of
//! request/expected-response fixtures against a candidate server (or against
//! a candidate and a reference server at once) and reports every mismatch.
//!
//! ## Pipeline
//!
//! ```text
//!  corpus/<api>/<test>.json|tar|gz|bz2
//!        │
//!        ▼
//!  ┌───────────┐   ┌──────────┐   ┌────────────┐   ┌────────────┐
//!  │ select    │──►│ fixture  │──►│ endpoint + │──►│ compare    │
//!  │ numbering │   │ loader   │   │ dispatch   │   │ don't-care │
//!  └───────────┘   └──────────┘   └────────────┘   └─────┬──────┘
//!                                                        │
//!                               runner ◄─────────────────┘
//!                                 │ artifacts + RunSummary
//!                                 ▼
//!                               report
//! ```

pub mod artifact;
pub mod compare;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod fixture;
pub mod report;
pub mod runner;
pub mod select;

pub use artifact::{ArtifactError, ArtifactPaths};
pub use compare::{compare, Comparison, DiffEntry, DiffKind, Outcome};
pub use config::{ComparisonMode, ErrorPolicy, RunConfig};
pub use dispatch::{Dispatcher, HttpDispatcher, TransportError};
pub use endpoint::{resolve, Endpoints, Target};
pub use fixture::{Fixture, FixtureError};
pub use report::{Reporter, RunOutcome, RunReport, TestRecord};
pub use runner::{FixtureId, RunError, RunSummary, Runner, TestResult, Verdict};
pub use select::{select, ApiFilter, SelectError, SelectedTest, Selection, SelectionFilter, TestNumber};

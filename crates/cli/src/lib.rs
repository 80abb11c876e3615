//! Command-line front end for Parallax.
//!
//! Loads settings, wires the shared model client into the analysis
//! workflow or the prompt tester, and keeps a history of runs on disk.
//!
//! ```text
//! parallax analyze --document page.md --context "Landing page"
//!    │
//!    ▼
//! ┌──────────┐     ┌────────────────┐     ┌─────────────┐
//! │ Settings │ ──► │ WorkflowEngine │ ──► │ ResultStore │ ──► outputs/
//! └──────────┘     │ PromptTester   │     └─────────────┘
//!                  └────────────────┘
//! ```

pub mod commands;
pub mod report;
pub mod settings;
pub mod store;

pub use commands::{AnalysisOutcome, TestOutcome, ab_test, analyze, load_ground_truth, load_payload};
pub use report::{render_brief, render_test_report};
pub use settings::{DEFAULT_SETTINGS_PATH, Settings};
pub use store::{HistoryEntry, ResultStore, RunKind, SavedRun};

//! Prompt variant A/B testing.
//!
//! ```text
//! VariantCatalog ──▶ PromptTester ──▶ LlmAgent × iterations ──▶ ScoringEngine
//!                                                                   │
//!                          ABTestResult ◀── select_winner ◀── CompositeWeights
//! ```

pub mod catalog;
pub mod composite;
pub mod scoring;
pub mod tester;

pub use catalog::VariantCatalog;
pub use composite::{Candidate, CompositeWeights, select_winner};
pub use scoring::{GroundTruth, ScoringEngine, ScoringLexicon, VariantTrialMetrics};
pub use tester::{ABTestResult, PromptTester, TestPhase, TestRequest, VariantOutcome, Winner};

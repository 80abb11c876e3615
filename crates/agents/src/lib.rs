//! Role-bound analyst agents and the two-phase analysis workflow.
//!
//! ```text
//!                 ┌──────────────┐
//!   payload ─────▶│ WorkflowEngine│
//!                 └──────┬───────┘
//!        Phase 1 (concurrent)     │
//!    ┌──────────┬─────────┴┬──────────┐
//!    ▼          ▼          ▼          │
//! strategic  audience   skeptical     │
//!  analyst   evaluator    buyer       │
//!    └──────────┴────┬─────┘          │
//!                    ▼ successful outputs only
//!        Phase 2  brief_synthesizer ──▶ WorkflowResult
//! ```
//!
//! Every agent shares one [`parallax_llm::LlmClient`], so the client's
//! concurrency cap bounds the whole run.

pub mod agent;
pub mod parser;
pub mod roster;
pub mod workflow;

pub use agent::{Agent, LlmAgent, render_user_content};
pub use parser::{ParsedOutput, display_label, normalize_label, parse_output};
pub use workflow::{WorkflowEngine, WorkflowResult, render_analyses};

//! Common types shared across Parallax crates.
//!
//! This crate holds the data model every other crate speaks: agent
//! configs, prompt variants, input payloads, per-call results and the
//! error taxonomy.

pub mod config;
pub mod error;
pub mod payload;
pub mod result;

pub use config::{AgentConfig, PromptVariant};
pub use error::{ErrorKind, ErrorRecord, ParallaxError, Result};
pub use payload::InputPayload;
pub use result::{AgentInvocationResult, RAW_RESPONSE_FIELD};

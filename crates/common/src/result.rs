//! Per-call result records.

use crate::{ErrorKind, ErrorRecord, ParallaxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Catch-all output field holding the unparsed response text.
pub const RAW_RESPONSE_FIELD: &str = "raw_response";

/// Outcome of one agent call.
///
/// `output` is present exactly when `success` is true and `error` exactly
/// when it is false. Build values with [`AgentInvocationResult::succeeded`]
/// or [`AgentInvocationResult::failed`] to keep that pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInvocationResult {
    /// Name of the agent config that produced this result.
    pub agent: String,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<BTreeMap<String, String>>,

    /// False when the response did not contain every declared field.
    #[serde(default)]
    pub fully_parsed: bool,

    #[serde(default)]
    pub raw_response: String,

    /// Wall-clock seconds for the call, retries included.
    pub execution_time: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,

    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl AgentInvocationResult {
    pub fn succeeded(
        agent: impl Into<String>,
        model: impl Into<String>,
        raw_response: impl Into<String>,
        output: BTreeMap<String, String>,
        fully_parsed: bool,
    ) -> Self {
        Self {
            agent: agent.into(),
            success: true,
            output: Some(output),
            fully_parsed,
            raw_response: raw_response.into(),
            execution_time: 0.0,
            tokens_used: None,
            model: model.into(),
            error: None,
        }
    }

    pub fn failed(agent: impl Into<String>, model: impl Into<String>, error: &ParallaxError) -> Self {
        Self::failed_with(agent, model, error.to_record())
    }

    pub fn failed_with(
        agent: impl Into<String>,
        model: impl Into<String>,
        error: ErrorRecord,
    ) -> Self {
        Self {
            agent: agent.into(),
            success: false,
            output: None,
            fully_parsed: false,
            raw_response: String::new(),
            execution_time: 0.0,
            tokens_used: None,
            model: model.into(),
            error: Some(error),
        }
    }

    /// Placeholder for a call abandoned by cancellation.
    pub fn cancelled(agent: impl Into<String>, model: impl Into<String>) -> Self {
        Self::failed_with(
            agent,
            model,
            ErrorRecord::new(ErrorKind::Cancelled, "call abandoned before completion"),
        )
    }

    pub fn timed(mut self, elapsed: Duration) -> Self {
        self.execution_time = elapsed.as_secs_f64();
        self
    }

    pub fn with_tokens(mut self, tokens: Option<u32>) -> Self {
        self.tokens_used = tokens;
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Parsed value of a field, if the call succeeded and produced it.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.output.as_ref()?.get(name).map(String::as_str)
    }

    /// Declared fields only, skipping the catch-all raw text.
    pub fn structured_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.output
            .iter()
            .flat_map(|o| o.iter())
            .filter(|(k, _)| k.as_str() != RAW_RESPONSE_FIELD)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("key_strength".to_string(), "Clear timeline".to_string()),
            (RAW_RESPONSE_FIELD.to_string(), "KEY STRENGTH: Clear timeline".to_string()),
        ])
    }

    #[test]
    fn success_has_output_and_no_error() {
        let result = AgentInvocationResult::succeeded(
            "strategic_analyst",
            "claude-sonnet-4-20250514",
            "KEY STRENGTH: Clear timeline",
            output(),
            true,
        )
        .timed(Duration::from_millis(1500))
        .with_tokens(Some(420));

        assert!(result.success);
        assert!(result.output.is_some());
        assert!(result.error.is_none());
        assert_eq!(result.field("key_strength"), Some("Clear timeline"));
        assert!((result.execution_time - 1.5).abs() < 1e-9);
        assert_eq!(result.tokens_used, Some(420));
    }

    #[test]
    fn failure_has_error_and_no_output() {
        let err = ParallaxError::Timeout("after 30000ms".into());
        let result = AgentInvocationResult::failed("audience_evaluator", "m", &err)
            .timed(Duration::from_secs(30));

        assert!(!result.success);
        assert!(result.output.is_none());
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(result.field("anything"), None);
        assert!(result.execution_time >= 30.0);
    }

    #[test]
    fn cancelled_result_is_a_failure() {
        let result = AgentInvocationResult::cancelled("skeptical_buyer", "m");
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    }

    #[test]
    fn structured_fields_skip_raw_response() {
        let result = AgentInvocationResult::succeeded("a", "m", "raw", output(), true);
        let fields: Vec<_> = result.structured_fields().collect();
        assert_eq!(fields, vec![("key_strength", "Clear timeline")]);
    }

    #[test]
    fn failure_serializes_without_output() {
        let err = ParallaxError::Auth("401".into());
        let json = serde_json::to_value(AgentInvocationResult::failed("a", "m", &err)).unwrap();
        assert!(json.get("output").is_none());
        assert_eq!(json["error"]["kind"], "auth");
        assert_eq!(json["success"], false);
    }
}

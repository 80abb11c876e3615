//! The agent seam and its model-backed implementation.

use async_trait::async_trait;
use parallax_common::{AgentConfig, AgentInvocationResult, InputPayload, Result};
use parallax_llm::{LlmClient, LlmRequest};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::parser::{display_label, parse_output};

/// A role-bound transformation from input payload to structured result.
///
/// `run` never returns an error: failures are captured in the result so a
/// workflow can aggregate them alongside successes.
#[async_trait]
pub trait Agent: Send + Sync {
    fn config(&self) -> &AgentConfig;

    fn name(&self) -> &str {
        &self.config().name
    }

    async fn run(&self, payload: &InputPayload) -> AgentInvocationResult;
}

/// Agent that calls a text-generation model and parses its reply.
pub struct LlmAgent {
    config: AgentConfig,
    client: Arc<dyn LlmClient>,
}

impl LlmAgent {
    pub fn new(config: AgentConfig, client: Arc<dyn LlmClient>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, client })
    }

    pub fn build_request(&self, payload: &InputPayload) -> LlmRequest {
        LlmRequest::new(
            self.config.model_id.clone(),
            self.config.system_prompt.clone(),
            render_user_content(payload, &self.config.output_fields),
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens)
    }
}

/// Context block first, then the document, then the field instruction.
pub fn render_user_content(payload: &InputPayload, fields: &[String]) -> String {
    let mut content = String::new();
    if let Some(context) = &payload.context {
        content.push_str("CONTEXT:\n");
        content.push_str(context.trim());
        content.push_str("\n\n");
    }
    content.push_str("DOCUMENT:\n");
    content.push_str(payload.document.trim());

    if !fields.is_empty() {
        content.push_str(
            "\n\nStructure your response with exactly these sections, each starting on its own line with the label followed by a colon:\n",
        );
        for field in fields {
            content.push_str(&display_label(field));
            content.push_str(":\n");
        }
    }
    content
}

#[async_trait]
impl Agent for LlmAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn run(&self, payload: &InputPayload) -> AgentInvocationResult {
        let started = Instant::now();
        let name = &self.config.name;
        let model = &self.config.model_id;

        if let Err(e) = payload.validate() {
            return AgentInvocationResult::failed(name, model, &e);
        }

        debug!(
            agent = %name,
            model = %model,
            temperature = self.config.temperature,
            "Invoking agent"
        );

        match self.client.complete(self.build_request(payload)).await {
            Ok(response) => {
                let parsed = parse_output(&response.content, &self.config.output_fields);
                if !parsed.fully_parsed {
                    warn!(
                        agent = %name,
                        expected = self.config.output_fields.len(),
                        found = parsed.fields.len().saturating_sub(1),
                        "Agent output only partially parsed"
                    );
                }
                let tokens = response.usage.as_ref().map(|u| u.total());
                debug!(
                    agent = %name,
                    latency_ms = response.latency_ms,
                    tokens = ?tokens,
                    "Agent completed"
                );
                AgentInvocationResult::succeeded(
                    name,
                    model,
                    response.content,
                    parsed.fields,
                    parsed.fully_parsed,
                )
                .with_tokens(tokens)
                .timed(started.elapsed())
            }
            Err(e) => {
                warn!(agent = %name, kind = ?e.kind(), error = %e, "Agent call failed");
                AgentInvocationResult::failed(name, model, &e).timed(started.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_common::{ErrorKind, ParallaxError, RAW_RESPONSE_FIELD};
    use parallax_llm::{LlmResponse, TokenUsage};
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockClient {
        reply: std::result::Result<String, fn() -> ParallaxError>,
        delay: Duration,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl MockClient {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(make: fn() -> ParallaxError) -> Self {
            Self {
                reply: Err(make),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockClient {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            self.seen.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Ok(text) => Ok(LlmResponse {
                    content: text.clone(),
                    model: request.model,
                    usage: Some(TokenUsage {
                        prompt_tokens: 100,
                        completion_tokens: 20,
                    }),
                    finish_reason: Some("end_turn".into()),
                    latency_ms: self.delay.as_millis() as u64,
                }),
                Err(make) => Err(make()),
            }
        }
        fn provider(&self) -> &str {
            "mock"
        }
    }

    fn config() -> AgentConfig {
        AgentConfig::new("strategic_analyst", "test-model", "You are a strategist.")
            .with_temperature(0.4)
            .with_max_tokens(800)
            .with_output_fields(["strategic_assessment", "key_strength"])
    }

    fn payload() -> InputPayload {
        InputPayload::new("Save 40% on cloud costs.")
            .unwrap()
            .with_context("B2B SaaS landing page")
    }

    #[test]
    fn new_rejects_invalid_config() {
        let client: Arc<dyn LlmClient> = Arc::new(MockClient::replying(""));
        let err = LlmAgent::new(config().with_temperature(2.0), client)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn user_content_puts_context_before_document() {
        let content = render_user_content(&payload(), &config().output_fields);
        let ctx = content.find("CONTEXT:\nB2B SaaS landing page").unwrap();
        let doc = content.find("DOCUMENT:\nSave 40% on cloud costs.").unwrap();
        assert!(ctx < doc);
        assert!(content.contains("STRATEGIC ASSESSMENT:"));
        assert!(content.contains("KEY STRENGTH:"));
    }

    #[test]
    fn user_content_without_context() {
        let payload = InputPayload::new("Doc").unwrap();
        let content = render_user_content(&payload, &[]);
        assert_eq!(content, "DOCUMENT:\nDoc");
    }

    #[tokio::test]
    async fn request_carries_config_parameters() {
        let client = Arc::new(MockClient::replying("STRATEGIC ASSESSMENT: ok"));
        let agent = LlmAgent::new(config(), client.clone()).unwrap();
        agent.run(&payload()).await;

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model, "test-model");
        assert_eq!(seen[0].system_prompt, "You are a strategist.");
        assert!((seen[0].temperature - 0.4).abs() < f32::EPSILON);
        assert_eq!(seen[0].max_tokens, 800);
    }

    #[tokio::test]
    async fn successful_run_parses_fields() {
        let client = Arc::new(MockClient::replying(
            "STRATEGIC ASSESSMENT: Clear value.\nKEY STRENGTH: Concrete savings.",
        ));
        let agent = LlmAgent::new(config(), client).unwrap();
        let result = agent.run(&payload()).await;

        assert!(result.success);
        assert!(result.fully_parsed);
        assert!(result.error.is_none());
        assert_eq!(result.agent, "strategic_analyst");
        assert_eq!(result.model, "test-model");
        assert_eq!(result.field("key_strength"), Some("Concrete savings."));
        assert_eq!(result.tokens_used, Some(120));
        assert!(result.field(RAW_RESPONSE_FIELD).is_some());
    }

    #[tokio::test]
    async fn unparseable_output_is_still_success() {
        let client = Arc::new(MockClient::replying("Looks fine to me."));
        let agent = LlmAgent::new(config(), client).unwrap();
        let result = agent.run(&payload()).await;

        assert!(result.success);
        assert!(!result.fully_parsed);
        assert_eq!(result.structured_fields().count(), 0);
        assert_eq!(result.raw_response, "Looks fine to me.");
    }

    #[tokio::test]
    async fn client_failure_is_captured() {
        let client = Arc::new(MockClient::failing(|| {
            ParallaxError::Auth("invalid x-api-key".into())
        }));
        let agent = LlmAgent::new(config(), client).unwrap();
        let result = agent.run(&payload()).await;

        assert!(!result.success);
        assert!(result.output.is_none());
        assert_eq!(result.error_kind(), Some(ErrorKind::Auth));
        assert!(result.execution_time >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn execution_time_is_recorded() {
        let mut mock = MockClient::replying("KEY STRENGTH: fast");
        mock.delay = Duration::from_millis(1500);
        let agent = LlmAgent::new(config(), Arc::new(mock)).unwrap();
        let result = agent.run(&payload()).await;
        assert!(result.execution_time >= 1.5);
    }

    #[tokio::test]
    async fn invalid_payload_is_config_failure() {
        let client = Arc::new(MockClient::replying("unused"));
        let agent = LlmAgent::new(config(), client.clone()).unwrap();
        let bad = InputPayload {
            document: "   ".into(),
            context: None,
        };
        let result = agent.run(&bad).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Config));
        assert!(client.seen.lock().unwrap().is_empty());
    }
}

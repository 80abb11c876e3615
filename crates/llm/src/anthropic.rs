use async_trait::async_trait;
use parallax_common::ParallaxError;
use parallax_common::Result;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::client::{LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
use crate::http::{classify_status, classify_transport};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct AnthropicClient {
    api_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_url: ANTHROPIC_API_URL.to_string(),
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    /// Point the client at a proxy or compatible gateway.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn role_to_string(role: &Role) -> &'static str {
        match role {
            Role::System => "user", // system messages go in the top-level system field
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn build_messages(request: &LlmRequest) -> Vec<AnthropicMessage> {
        request
            .messages
            .iter()
            .filter(|msg| msg.role != Role::System)
            .map(|msg| AnthropicMessage {
                role: Self::role_to_string(&msg.role).to_string(),
                content: vec![AnthropicContent {
                    content_type: "text".to_string(),
                    text: msg.content.clone(),
                }],
            })
            .collect()
    }

    fn build_request_body(request: &LlmRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: request.model.clone(),
            messages: Self::build_messages(request),
            system: request.system_prompt.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    fn parse_response(body: &str, latency_ms: u64) -> Result<LlmResponse> {
        let anthropic_response: AnthropicResponse = serde_json::from_str(body).map_err(|e| {
            ParallaxError::MalformedResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;

        let content = anthropic_response
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(ParallaxError::MalformedResponse(
                "Anthropic response contained no text content".to_string(),
            ));
        }

        Ok(LlmResponse {
            content,
            model: anthropic_response.model,
            usage: anthropic_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
            }),
            finish_reason: anthropic_response.stop_reason,
            latency_ms,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        request.validate()?;
        let started = Instant::now();
        let body = Self::build_request_body(&request);

        let response = self
            .http_client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport("Anthropic", e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body_text = response
            .text()
            .await
            .map_err(|e| classify_transport("Anthropic", e))?;

        if !status.is_success() {
            return Err(classify_status("Anthropic", status, &headers, &body_text));
        }

        Self::parse_response(&body_text, started.elapsed().as_millis() as u64)
    }

    fn provider(&self) -> &str {
        "anthropic"
    }
}

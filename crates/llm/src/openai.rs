use async_trait::async_trait;
use parallax_common::ParallaxError;
use parallax_common::Result;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::client::{LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
use crate::http::{classify_status, classify_transport};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: String,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Client for OpenAI-compatible chat completion endpoints (OpenAI, Ollama,
/// vLLM and friends).
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    fn role_to_string(role: &Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn build_messages(request: &LlmRequest) -> Vec<OpenAiMessage> {
        let mut messages = Vec::new();
        if !request.system_prompt.is_empty() {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(request.system_prompt.clone()),
            });
        }
        for msg in &request.messages {
            messages.push(OpenAiMessage {
                role: Self::role_to_string(&msg.role).to_string(),
                content: Some(msg.content.clone()),
            });
        }
        messages
    }

    fn build_request_body(request: &LlmRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: Self::build_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    fn parse_response(body: &str, latency_ms: u64) -> Result<LlmResponse> {
        let oai_response: OpenAiResponse = serde_json::from_str(body).map_err(|e| {
            ParallaxError::MalformedResponse(format!("Failed to parse OpenAI response: {e}"))
        })?;

        let choice = oai_response.choices.into_iter().next().ok_or_else(|| {
            ParallaxError::MalformedResponse("No choices in OpenAI response".to_string())
        })?;

        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ParallaxError::MalformedResponse("OpenAI choice has no content".to_string())
            })?;

        Ok(LlmResponse {
            content,
            model: oai_response.model,
            usage: oai_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            finish_reason: choice.finish_reason,
            latency_ms,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        request.validate()?;
        let started = Instant::now();
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = Self::build_request_body(&request);

        let mut http_req = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body_text = response
            .text()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;

        if !status.is_success() {
            return Err(classify_status("OpenAI", status, &headers, &body_text));
        }

        Self::parse_response(&body_text, started.elapsed().as_millis() as u64)
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

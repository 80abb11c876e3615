use std::sync::Arc;

use async_trait::async_trait;
use parallax_common::{ParallaxError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anthropic::AnthropicClient;
use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::openai::OpenAiClient;
use crate::retry::{RetryConfig, RetryingClient};

/// Process-wide model backend settings. The model id itself is per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_max_concurrent() -> usize {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            api_url: None,
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests == 0 {
            return Err(ParallaxError::Config(
                "llm.max_concurrent_requests must be at least 1".into(),
            ));
        }
        if self.retry.attempt_timeout_ms == 0 {
            return Err(ParallaxError::Config(
                "llm.retry.attempt_timeout_ms must be positive".into(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ParallaxError::Config(
                "llm.retry.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Environment variable consulted when no key is configured.
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self.provider.as_str() {
            "anthropic" => Some("ANTHROPIC_API_KEY"),
            "openai" => Some("OPENAI_API_KEY"),
            _ => None,
        }
    }

    /// Explicit key first, then the provider's environment variable.
    pub fn resolve_api_key_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                self.api_key_env_var()
                    .and_then(|var| lookup(var))
                    .filter(|k| !k.trim().is_empty())
            })
    }
}

/// Caps the number of outstanding requests across every agent sharing it.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit =
            self.semaphore.acquire().await.map_err(|e| {
                ParallaxError::Cancelled(format!("request limiter closed: {e}"))
            })?;
        self.inner.complete(request).await
    }

    fn provider(&self) -> &str {
        self.inner.provider()
    }
}

/// Build the shared client stack: provider, then retry, then the
/// concurrency cap.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    build_llm_client_with(config, |var| std::env::var(var).ok())
}

pub fn build_llm_client_with<F>(config: &LlmConfig, lookup: F) -> Result<Arc<dyn LlmClient>>
where
    F: Fn(&str) -> Option<String>,
{
    config.validate()?;
    let api_key = config.resolve_api_key_with(lookup);

    let base_client: Box<dyn LlmClient> = match config.provider.as_str() {
        "openai" => Box::new(OpenAiClient::new(config.api_url.clone(), api_key)),
        "anthropic" => {
            let api_key = api_key.ok_or_else(|| {
                ParallaxError::MissingCredential(
                    "Anthropic requires an API key (set ANTHROPIC_API_KEY or llm.api_key)"
                        .to_string(),
                )
            })?;
            let client = AnthropicClient::new(api_key);
            match &config.api_url {
                Some(url) => Box::new(client.with_api_url(url.clone())),
                None => Box::new(client),
            }
        }
        other => {
            return Err(ParallaxError::Config(format!(
                "Unknown LLM provider: {other}"
            )));
        }
    };

    debug!(
        provider = %config.provider,
        max_concurrent = config.max_concurrent_requests,
        max_retries = config.retry.max_retries,
        "Built LLM client"
    );

    let retrying: Box<dyn LlmClient> =
        Box::new(RetryingClient::new(base_client, config.retry.clone()));

    let semaphored = SemaphoredClient::new(Arc::from(retrying), config.max_concurrent_requests);

    Ok(Arc::new(semaphored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_common::ErrorKind;

    const TOML_CONFIG: &str = r#"
provider = "openai"
api_url = "http://localhost:11434"
max_concurrent_requests = 4

[retry]
max_retries = 5
initial_delay_ms = 1000
max_delay_ms = 60000
backoff_multiplier = 3.0
attempt_timeout_ms = 45000
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn deserialize_config_from_toml() {
        let config: LlmConfig = toml::from_str(TOML_CONFIG).unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:11434"));
        assert!(config.api_key.is_none());
        assert_eq!(config.max_concurrent_requests, 4);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.retry.attempt_timeout_ms, 45_000);
    }

    #[test]
    fn deserialize_config_defaults() {
        let config: LlmConfig = toml::from_str(r#"api_key = "sk-ant-test""#).unwrap();
        assert_eq!(config.provider, "anthropic");
        assert_eq!(config.max_concurrent_requests, 2);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay_ms, 500);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = LlmConfig {
            max_concurrent_requests: 0,
            ..LlmConfig::default()
        };
        let err = build_llm_client_with(&config, |_| Some("key".into())).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn explicit_key_wins_over_env() {
        let config = LlmConfig {
            api_key: Some("from-file".into()),
            ..LlmConfig::default()
        };
        let key = config.resolve_api_key_with(|_| Some("from-env".into()));
        assert_eq!(key.as_deref(), Some("from-file"));
    }

    #[test]
    fn env_key_used_when_unset() {
        let config = LlmConfig::default();
        let key = config.resolve_api_key_with(|var| {
            assert_eq!(var, "ANTHROPIC_API_KEY");
            Some("from-env".into())
        });
        assert_eq!(key.as_deref(), Some("from-env"));
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let config = LlmConfig {
            api_key: Some("   ".into()),
            ..LlmConfig::default()
        };
        assert!(config.resolve_api_key_with(no_env).is_none());
    }

    #[test]
    fn build_openai_client_without_key() {
        let config = LlmConfig {
            provider: "openai".to_string(),
            ..LlmConfig::default()
        };
        let client = build_llm_client_with(&config, no_env).unwrap();
        assert_eq!(client.provider(), "openai");
    }

    #[test]
    fn build_anthropic_client() {
        let config = LlmConfig {
            api_key: Some("sk-ant-test".to_string()),
            ..LlmConfig::default()
        };
        let client = build_llm_client_with(&config, no_env).unwrap();
        assert_eq!(client.provider(), "anthropic");
    }

    #[test]
    fn build_anthropic_without_key_is_missing_credential() {
        let err = build_llm_client_with(&LlmConfig::default(), no_env).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);
    }

    #[test]
    fn build_unknown_provider_fails() {
        let config = LlmConfig {
            provider: "gemini".to_string(),
            ..LlmConfig::default()
        };
        let err = build_llm_client_with(&config, no_env).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn semaphored_client_limits_concurrency() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingClient {
            concurrent: Arc<AtomicU32>,
            max_seen: Arc<AtomicU32>,
        }

        #[async_trait]
        impl LlmClient for CountingClient {
            async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
                let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(LlmResponse {
                    content: "ok".to_string(),
                    model: "test".to_string(),
                    usage: None,
                    finish_reason: None,
                    latency_ms: 50,
                })
            }
            fn provider(&self) -> &str {
                "counting"
            }
        }

        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let inner = Arc::new(CountingClient {
            concurrent: concurrent.clone(),
            max_seen: max_seen.clone(),
        });

        let semaphored = Arc::new(SemaphoredClient::new(inner, 2));

        let mut handles = vec![];
        for _ in 0..6 {
            let client = semaphored.clone();
            handles.push(tokio::spawn(async move {
                client.complete(LlmRequest::default()).await.unwrap();
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
        assert_eq!(semaphored.available_permits(), 2);
    }
}

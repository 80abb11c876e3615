use async_trait::async_trait;
use parallax_common::{ParallaxError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::{LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Deadline for a single attempt. Applies per call, never per run.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_attempt_timeout_ms() -> u64 {
    120_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

/// Retries transient failures (rate limits, timeouts, 5xx) with bounded
/// exponential backoff and enforces the per-attempt deadline.
pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetryConfig,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn compute_delay(&self, attempt: u32) -> u64 {
        let base = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter = (base * 0.1 * rand_jitter(attempt)) as u64;
        let delay = (base as u64).saturating_add(jitter);
        delay.min(self.config.max_delay_ms)
    }

    async fn attempt(&self, request: LlmRequest, attempt: u32) -> Result<LlmResponse> {
        let deadline = Duration::from_millis(self.config.attempt_timeout_ms);
        match tokio::time::timeout(deadline, self.inner.complete(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ParallaxError::Timeout(format!(
                "attempt {} exceeded {}ms",
                attempt + 1,
                self.config.attempt_timeout_ms
            ))),
        }
    }
}

/// Deterministic jitter derived from the attempt number.
fn rand_jitter(attempt: u32) -> f64 {
    let x = attempt.wrapping_mul(2654435761);
    (x % 100) as f64 / 100.0
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        request.validate()?;
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            match self.attempt(request.clone(), attempt).await {
                Ok(mut response) => {
                    response.latency_ms = started.elapsed().as_millis() as u64;
                    debug!(
                        model = %response.model,
                        attempts = attempt + 1,
                        latency_ms = response.latency_ms,
                        "LLM request completed"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    if attempt >= self.config.max_retries || !e.is_retryable() {
                        return Err(e);
                    }

                    let delay = e
                        .retry_after_ms()
                        .map(|ms| ms.min(self.config.max_delay_ms))
                        .unwrap_or_else(|| self.compute_delay(attempt));

                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay,
                        error = %e,
                        "Retrying LLM request"
                    );

                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    fn provider(&self) -> &str {
        self.inner.provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_common::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_retry_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.attempt_timeout_ms, 120_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn compute_delay_respects_max() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![]),
            RetryConfig {
                max_retries: 5,
                initial_delay_ms: 500,
                max_delay_ms: 2000,
                backoff_multiplier: 10.0,
                attempt_timeout_ms: 1000,
            },
        );
        assert!(client.compute_delay(5) <= 2000);
    }

    #[test]
    fn compute_delay_grows() {
        let client = RetryingClient::new(ScriptedClient::new(vec![]), RetryConfig::default());
        assert!(client.compute_delay(1) > client.compute_delay(0));
        assert!(client.compute_delay(2) > client.compute_delay(1));
    }

    enum Step {
        Fail(fn() -> ParallaxError),
        Hang,
        Succeed,
    }

    struct ScriptedClient {
        steps: Vec<Step>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.steps.get(n).unwrap_or(&Step::Succeed) {
                Step::Fail(make) => Err(make()),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!("attempt deadline should fire first")
                }
                Step::Succeed => Ok(LlmResponse {
                    content: "ok".to_string(),
                    model: "scripted".to_string(),
                    usage: None,
                    finish_reason: None,
                    latency_ms: 0,
                }),
            }
        }
        fn provider(&self) -> &str {
            "scripted"
        }
    }

    fn rate_limited() -> ParallaxError {
        ParallaxError::RateLimited {
            message: "429".into(),
            retry_after_ms: None,
        }
    }

    fn unauthorized() -> ParallaxError {
        ParallaxError::Auth("401".into())
    }

    fn malformed() -> ParallaxError {
        ParallaxError::MalformedResponse("not json".into())
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
            attempt_timeout_ms: 1_000,
        }
    }

    fn request() -> LlmRequest {
        LlmRequest::new("m", "system", "user").with_temperature(0.2)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_then_succeeds() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![Step::Fail(rate_limited), Step::Fail(rate_limited)]),
            fast_config(3),
        );
        let response = client.complete(request()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_includes_backoff() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![Step::Fail(rate_limited)]),
            fast_config(3),
        );
        let response = client.complete(request()).await.unwrap();
        assert!(response.latency_ms >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_errors_are_not_retried() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![Step::Fail(unauthorized)]),
            fast_config(3),
        );
        let err = client.complete(request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_responses_are_not_retried() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![Step::Fail(malformed)]),
            fast_config(3),
        );
        let err = client.complete(request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![
                Step::Fail(rate_limited),
                Step::Fail(rate_limited),
                Step::Fail(rate_limited),
            ]),
            fast_config(2),
        );
        let err = client.complete(request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_is_retried() {
        let client = RetryingClient::new(ScriptedClient::new(vec![Step::Hang]), fast_config(1));
        let response = client.complete(request()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_timeouts_surface_as_timeout() {
        let client = RetryingClient::new(
            ScriptedClient::new(vec![Step::Hang, Step::Hang]),
            fast_config(1),
        );
        let err = client.complete(request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn invalid_request_is_never_sent() {
        let client = RetryingClient::new(ScriptedClient::new(vec![]), fast_config(3));
        let err = client
            .complete(request().with_temperature(1.5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 0);
    }
}

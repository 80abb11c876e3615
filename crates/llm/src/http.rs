//! Mapping from HTTP outcomes to the typed failure taxonomy.

use parallax_common::ParallaxError;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Turn a non-success response into a typed error.
pub(crate) fn classify_status(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> ParallaxError {
    let message = format!("{provider} API error {status}: {body}");
    match status.as_u16() {
        401 | 403 => ParallaxError::Auth(message),
        429 => ParallaxError::RateLimited {
            message,
            retry_after_ms: parse_retry_after(headers),
        },
        408 | 504 => ParallaxError::Timeout(message),
        code => ParallaxError::Backend {
            status: Some(code),
            message,
        },
    }
}

/// Transport-level failures: timeouts are transient, everything else is
/// reported as a status-less backend error.
pub(crate) fn classify_transport(provider: &str, err: reqwest::Error) -> ParallaxError {
    if err.is_timeout() {
        ParallaxError::Timeout(format!("{provider} request timed out: {err}"))
    } else if err.is_connect() {
        ParallaxError::Backend {
            status: Some(503),
            message: format!("{provider} connection failed: {err}"),
        }
    } else {
        ParallaxError::Backend {
            status: None,
            message: format!("{provider} request failed: {err}"),
        }
    }
}

/// `Retry-After` in whole seconds, converted to milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use tokio::time::sleep;

use crate::error::ApiError;

/// Bounded exponential backoff for outbound HTTP calls.
///
/// Only transport errors and 5xx responses are retried; 4xx responses go back
/// to the caller untouched. The pipeline itself is never retried as a unit.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following attempt `attempt` (1-indexed):
    /// `base_delay * multiplier^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let exponent = attempt.saturating_sub(1) as i32;
        Duration::from_secs_f64(base * self.multiplier.powi(exponent))
    }
}

/// One HTTP client shared by every outbound adapter, carrying the retry
/// policy. Constructed once at startup and injected; there is no process-wide
/// singleton.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            http: Client::new(),
            retry,
        }
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Send a request, retrying transport errors and 5xx responses with
    /// exponential backoff. The final response is returned regardless of
    /// status so callers can map it to their own error kind.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let builder = request.try_clone().ok_or_else(|| {
                ApiError::Upstream("request body cannot be cloned for retry".to_string())
            })?;
            match builder.send().await {
                Ok(response)
                    if response.status().is_server_error()
                        && attempt < self.retry.max_attempts =>
                {
                    tracing::warn!(
                        status = %response.status(),
                        attempt,
                        "upstream returned a server error, retrying"
                    );
                }
                Ok(response) => return Ok(response),
                Err(err) if attempt < self.retry.max_attempts => {
                    tracing::warn!(error = %err, attempt, "upstream request failed, retrying");
                }
                Err(err) => return Err(ApiError::Upstream(err.to_string())),
            }
            sleep(self.retry.delay_for(attempt)).await;
        }
    }
}

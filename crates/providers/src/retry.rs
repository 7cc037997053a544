//! Retry wrapper: bounded retries with linear backoff on transient errors.
//!
//! Only errors classified as transient are retried; fatal ones surface
//! immediately. Once the budget is spent the last error is returned.

use async_trait::async_trait;
use cxloop_core::error::GatewayError;
use cxloop_core::model::{InferenceRequest, ModelGateway, RawModelOutput};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct RetryingGateway {
    inner: Arc<dyn ModelGateway>,
    max_retries: u32,
    backoff: Duration,
}

impl RetryingGateway {
    /// Wrap a gateway. Attempt `n` (1-based) waits `backoff * n` before
    /// retrying, or longer when a rate limit asks for it.
    pub fn new(inner: Arc<dyn ModelGateway>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[async_trait]
impl ModelGateway for RetryingGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn infer(&self, request: InferenceRequest) -> Result<RawModelOutput, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.infer(request.clone()).await {
                Ok(output) => {
                    if attempt > 1 {
                        info!(gateway = %self.inner.name(), attempt, "Retry succeeded");
                    }
                    return Ok(output);
                }
                Err(e) if e.is_transient() && attempt <= self.max_retries => {
                    let delay = retry_delay(&e, self.backoff * attempt);
                    warn!(
                        gateway = %self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient gateway error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn health_check(&self) -> Result<bool, GatewayError> {
        self.inner.health_check().await
    }
}

/// The linear backoff, stretched to the server's `Retry-After` on rate limits.
fn retry_delay(error: &GatewayError, backoff: Duration) -> Duration {
    match error {
        GatewayError::RateLimited { retry_after_secs } => {
            backoff.max(Duration::from_secs(*retry_after_secs))
        }
        _ => backoff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedGateway;
    use cxloop_core::turn::Turn;

    fn request() -> InferenceRequest {
        InferenceRequest {
            history: vec![Turn::user("hello")],
            tools: vec![],
        }
    }

    fn unavailable() -> GatewayError {
        GatewayError::ApiError {
            status_code: 503,
            message: "Service Unavailable".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let inner = Arc::new(ScriptedGateway::from_results(vec![
            Err(unavailable()),
            Err(GatewayError::RateLimited { retry_after_secs: 1 }),
            Ok(RawModelOutput::answer("ok")),
        ]));
        let gateway = RetryingGateway::new(inner.clone(), 2, Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        let output = gateway.infer(request()).await.unwrap();
        assert_eq!(output.text.as_deref(), Some("ok"));
        assert_eq!(inner.call_count(), 3);
        // 100ms after the first failure, then the 1s the rate limit asked for.
        assert!(started.elapsed() >= Duration::from_millis(1100));
    }

    #[test]
    fn rate_limit_delay_is_never_shorter_than_backoff() {
        let backoff = Duration::from_millis(500);
        let limited = |secs| GatewayError::RateLimited { retry_after_secs: secs };
        assert_eq!(retry_delay(&limited(3), backoff), Duration::from_secs(3));
        assert_eq!(retry_delay(&limited(0), backoff), backoff);
        assert_eq!(retry_delay(&unavailable(), backoff), backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let inner = Arc::new(ScriptedGateway::from_results(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
        ]));
        let gateway = RetryingGateway::new(inner.clone(), 1, Duration::from_millis(10));

        let err = gateway.infer(request()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(inner.call_count(), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let inner = Arc::new(ScriptedGateway::from_results(vec![Err(
            GatewayError::AuthenticationFailed("bad key".into()),
        )]));
        let gateway = RetryingGateway::new(inner.clone(), 3, Duration::from_millis(10));

        let err = gateway.infer(request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationFailed(_)));
        assert_eq!(inner.call_count(), 1);
    }
}

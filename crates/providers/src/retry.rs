//! Resilient invoker: classified retry with exponential backoff.
//!
//! Every model call from the orchestration loop goes through
//! [`ResilientInvoker::invoke`]. Retryable failures (overload, rate limiting
//! by default) are retried after `base_delay * multiplier^attempt_index`, or
//! after the service's `retry-after` if that is longer; anything else is
//! returned at once. Counters live on the stack of a single
//! `invoke` call, so separate calls never share retry state.

use chrono::Utc;
use meshloop_config::RetryConfig;
use meshloop_core::error::{ErrorKind, ModelInvocationError, ProviderError};
use meshloop_core::event::{DomainEvent, EventBus};
use meshloop_core::provider::{Provider, ProviderRequest, ProviderResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Predicate deciding whether an error kind is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(ErrorKind) -> bool + Send + Sync>;

/// How many times to call the model service and how long to wait in between.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub is_retryable: RetryPredicate,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier,
            is_retryable: Arc::new(|kind| {
                matches!(kind, ErrorKind::Overloaded | ErrorKind::RateLimited)
            }),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let retry_on = config.retry_on.clone();
        Self {
            is_retryable: Arc::new(move |kind| retry_on.contains(&kind)),
            ..Self::new(config.max_attempts, config.base_delay(), config.multiplier)
        }
    }

    /// Replace the retry predicate.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(ErrorKind) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_retryable = Arc::new(predicate);
        self
    }

    /// Delay before the attempt following `attempt_index` (zero-based).
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("multiplier", &self.multiplier)
            .finish_non_exhaustive()
    }
}

/// Wraps a [`Provider`] with a [`RetryPolicy`].
pub struct ResilientInvoker {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    event_bus: Option<Arc<EventBus>>,
}

impl ResilientInvoker {
    pub fn new(provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            event_bus: None,
        }
    }

    /// Publish a `RetryScheduled` event before every backoff sleep.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Call the model service, retrying transient failures with backoff.
    pub async fn invoke(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ModelInvocationError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(
                provider = %self.provider.name(),
                attempt,
                max_attempts,
                "Invoking model service"
            );

            let error = match self.provider.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !(self.policy.is_retryable)(error.kind()) {
                warn!(attempt, error = %error, "Model call failed with non-retryable error");
                return Err(ModelInvocationError::Fatal {
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt >= max_attempts {
                warn!(
                    attempts = attempt,
                    error = %error,
                    "Model call still failing after final attempt"
                );
                return Err(ModelInvocationError::Transient {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = backoff_delay(&self.policy, attempt - 1, &error);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient model failure, backing off"
            );
            self.publish_retry(attempt, max_attempts, delay, &error);
            tokio::time::sleep(delay).await;
        }
    }

    fn publish_retry(&self, attempt: u32, max_attempts: u32, delay: Duration, error: &ProviderError) {
        if let Some(ref bus) = self.event_bus {
            bus.publish(DomainEvent::RetryScheduled {
                attempt,
                max_attempts,
                delay_ms: delay.as_millis() as u64,
                reason: error.kind().to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}

/// Backoff for `attempt_index`, never shorter than a server-requested `retry-after`.
fn backoff_delay(policy: &RetryPolicy, attempt_index: u32, error: &ProviderError) -> Duration {
    let delay = policy.delay_for(attempt_index);
    match error {
        ProviderError::RateLimited { retry_after_secs } => {
            delay.max(Duration::from_secs(*retry_after_secs))
        }
        _ => delay,
    }
}

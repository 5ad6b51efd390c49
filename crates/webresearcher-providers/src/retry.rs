//! Retry wrapper for LLM providers.
//!
//! Exponential backoff with jitter: attempt `n` (0-indexed) waits
//! `min(base · 2^n + jitter, max_delay)` before the next try.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use webresearcher_core::types::{LlmResponse, Message, ToolDefinition};

use crate::error::ProviderError;
use crate::traits::{LlmProvider, LlmRequestConfig};

/// Backoff parameters.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay before retrying after the given (0-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        exp.saturating_add(jitter).min(self.max_delay)
    }
}

/// Wraps a provider and retries transient failures.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.inner.chat(messages, tools, model, config).await {
                Ok(resp) => return Ok(resp),
                Err(e) if !e.is_retryable() => {
                    warn!(error = %e, "Non-retryable LLM error");
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        warn!(attempts = attempt, error = %e, "LLM retries exhausted");
                        return Err(e);
                    }
                    let delay = self.policy.delay_for_attempt(attempt - 1);
                    debug!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying LLM call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    fn display_name(&self) -> &str {
        self.inner.display_name()
    }
}

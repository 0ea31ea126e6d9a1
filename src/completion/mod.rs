//! Completion layer: a bounded-retry client over a pluggable generation
//! backend.
//!
//! The client owns the attempt budget, the per-call timeout, and backoff
//! between attempts. Backends perform exactly one generation call and
//! classify their failures as [`CompletionError`] kinds; retry decisions
//! live here, not in the backend.

pub mod gemini;

pub use gemini::{GeminiBackend, GeminiConfig, SafetyThreshold};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::CompletionError;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default nucleus-sampling threshold.
pub const DEFAULT_TOP_P: f32 = 0.95;
/// Default output-length cap in tokens.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;
/// Default per-call timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Full prompt text.
    pub prompt: String,
    /// System instruction. Backends apply their default when `None`.
    pub system_instruction: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_instruction: None,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// A successful completion.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Generated text. May be empty when the backend produced no output
    /// without blocking; an empty completion is still a success.
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A backend capable of one generation call per invocation.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Perform a single generation call. Implementations classify failures
    /// but never retry.
    async fn generate(&self, request: &CompletionRequest)
    -> Result<Completion, CompletionError>;
}

/// Retry policy for completion calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each attempt after that.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the `failed_attempts`-th failed attempt: base, 2x base,
    /// 4x base, and so on.
    fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        let factor = 1u32 << failed_attempts.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor)
    }
}

/// Completion client with a bounded attempt budget.
pub struct CompletionClient {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl CompletionClient {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            policy: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Run a completion request against the backend.
    ///
    /// Transient failures (network, rate limit, timeout) are retried with
    /// exponential backoff until the attempt budget is spent; the last error
    /// is returned. Terminal failures (safety block, malformed request)
    /// return after the first attempt. A timed-out call consumes an attempt
    /// like any other failure, and no backoff follows the final attempt.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Completion, CompletionError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            let outcome = match timeout(self.request_timeout, self.backend.generate(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(CompletionError::Timeout(self.request_timeout)),
            };

            match outcome {
                Ok(completion) => {
                    debug!(
                        attempt,
                        model = self.backend.model_name(),
                        output_tokens = completion.output_tokens,
                        "Completion succeeded"
                    );
                    return Ok(completion);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(attempt, kind = e.kind(), error = %e, "Completion failed terminally");
                    return Err(e);
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        warn!(
                            attempt,
                            kind = e.kind(),
                            error = %e,
                            "Completion failed, attempt budget exhausted"
                        );
                        return Err(e);
                    }
                    let delay = self.policy.backoff_delay(attempt);
                    warn!(
                        attempt,
                        kind = e.kind(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Completion failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

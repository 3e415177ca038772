//! One request/response exchange with a backend, with retry.
//!
//! The invoker owns everything that has to happen around a raw provider call:
//! envelope preparation, dropping decoding parameters the backend refuses in
//! reasoning mode, the per-call deadline, and classified retries.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use turnloop_commons::{BackoffStrategy, ErrorCategory};
use turnloop_config::{BackendConfig, RetryConfig};

use super::backends::BackendSpec;
use super::provider::{LLMError, LLMProvider, LLMRequest, LLMResponse, Message, ToolDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> BackoffStrategy {
        BackoffStrategy::Exponential {
            base: self.base_delay,
            max: self.max_delay,
        }
    }
}

/// Decoding parameters requested for a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationParams {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub parallel_tool_calls: Option<bool>,
}

impl From<&BackendConfig> for InvocationParams {
    fn from(config: &BackendConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            max_tokens: config.max_tokens,
            reasoning_effort: config
                .reasoning_effort
                .clone()
                .filter(|_| config.reasoning_enabled()),
            parallel_tool_calls: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{backend} request failed after {attempts} attempt(s) ({category}): {source}")]
pub struct InvokeError {
    pub backend: String,
    pub category: ErrorCategory,
    pub attempts: u32,
    #[source]
    pub source: LLMError,
}

pub struct BackendInvoker {
    provider: Box<dyn LLMProvider>,
    spec: BackendSpec,
    params: InvocationParams,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl BackendInvoker {
    pub fn new(provider: Box<dyn LLMProvider>, spec: BackendSpec, params: InvocationParams) -> Self {
        Self {
            provider,
            spec,
            params,
            retry: RetryPolicy::default(),
            request_timeout: turnloop_commons::http::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn spec(&self) -> &BackendSpec {
        &self.spec
    }

    pub fn reasoning_mode(&self) -> bool {
        self.params.reasoning_effort.is_some()
    }

    /// Shape the outgoing request: echo envelopes per the backend's policy and
    /// drop parameters it refuses in reasoning mode.
    pub fn build_request(
        &self,
        messages: &[Message],
        tools: Option<Arc<Vec<ToolDefinition>>>,
    ) -> LLMRequest {
        let reasoning_mode = self.reasoning_mode();
        let mut outgoing = messages.to_vec();
        let synthesized = self
            .spec
            .envelope_policy()
            .prepare(&mut outgoing, reasoning_mode);
        if synthesized > 0 {
            debug!(
                backend = self.spec.id,
                placeholders = synthesized,
                "synthesized reasoning envelope placeholders"
            );
        }

        let mut request = LLMRequest {
            messages: outgoing,
            tools,
            model: self.params.model.clone().unwrap_or_default(),
            max_tokens: self.params.max_tokens,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            presence_penalty: self.params.presence_penalty,
            frequency_penalty: self.params.frequency_penalty,
            reasoning_effort: self.params.reasoning_effort.clone(),
            parallel_tool_calls: self.params.parallel_tool_calls,
        };

        if reasoning_mode {
            for param in self.spec.dropped_in_reasoning {
                if request.drop_param(*param) {
                    debug!(
                        backend = self.spec.id,
                        param = param.as_str(),
                        "dropped decoding parameter unsupported in reasoning mode"
                    );
                }
            }
        }

        request
    }

    /// Perform one exchange, retrying transient failures.
    pub async fn invoke(
        &self,
        messages: &[Message],
        tools: Option<Arc<Vec<ToolDefinition>>>,
        cancel: &CancellationToken,
    ) -> Result<LLMResponse, InvokeError> {
        let request = self.build_request(messages, tools);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome =
                tokio::time::timeout(self.request_timeout, self.provider.generate(request.clone()))
                    .await
                    .unwrap_or_else(|_| {
                        Err(LLMError::Timeout {
                            message: format!(
                                "{}: no response within {}s",
                                self.spec.id,
                                self.request_timeout.as_secs()
                            ),
                            metadata: None,
                        })
                    });

            let err = match outcome {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            let category = self.classify(&err);
            if category == ErrorCategory::ProtocolViolation {
                error!(
                    backend = self.spec.id,
                    attempt,
                    error = %err.upstream_message(),
                    "backend rejected the echoed reasoning state; adapter defect"
                );
            }

            if !category.is_retryable() || attempt >= max_attempts {
                return Err(InvokeError {
                    backend: self.spec.id.to_owned(),
                    category,
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.retry_delay(attempt, &err);
            warn!(
                backend = self.spec.id,
                attempt,
                category = %category,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying backend request"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(InvokeError {
                        backend: self.spec.id.to_owned(),
                        category: ErrorCategory::Cancelled,
                        attempts: attempt,
                        source: err,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Category for `err`, recognising this backend's missing-envelope rejection.
    pub fn classify(&self, err: &LLMError) -> ErrorCategory {
        let category = err.category();
        let rejected_request = err
            .status()
            .is_some_and(|status| (400..500).contains(&status) && status != 429);
        if rejected_request
            && self
                .spec
                .envelope_policy()
                .is_rejection(&err.upstream_message())
        {
            return ErrorCategory::ProtocolViolation;
        }
        category
    }

    fn retry_delay(&self, attempt: u32, err: &LLMError) -> Duration {
        if let Some(seconds) = err.metadata().and_then(|meta| meta.retry_after_seconds()) {
            return Duration::from_secs(seconds).min(self.retry.max_delay);
        }
        let base = self.retry.backoff().delay_for_attempt(attempt);
        let jitter_cap = u64::try_from(base.as_millis() / 4).unwrap_or(0);
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        (base + Duration::from_millis(jitter)).min(self.retry.max_delay)
    }
}

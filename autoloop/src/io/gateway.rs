//! Model gateway: hooks, the model service, and retry with backoff.
//!
//! The [`ModelService`] trait decouples the loop from the actual transport
//! (currently [`crate::io::model_process::CommandModelService`]). Tests use
//! scripted services that return predetermined completions and failures.

use std::fmt;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::cost::Cost;
use crate::core::tokens::ModelInfo;
use crate::core::types::{ChatSequence, Role};
use crate::hooks::HookChain;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Generated text plus usage metadata.
///
/// `cost` is the service-reported charge; when absent the gateway prices
/// `usage` from the model catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

/// What the model service receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl CompletionRequest {
    pub fn from_sequence(sequence: &ChatSequence, temperature: f32) -> Self {
        Self {
            model: sequence.model.clone(),
            messages: sequence
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect(),
            temperature,
            max_tokens: sequence.completion_budget(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimit,
    Auth,
    Malformed,
    /// Connection errors, timeouts and 5xx-class responses.
    Transport,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::RateLimit | FailureKind::Transport)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::RateLimit => "rate_limit",
            FailureKind::Auth => "auth",
            FailureKind::Malformed => "malformed",
            FailureKind::Transport => "transport",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure from a single service attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct ServiceError {
    pub kind: FailureKind,
    pub detail: String,
    /// Tokens the service billed despite failing.
    pub billed: Option<Usage>,
}

impl ServiceError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            billed: None,
        }
    }

    pub fn with_billed(mut self, usage: Usage) -> Self {
        self.billed = Some(usage);
        self
    }
}

/// Abstraction over language-model backends.
pub trait ModelService {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ServiceError>;
}

impl<S: ModelService + ?Sized> ModelService for &S {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ServiceError> {
        (**self).complete(request)
    }
}

/// Retry behaviour for transient service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per invocation, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(32);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(anyhow!(
                "retry.base_delay_ms ({}) must be <= retry.max_delay_ms ({})",
                self.base_delay_ms,
                self.max_delay_ms
            ));
        }
        Ok(())
    }
}

/// A successful gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub content: String,
    pub usage: Usage,
    /// Total billed over every attempt, including failed ones.
    pub cost: Cost,
    pub attempts: u32,
    /// Name of the hook that served the completion, if any.
    pub hook: Option<String>,
}

/// A gateway call that ended without a completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("model call failed after {attempts} attempt(s): {kind}: {detail}")]
pub struct GatewayFailure {
    pub kind: FailureKind,
    pub detail: String,
    pub attempts: u32,
    /// Total billed over every attempt.
    pub billed: Cost,
}

pub struct ModelGateway<'a, S: ModelService> {
    service: S,
    hooks: &'a HookChain,
    policy: RetryPolicy,
    temperature: f32,
}

impl<'a, S: ModelService> ModelGateway<'a, S> {
    pub fn new(service: S, hooks: &'a HookChain, policy: RetryPolicy, temperature: f32) -> Self {
        if !hooks.is_empty() {
            debug!(hooks = ?hooks.names(), "completion hooks registered");
        }
        Self {
            service,
            hooks,
            policy,
            temperature,
        }
    }

    #[instrument(skip_all, fields(model = %model.name, prompt_tokens = sequence.prompt_tokens))]
    pub fn invoke(
        &self,
        sequence: &ChatSequence,
        model: &ModelInfo,
    ) -> Result<Invocation, GatewayFailure> {
        if let Some(served) = self.hooks.try_complete(sequence) {
            let usage = served.completion.usage;
            let cost = served
                .completion
                .cost
                .unwrap_or_else(|| price(model, usage));
            return Ok(Invocation {
                content: served.completion.content,
                usage,
                cost,
                attempts: 0,
                hook: Some(served.hook),
            });
        }

        let request = CompletionRequest::from_sequence(sequence, self.temperature);
        let mut billed = Cost::ZERO;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(attempt, "calling model service");
            match self.service.complete(&request) {
                Ok(completion) => {
                    let cost = completion
                        .cost
                        .unwrap_or_else(|| price(model, completion.usage));
                    billed += cost;
                    info!(
                        attempt,
                        prompt_tokens = completion.usage.prompt_tokens,
                        completion_tokens = completion.usage.completion_tokens,
                        cost = %cost,
                        "model call completed"
                    );
                    return Ok(Invocation {
                        content: completion.content,
                        usage: completion.usage,
                        cost: billed,
                        attempts: attempt,
                        hook: None,
                    });
                }
                Err(err) => {
                    if let Some(usage) = err.billed {
                        billed += price(model, usage);
                    }
                    if !err.kind.is_retryable() || attempt >= self.policy.max_attempts {
                        warn!(attempt, kind = %err.kind, detail = %err.detail, "model call failed");
                        return Err(GatewayFailure {
                            kind: err.kind,
                            detail: err.detail,
                            attempts: attempt,
                            billed,
                        });
                    }
                    let delay = self.policy.backoff_delay(attempt);
                    warn!(
                        attempt,
                        kind = %err.kind,
                        delay_ms = delay.as_millis() as u64,
                        "transient model failure, retrying"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }
}

fn price(model: &ModelInfo, usage: Usage) -> Cost {
    model.estimate_cost(usage.prompt_tokens, usage.completion_tokens)
}

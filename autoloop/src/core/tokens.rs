//! Token accounting and the model catalog.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::cost::Cost;
use crate::core::types::Role;

/// Fixed overhead charged for every message (role marker and separators).
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;
/// Tokens the service prepends to prime the assistant reply, once per sequence.
pub const REPLY_PRIMING_TOKENS: usize = 3;

/// Context window and pricing for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    /// Maximum tokens accepted per request (prompt + completion).
    pub max_tokens: usize,
    /// Tokens kept free for the completion when assembling prompts.
    pub completion_reserve: usize,
    pub prompt_price_per_1k: f64,
    pub completion_price_per_1k: f64,
}

impl ModelInfo {
    pub fn new(
        name: &str,
        max_tokens: usize,
        completion_reserve: usize,
        prompt_price_per_1k: f64,
        completion_price_per_1k: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            max_tokens,
            completion_reserve,
            prompt_price_per_1k,
            completion_price_per_1k,
        }
    }

    /// Price a call from its token usage.
    pub fn estimate_cost(&self, prompt_tokens: usize, completion_tokens: usize) -> Cost {
        let dollars = prompt_tokens as f64 * self.prompt_price_per_1k / 1000.0
            + completion_tokens as f64 * self.completion_price_per_1k / 1000.0;
        Cost::from_dollars(dollars)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("model name must not be empty"));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("model '{}': max_tokens must be > 0", self.name));
        }
        if self.completion_reserve >= self.max_tokens {
            return Err(anyhow!(
                "model '{}': completion_reserve ({}) must be < max_tokens ({})",
                self.name,
                self.completion_reserve,
                self.max_tokens
            ));
        }
        for (label, price) in [
            ("prompt_price_per_1k", self.prompt_price_per_1k),
            ("completion_price_per_1k", self.completion_price_per_1k),
        ] {
            if !price.is_finite() || price < 0.0 {
                return Err(anyhow!("model '{}': {label} must be >= 0", self.name));
            }
        }
        Ok(())
    }
}

/// Known models, looked up by exact name.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    models: Vec<ModelInfo>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            models: vec![
                ModelInfo::new("gpt-3.5-turbo", 4096, 1000, 0.0015, 0.002),
                ModelInfo::new("gpt-3.5-turbo-16k", 16384, 2000, 0.003, 0.004),
                ModelInfo::new("gpt-4", 8192, 1000, 0.03, 0.06),
                ModelInfo::new("gpt-4-32k", 32768, 2000, 0.06, 0.12),
            ],
        }
    }
}

impl ModelCatalog {
    /// Default catalog with `overrides` replacing same-named entries or appended.
    pub fn with_overrides(overrides: &[ModelInfo]) -> Self {
        let mut catalog = Self::default();
        for model in overrides {
            match catalog.models.iter_mut().find(|m| m.name == model.name) {
                Some(existing) => *existing = model.clone(),
                None => catalog.models.push(model.clone()),
            }
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Result<&ModelInfo> {
        self.models.iter().find(|m| m.name == name).ok_or_else(|| {
            let known: Vec<&str> = self.models.iter().map(|m| m.name.as_str()).collect();
            anyhow!("unknown model '{name}' (known: {})", known.join(", "))
        })
    }
}

/// Counts or estimates the token cost of text for a model.
pub trait TokenCounter {
    fn count_text(&self, text: &str, model: &ModelInfo) -> usize;

    fn count_message(&self, role: Role, content: &str, model: &ModelInfo) -> usize {
        MESSAGE_OVERHEAD_TOKENS
            + self.count_text(role.as_str(), model)
            + self.count_text(content, model)
    }
}

/// Model-agnostic estimate of one token per four characters, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count_text(&self, text: &str, _model: &ModelInfo) -> usize {
        text.chars().count().div_ceil(4)
    }
}

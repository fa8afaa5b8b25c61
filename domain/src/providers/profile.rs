//! Static description of a provider and the models it serves.

use crate::routing::RequestCharacteristics;
use serde::{Deserialize, Serialize};

/// Context windows at or above this size count as "large context".
pub const LARGE_CONTEXT_TOKENS: u32 = 200_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub name: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default)]
    pub supports_thinking: bool,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default = "default_true")]
    pub supports_tools: bool,
}

fn default_context_window() -> u32 {
    128_000
}

fn default_true() -> bool {
    true
}

impl ModelProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_window: default_context_window(),
            supports_thinking: false,
            supports_vision: false,
            supports_tools: true,
        }
    }

    pub fn with_thinking(mut self) -> Self {
        self.supports_thinking = true;
        self
    }

    pub fn with_vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }

    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = tokens;
        self
    }

    pub fn is_large_context(&self) -> bool {
        self.context_window >= LARGE_CONTEXT_TOKENS
    }

    fn fits(&self, chars: &RequestCharacteristics) -> bool {
        u64::from(self.context_window) >= chars.token_estimate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub name: String,
    pub models: Vec<ModelProfile>,
    pub default_model: String,
    /// USD per 1k tokens, blended input/output.
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
}

impl ProviderProfile {
    pub fn new(name: impl Into<String>, default_model: ModelProfile) -> Self {
        Self {
            name: name.into(),
            default_model: default_model.name.clone(),
            models: vec![default_model],
            cost_per_1k_tokens: 0.0,
        }
    }

    pub fn with_model(mut self, model: ModelProfile) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_cost(mut self, cost_per_1k_tokens: f64) -> Self {
        self.cost_per_1k_tokens = cost_per_1k_tokens;
        self
    }

    pub fn supports_vision(&self) -> bool {
        self.models.iter().any(|m| m.supports_vision)
    }

    pub fn supports_thinking(&self) -> bool {
        self.models.iter().any(|m| m.supports_thinking)
    }

    /// Estimated cost in USD for `tokens`.
    pub fn estimated_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_1k_tokens
    }

    /// Pick the model that serves `chars`.
    ///
    /// Preference order: a model matching every required capability
    /// (extended thinking, large context, vision), then one that at least
    /// fits the token estimate, then the default model.
    pub fn select_model(&self, chars: &RequestCharacteristics) -> &str {
        let wants_capability =
            chars.needs_thinking || chars.needs_large_context || chars.needs_vision;

        if wants_capability
            && let Some(m) = self.models.iter().find(|m| {
                (!chars.needs_thinking || m.supports_thinking)
                    && (!chars.needs_large_context || m.is_large_context())
                    && (!chars.needs_vision || m.supports_vision)
            })
        {
            return &m.name;
        }

        let default_fits = self
            .models
            .iter()
            .find(|m| m.name == self.default_model)
            .map(|m| m.fits(chars))
            .unwrap_or(true);
        if !default_fits
            && let Some(m) = self
                .models
                .iter()
                .filter(|m| m.fits(chars))
                .min_by_key(|m| m.context_window)
        {
            return &m.name;
        }

        &self.default_model
    }
}

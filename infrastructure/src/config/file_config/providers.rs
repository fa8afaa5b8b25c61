//! Router and provider configuration from TOML (`[router]`, `[[providers]]`)

use super::ConfigValidationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use toolbridge_application::RouterParams;
use toolbridge_domain::{CircuitBreakerConfig, ModelProfile, ProviderProfile, RoutingStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRouterConfig {
    /// "adaptive", "performance_weighted", "cost_optimized", "load_balanced"
    /// or "reliability_focused".
    pub strategy: String,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub ema_alpha: f64,
    /// Provider retry attempts, including the first.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for FileRouterConfig {
    fn default() -> Self {
        Self {
            strategy: "adaptive".to_string(),
            failure_threshold: 5,
            cooldown_secs: 60,
            ema_alpha: 0.2,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

impl FileRouterConfig {
    pub fn to_params(&self) -> Result<RouterParams, ConfigValidationError> {
        let strategy: RoutingStrategy = self
            .strategy
            .parse()
            .map_err(|_| ConfigValidationError::UnknownStrategy(self.strategy.clone()))?;
        Ok(RouterParams {
            strategy,
            breaker: CircuitBreakerConfig::new(
                self.failure_threshold,
                Duration::from_secs(self.cooldown_secs),
            ),
            ema_alpha: self.ema_alpha,
        })
    }
}

/// One model a provider serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileModelConfig {
    pub name: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default)]
    pub thinking: bool,
    #[serde(default)]
    pub vision: bool,
}

fn default_context_window() -> u32 {
    128_000
}

impl FileModelConfig {
    fn to_profile(&self) -> ModelProfile {
        let mut model = ModelProfile::new(&self.name).with_context_window(self.context_window);
        if self.thinking {
            model = model.with_thinking();
        }
        if self.vision {
            model = model.with_vision();
        }
        model
    }
}

/// One `[[providers]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProviderConfig {
    pub name: String,
    /// "echo" (offline) or "openai" (any OpenAI-compatible endpoint).
    pub kind: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable that holds the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// First entry is the default model.
    pub models: Vec<FileModelConfig>,
}

fn default_provider_timeout() -> u64 {
    120
}

impl FileProviderConfig {
    pub fn local_echo() -> Self {
        Self {
            name: "local-echo".to_string(),
            kind: "echo".to_string(),
            base_url: None,
            api_key_env: None,
            cost_per_1k_tokens: 0.0,
            timeout_secs: default_provider_timeout(),
            models: vec![FileModelConfig {
                name: "echo-1".to_string(),
                context_window: 200_000,
                thinking: true,
                vision: false,
            }],
        }
    }

    pub fn to_profile(&self) -> Result<ProviderProfile, ConfigValidationError> {
        let (first, rest) = self
            .models
            .split_first()
            .ok_or_else(|| ConfigValidationError::NoModels(self.name.clone()))?;
        let profile = rest.iter().fold(
            ProviderProfile::new(&self.name, first.to_profile()),
            |p, m| p.with_model(m.to_profile()),
        );
        Ok(profile.with_cost(self.cost_per_1k_tokens))
    }
}

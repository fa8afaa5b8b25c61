//! Provider client port
//!
//! Defines the uniform interface every LLM backend adapter implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use toolbridge_domain::{ErrorKind, ProviderProfile};

/// Errors that can occur during provider calls
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Other error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Whether another attempt against the same provider may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Unavailable(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_)
            | ProviderError::Other(_) => true,
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Auth(_) | ProviderError::InvalidRequest(_) => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Provider,
        }
    }
}

/// Sampling and capability knobs forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the model for extended thinking, when it supports it.
    pub thinking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub params: GenerateParams,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_prompt: None,
            params: GenerateParams::default(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_params(mut self, params: GenerateParams) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: u64,
}

/// A backend that can generate text.
///
/// Implementations live in the infrastructure layer. They are expected to be
/// cheap to share (`Arc`) and safe to call concurrently.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Static description used for routing.
    fn profile(&self) -> &ProviderProfile;

    fn name(&self) -> &str {
        &self.profile().name
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ProviderResponse, ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        assert!(ProviderError::Unavailable("x".into()).is_retryable());
        assert!(ProviderError::Http { status: 503, message: String::new() }.is_retryable());
        assert!(ProviderError::Http { status: 429, message: String::new() }.is_retryable());
        assert!(!ProviderError::Http { status: 400, message: String::new() }.is_retryable());
        assert!(!ProviderError::Auth("bad key".into()).is_retryable());
    }

    #[test]
    fn timeout_maps_to_timeout_kind() {
        assert_eq!(
            ProviderError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(ProviderError::Other("x".into()).kind(), ErrorKind::Provider);
    }
}

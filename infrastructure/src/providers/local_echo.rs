//! Offline provider that answers deterministically.
//!
//! Used as the zero-config default and by tests. The response echoes the
//! prompt so callers can verify what reached the backend.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use toolbridge_application::{GenerateRequest, ProviderClient, ProviderError, ProviderResponse};
use toolbridge_domain::ProviderProfile;

pub struct LocalEchoProvider {
    profile: ProviderProfile,
    latency: Duration,
    healthy: AtomicBool,
}

impl LocalEchoProvider {
    pub fn new(profile: ProviderProfile) -> Self {
        Self {
            profile,
            latency: Duration::ZERO,
            healthy: AtomicBool::new(true),
        }
    }

    /// Delay every `generate` call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make subsequent calls fail with `Unavailable` (or succeed again).
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ProviderError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::Unavailable(format!(
                "{} is marked unhealthy",
                self.profile.name
            )))
        }
    }
}

#[async_trait]
impl ProviderClient for LocalEchoProvider {
    fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ProviderResponse, ProviderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check()?;

        let mut content = format!("[{}] {}", request.model, request.prompt);
        if request.params.thinking {
            content.insert_str(0, "(thinking) ");
        }
        let tokens_used = request
            .system_prompt
            .iter()
            .chain(std::iter::once(&request.prompt))
            .map(|s| s.split_whitespace().count() as u64)
            .sum();

        Ok(ProviderResponse {
            content,
            model: request.model.clone(),
            tokens_used,
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolbridge_application::GenerateParams;
    use toolbridge_domain::ModelProfile;

    fn provider() -> LocalEchoProvider {
        LocalEchoProvider::new(ProviderProfile::new("local", ModelProfile::new("echo-1")))
    }

    #[tokio::test]
    async fn echoes_prompt_with_model_tag() {
        let request = GenerateRequest::new("echo-1", "hello there").with_system_prompt("be brief");
        let response = provider().generate(&request).await.unwrap();
        assert_eq!(response.content, "[echo-1] hello there");
        assert_eq!(response.model, "echo-1");
        assert_eq!(response.tokens_used, 4);
    }

    #[tokio::test]
    async fn marks_thinking_requests() {
        let request = GenerateRequest::new("echo-1", "x").with_params(GenerateParams {
            thinking: true,
            ..Default::default()
        });
        let response = provider().generate(&request).await.unwrap();
        assert!(response.content.starts_with("(thinking) "));
    }

    #[tokio::test]
    async fn unhealthy_provider_fails() {
        let p = provider();
        p.set_healthy(false);
        assert!(matches!(
            p.health_check().await,
            Err(ProviderError::Unavailable(_))
        ));
        let err = p
            .generate(&GenerateRequest::new("echo-1", "x"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        p.set_healthy(true);
        assert!(p.health_check().await.is_ok());
    }
}

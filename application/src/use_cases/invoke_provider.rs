//! Provider invocation with retry.
//!
//! Every attempt is reported to the [`AdaptiveRouter`] so metrics and the
//! provider's circuit breaker see each individual failure, not just the
//! final outcome.

use crate::config::RetryPolicy;
use crate::ports::provider_client::{GenerateRequest, ProviderError, ProviderResponse};
use crate::use_cases::adaptive_router::AdaptiveRouter;
use std::time::Instant;
use thiserror::Error;
use toolbridge_domain::{ErrorKind, Transition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("{provider} failed after {attempts} attempt(s): {source}")]
    Provider {
        provider: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("Provider '{0}' is not registered")]
    UnknownProvider(String),

    #[error("Provider call cancelled")]
    Cancelled,
}

impl InvokeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvokeError::Provider { source, .. } => source.kind(),
            InvokeError::UnknownProvider(_) => ErrorKind::Capacity,
            InvokeError::Cancelled => ErrorKind::Timeout,
        }
    }
}

/// Successful invocation plus how many attempts it took.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub response: ProviderResponse,
    pub attempts: u32,
}

/// Call `provider` with bounded retry.
///
/// Stops early on non-retryable errors, when the provider's circuit opens
/// mid-sequence, or when `cancel` fires. A half-open probe slot held for
/// `provider` is released if the call ends, or is dropped, without an outcome.
pub async fn invoke_with_retry(
    router: &AdaptiveRouter,
    provider: &str,
    request: &GenerateRequest,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Invocation, InvokeError> {
    let client = router
        .client(provider)
        .ok_or_else(|| InvokeError::UnknownProvider(provider.to_string()))?;
    let max_attempts = retry.max_attempts.max(1);
    let _probe = router.probe_guard(provider);

    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled);
        }

        let started = Instant::now();
        let result = tokio::select! {
            r = client.generate(request) => r,
            _ = cancel.cancelled() => return Err(InvokeError::Cancelled),
        };
        let latency = started.elapsed();

        let error = match result {
            Ok(response) => {
                let _ = router.record_outcome(provider, true, latency, response.tokens_used);
                debug!(
                    "Provider '{}' answered in {:?} (attempt {})",
                    provider, latency, attempt
                );
                return Ok(Invocation {
                    response,
                    attempts: attempt,
                });
            }
            Err(e) => e,
        };

        let transition = router
            .record_outcome(provider, false, latency, 0)
            .unwrap_or(None);
        let circuit_opened = matches!(
            transition,
            Some(Transition::Opened) | Some(Transition::Reopened)
        );

        if !error.is_retryable() || attempt >= max_attempts || circuit_opened {
            warn!(
                "Provider '{}' failed (attempt {}/{}): {}",
                provider, attempt, max_attempts, error
            );
            return Err(InvokeError::Provider {
                provider: provider.to_string(),
                attempts: attempt,
                source: error,
            });
        }

        let mut delay = retry.delay_after(attempt);
        if let ProviderError::RateLimited {
            retry_after: Some(after),
        } = &error
        {
            delay = delay.max(*after);
        }
        debug!(
            "Provider '{}' attempt {} failed ({}), retrying in {:?}",
            provider, attempt, error, delay
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(InvokeError::Cancelled),
        }
    }
}

//! Provider adapters and their construction from configuration.
//!
//! | Kind | Adapter | Feature |
//! |------|---------|---------|
//! | `echo` | [`LocalEchoProvider`] | always |
//! | `openai` | [`OpenAiProvider`](openai::OpenAiProvider) | `http-providers` |

mod local_echo;

#[cfg(feature = "http-providers")]
pub mod openai;

pub use local_echo::LocalEchoProvider;

use crate::config::{ConfigValidationError, FileProviderConfig};
use std::sync::Arc;
use thiserror::Error;
use toolbridge_application::{AdaptiveRouter, ProviderClient};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProviderSetupError {
    #[error("provider '{name}': {source}")]
    Config {
        name: String,
        #[source]
        source: ConfigValidationError,
    },

    #[error("provider '{name}': unknown kind '{kind}'")]
    UnknownKind { name: String, kind: String },

    #[error("provider '{0}' needs base_url")]
    MissingBaseUrl(String),

    #[error("provider '{name}': kind '{kind}' requires the '{feature}' feature")]
    FeatureDisabled {
        name: String,
        kind: String,
        feature: &'static str,
    },

    #[error("provider '{name}': {message}")]
    Client { name: String, message: String },
}

/// Build one provider client from its `[[providers]]` entry.
pub fn build_provider(
    config: &FileProviderConfig,
) -> Result<Arc<dyn ProviderClient>, ProviderSetupError> {
    let profile = config
        .to_profile()
        .map_err(|source| ProviderSetupError::Config {
            name: config.name.clone(),
            source,
        })?;

    match config.kind.as_str() {
        "echo" => Ok(Arc::new(LocalEchoProvider::new(profile))),
        "openai" => build_openai(config, profile),
        other => Err(ProviderSetupError::UnknownKind {
            name: config.name.clone(),
            kind: other.to_string(),
        }),
    }
}

#[cfg(feature = "http-providers")]
fn build_openai(
    config: &FileProviderConfig,
    profile: toolbridge_domain::ProviderProfile,
) -> Result<Arc<dyn ProviderClient>, ProviderSetupError> {
    let base_url = config
        .base_url
        .clone()
        .ok_or_else(|| ProviderSetupError::MissingBaseUrl(config.name.clone()))?;
    let api_key = config
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .filter(|k| !k.is_empty());
    if config.api_key_env.is_some() && api_key.is_none() {
        warn!(provider = %config.name, "API key variable is unset, sending requests without auth");
    }
    let client = openai::OpenAiProvider::new(
        profile,
        base_url,
        api_key,
        std::time::Duration::from_secs(config.timeout_secs),
    )
    .map_err(|e| ProviderSetupError::Client {
        name: config.name.clone(),
        message: e.to_string(),
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "http-providers"))]
fn build_openai(
    config: &FileProviderConfig,
    _profile: toolbridge_domain::ProviderProfile,
) -> Result<Arc<dyn ProviderClient>, ProviderSetupError> {
    Err(ProviderSetupError::FeatureDisabled {
        name: config.name.clone(),
        kind: config.kind.clone(),
        feature: "http-providers",
    })
}

/// Register every configured provider with `router`.
///
/// Entries that cannot be built are skipped with a warning so one bad entry
/// does not take the daemon down. Returns the number registered.
pub fn register_providers(router: &AdaptiveRouter, configs: &[FileProviderConfig]) -> usize {
    let mut registered = 0;
    for config in configs {
        match build_provider(config) {
            Ok(client) => {
                info!(provider = %config.name, kind = %config.kind, "Provider registered");
                router.register(client);
                registered += 1;
            }
            Err(e) => warn!("Skipping provider: {}", e),
        }
    }
    registered
}

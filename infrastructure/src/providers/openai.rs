//! OpenAI-compatible chat completions adapter.
//!
//! Works against any server exposing `POST {base}/v1/chat/completions`
//! (OpenAI, vLLM, Ollama, LM Studio). Requests are non-streaming.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use toolbridge_application::{GenerateRequest, ProviderClient, ProviderError, ProviderResponse};
use toolbridge_domain::ProviderProfile;

const USER_AGENT: &str = concat!("toolbridge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

pub struct OpenAiProvider {
    profile: ProviderProfile,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(
        profile: ProviderProfile,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            profile,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn request_body(request: &GenerateRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(t) = request.params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = request.params.max_tokens {
            body["max_tokens"] = json!(n);
        }
        if request.params.thinking {
            body["reasoning_effort"] = json!("high");
        }
        body
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else if e.is_connect() {
            ProviderError::Unavailable(format!("{}: {}", self.base_url, e))
        } else {
            ProviderError::Other(e.to_string())
        }
    }
}

fn map_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Auth(body),
        429 => ProviderError::RateLimited { retry_after },
        400 | 404 | 422 => ProviderError::InvalidRequest(body),
        code => ProviderError::Http {
            status: code,
            message: body,
        },
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl ProviderClient for OpenAiProvider {
    fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .authorize(self.http.post(self.url("chat/completions")))
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, wait, body));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("Malformed completion: {}", e)))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Other("Completion has no content".to_string()))?;

        Ok(ProviderResponse {
            content,
            model: completion.model.unwrap_or_else(|| request.model.clone()),
            tokens_used: completion.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let response = self
            .authorize(self.http.get(self.url("models")))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let wait = retry_after(response.headers());
            Err(map_status(status, wait, String::new()))
        }
    }
}

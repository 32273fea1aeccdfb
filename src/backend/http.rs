//! Generic HTTP backend adapter.
//!
//! Speaks a minimal JSON generation contract: POST `{prompt, max_tokens,
//! temperature, model?}` and read back `{content, tokens_used?}`. Credentials
//! come from the process environment as `{ID}_API_KEY`.

use super::Backend;
use crate::types::{unix_timestamp, GenerationRequest, GenerationResponse, ResponseSource};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::env;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Backend id; also the admission-control resource name.
    pub id: String,
    pub base_url: String,
    /// Request path appended to the base URL.
    pub path: String,
    pub timeout: Duration,
    /// Provider-native model name, forwarded verbatim when set.
    pub model: Option<String>,
}

impl HttpBackendConfig {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            path: "/v1/generate".to_string(),
            timeout: Duration::from_secs(30),
            model: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct GenerationWire {
    content: String,
    #[serde(default)]
    tokens_used: Option<u32>,
}

#[derive(Debug)]
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        url::Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid base url for `{}`: {e}", config.id)))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let api_key = Self::api_key_from_env(&config.id);
        if api_key.is_none() {
            tracing::debug!(backend = %config.id, "no API key in environment");
        }

        Ok(Self {
            config,
            client,
            api_key,
        })
    }

    fn api_key_from_env(id: &str) -> Option<String> {
        let var = format!("{}_API_KEY", id.to_uppercase().replace('-', "_"));
        env::var(var).ok()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.path
        )
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let mut body = serde_json::json!({
            "prompt": request.prompt,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if let Some(model) = &self.config.model {
            body["model"] = serde_json::Value::String(model.clone());
        }

        let mut req = self
            .client
            .post(self.endpoint())
            .header("X-Request-Id", request.id.to_string())
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let start = Instant::now();
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    backend: self.config.id.clone(),
                    elapsed: start.elapsed(),
                }
            } else {
                Error::Transport(e)
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Backend {
                backend: self.config.id.clone(),
                message: if message.is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    message
                },
                status: Some(status.as_u16()),
            });
        }

        let wire: GenerationWire = resp.json().await.map_err(|e| Error::Backend {
            backend: self.config.id.clone(),
            message: format!("malformed response body: {e}"),
            status: Some(status.as_u16()),
        })?;

        Ok(GenerationResponse {
            content: wire.content,
            backend: self.config.id.clone(),
            timestamp: unix_timestamp(),
            tokens_used: wire.tokens_used,
            confidence: None,
            latency: start.elapsed(),
            source: ResponseSource::Live,
        })
    }
}

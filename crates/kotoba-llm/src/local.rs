//! Client for the on-host model server.
//!
//! Speaks the local server's generate API (`POST /api/generate`,
//! `GET /api/tags`) and fronts it with the two-layer [`ResponseCache`].
//! Tier processors consume the [`LocalGenerate`] capability rather than
//! the concrete client so tests can substitute mocks.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error};

use kotoba_types::config::LocalModelConfig;
use kotoba_types::request::AssistRequest;

use crate::cache::{CacheConfig, CacheStats, ResponseCache};
use crate::error::LocalModelError;

/// Per-call generation parameters.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Model override; the client default is used when absent.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Pre-built prompt; the client builds a basic one when absent.
    pub prompt: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            max_tokens: 500,
            prompt: None,
        }
    }
}

impl GenerateOptions {
    /// Options with a prompt already assembled by the caller.
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Builder-style model override.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Capability consumed by the local-model tier.
#[async_trait]
pub trait LocalGenerate: Send + Sync {
    /// Generate a reply for `request`.
    async fn generate(
        &self,
        request: &AssistRequest,
        opts: GenerateOptions,
    ) -> Result<String, LocalModelError>;
}

/// HTTP client for the local model server with response caching.
pub struct LocalModelClient {
    http: reqwest::Client,
    base_url: String,
    default_model: String,
    cache: ResponseCache,
}

impl LocalModelClient {
    /// Default per-attempt deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Build a client from the local-model configuration section.
    pub fn new(config: &LocalModelConfig) -> std::io::Result<Self> {
        Self::with_timeout(config, Self::DEFAULT_TIMEOUT)
    }

    /// Build a client with an explicit per-attempt deadline.
    pub fn with_timeout(config: &LocalModelConfig, timeout: Duration) -> std::io::Result<Self> {
        let cache = ResponseCache::new(CacheConfig::from_model_config(config))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.default_model.clone(),
            cache,
        })
    }

    /// The model used when a call does not override it.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Cache counters (all zero when the cache is disabled).
    pub fn cache_info(&self) -> CacheStats {
        self.cache.info()
    }

    /// Drop all cached responses.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Remove cached responses older than `max_age` (TTL by default).
    pub fn prune_cache(&self, max_age: Option<Duration>) {
        self.cache.prune(max_age);
    }

    /// List the models the server has available.
    pub async fn available_models(&self) -> Result<Vec<String>, LocalModelError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.http.get(&url).send().await.map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            let message = extract_error_message(response).await;
            return Err(LocalModelError::from_message(message));
        }
        let body: serde_json::Value = response.json().await.map_err(map_reqwest_error)?;
        let models = body
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn call_api(
        &self,
        prompt: &str,
        model: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, LocalModelError> {
        let url = format!("{}/api/generate", self.base_url);
        let payload = json!({
            "model": model,
            "prompt": prompt,
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
                "stream": false,
            }
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            let message = extract_error_message(response).await;
            error!(model, error = %message, "local model call failed");
            return Err(LocalModelError::from_message(message));
        }

        let body: serde_json::Value = response.json().await.map_err(map_reqwest_error)?;
        Ok(body
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string())
    }

    fn default_prompt(request: &AssistRequest) -> String {
        format!(
            "You are a bilingual companion in a Japanese train-station \
             adventure, helping an English-speaking player learn Japanese.\n\
             The player has asked: \"{}\"\n\
             This is a {} request.\n\
             Provide a helpful, concise response that addresses the \
             player's question directly.",
            request.player_input, request.request_type
        )
    }
}

#[async_trait]
impl LocalGenerate for LocalModelClient {
    async fn generate(
        &self,
        request: &AssistRequest,
        opts: GenerateOptions,
    ) -> Result<String, LocalModelError> {
        let model = opts.model.as_deref().unwrap_or(&self.default_model);
        let cache_key =
            ResponseCache::cache_key(&request.player_input, &request.request_type, model);

        if let Some(cached) = self.cache.lookup(&cache_key) {
            debug!(request_id = %request.request_id, model, "cache hit");
            return Ok(cached);
        }

        let prompt = match &opts.prompt {
            Some(prompt) => prompt.clone(),
            None => Self::default_prompt(request),
        };

        let text = self
            .call_api(&prompt, model, opts.temperature, opts.max_tokens)
            .await?;
        self.cache.record_api_call();
        self.cache.store(&cache_key, &text, model);
        Ok(text)
    }
}

impl std::fmt::Debug for LocalModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalModelClient")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("cache_enabled", &self.cache.enabled())
            .finish()
    }
}

fn map_reqwest_error(err: reqwest::Error) -> LocalModelError {
    if err.is_timeout() {
        LocalModelError::Timeout
    } else if err.is_connect() {
        LocalModelError::Connection(err.to_string())
    } else if err.is_decode() {
        LocalModelError::Unknown(format!("invalid response body: {err}"))
    } else {
        LocalModelError::Unknown(err.to_string())
    }
}

async fn extract_error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body: Option<serde_json::Value> = response.json().await.ok();
    body.as_ref()
        .and_then(|b| b.get("error"))
        .and_then(|e| e.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = GenerateOptions::default();
        assert!(opts.model.is_none());
        assert_eq!(opts.temperature, 0.7);
        assert_eq!(opts.max_tokens, 500);
        assert!(opts.prompt.is_none());
    }

    #[test]
    fn options_builders() {
        let opts = GenerateOptions::with_prompt("custom prompt").model("llama3:16b");
        assert_eq!(opts.prompt.as_deref(), Some("custom prompt"));
        assert_eq!(opts.model.as_deref(), Some("llama3:16b"));
    }

    #[test]
    fn default_prompt_mentions_input_and_type() {
        let request = AssistRequest::new("what does 'kippu' mean?", "vocabulary");
        let prompt = LocalModelClient::default_prompt(&request);
        assert!(prompt.contains("what does 'kippu' mean?"));
        assert!(prompt.contains("vocabulary request"));
    }

    #[test]
    fn client_debug_omits_cache_internals() {
        let config = LocalModelConfig {
            cache_dir: std::env::temp_dir()
                .join("kotoba-test-cache-debug")
                .to_string_lossy()
                .into_owned(),
            ..LocalModelConfig::default()
        };
        let client = LocalModelClient::new(&config).unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("LocalModelClient"));
        assert!(debug.contains("llama3"));
    }
}

//! Client for the signed remote model endpoint.
//!
//! Every call is admission-checked against the [`UsageLedger`] before
//! dispatch and recorded after (success or failure, with observed token
//! counts and duration). There is no caching layer: every admitted call
//! hits the network.
//!
//! The request payload shape is selected by the model-id prefix (the
//! segment before the first `.`), mirroring the multi-vendor runtime the
//! endpoint fronts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use kotoba_types::config::RemoteModelConfig;
use kotoba_types::request::AssistRequest;

use crate::error::RemoteModelError;
use crate::local::GenerateOptions;
use crate::signing::RequestSigner;
use crate::usage::{estimate_tokens, UsageLedger, UsageRecord};

/// Capability consumed by the remote-model tier.
#[async_trait]
pub trait RemoteGenerate: Send + Sync {
    /// Generate a reply for `request`.
    async fn generate(
        &self,
        request: &AssistRequest,
        opts: GenerateOptions,
    ) -> Result<String, RemoteModelError>;
}

/// HTTP client for the remote model runtime.
pub struct RemoteModelClient {
    http: reqwest::Client,
    endpoint: String,
    default_model: String,
    max_tokens: u32,
    signer: Arc<dyn RequestSigner>,
    ledger: Arc<UsageLedger>,
}

impl RemoteModelClient {
    /// Default per-attempt deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Build a client from the remote-model configuration section.
    pub fn new(
        config: &RemoteModelConfig,
        signer: Arc<dyn RequestSigner>,
        ledger: Arc<UsageLedger>,
    ) -> Self {
        Self::with_timeout(config, signer, ledger, Self::DEFAULT_TIMEOUT)
    }

    /// Build a client with an explicit per-attempt deadline.
    pub fn with_timeout(
        config: &RemoteModelConfig,
        signer: Arc<dyn RequestSigner>,
        ledger: Arc<UsageLedger>,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            default_model: config.default_model.clone(),
            max_tokens: config.max_tokens,
            signer,
            ledger,
        }
    }

    /// The model used when a call does not override it.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// The ledger guarding this client.
    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    async fn call_api(
        &self,
        model: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<(String, Option<u64>, Option<u64>), RemoteModelError> {
        let url = format!("{}/model/{model}/invoke", self.endpoint);
        let payload = payload_for_model(model, prompt, temperature, max_tokens);
        let body = serde_json::to_vec(&payload)
            .map_err(|e| RemoteModelError::Unknown(format!("payload serialization: {e}")))?;

        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        for (name, value) in self.signer.sign(&url, &body) {
            request = request.header(name, value);
        }

        let response = request.body(body).send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .or_else(|| v.get("error"))
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("HTTP {status}: {text}"));

            return Err(match status.as_u16() {
                429 => RemoteModelError::Quota {
                    reason: message,
                    throttled: true,
                },
                404 => RemoteModelError::Model(message),
                _ => RemoteModelError::from_message(message),
            });
        }

        let body: serde_json::Value = response.json().await.map_err(map_reqwest_error)?;
        parse_response(&body)
    }

    fn default_prompt(request: &AssistRequest) -> String {
        format!(
            "You are a bilingual companion in a Japanese train-station \
             adventure.\nThe player has asked: \"{}\"\n\nYour role is to \
             assist the player with language help, directions, and \
             cultural information.\nProvide a helpful, concise response \
             in English.",
            request.player_input
        )
    }
}

#[async_trait]
impl RemoteGenerate for RemoteModelClient {
    async fn generate(
        &self,
        request: &AssistRequest,
        opts: GenerateOptions,
    ) -> Result<String, RemoteModelError> {
        let model = opts
            .model
            .as_deref()
            .unwrap_or(&self.default_model)
            .to_string();
        let prompt = match &opts.prompt {
            Some(prompt) => prompt.clone(),
            None => Self::default_prompt(request),
        };
        let estimated_input = estimate_tokens(&prompt);

        // Admission control happens before any network traffic. A denial
        // is final for this request: the quota windows will not clear
        // between retry attempts.
        let (allowed, reason) = self.ledger.check_quota(&model, estimated_input).await;
        if !allowed {
            info!(request_id = %request.request_id, model, reason, "remote call denied by quota");
            return Err(RemoteModelError::Quota {
                reason,
                throttled: false,
            });
        }

        let max_tokens = if opts.max_tokens > 0 {
            opts.max_tokens
        } else {
            self.max_tokens
        };

        let start = Instant::now();
        let result = self
            .call_api(&model, &prompt, opts.temperature, max_tokens)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((text, input_tokens, output_tokens)) => {
                let input_tokens = input_tokens.unwrap_or(estimated_input);
                let output_tokens = output_tokens.unwrap_or_else(|| estimate_tokens(&text));
                debug!(
                    request_id = %request.request_id,
                    model,
                    input_tokens,
                    output_tokens,
                    duration_ms,
                    "remote call succeeded"
                );
                self.ledger
                    .record(UsageRecord::success(
                        &request.request_id,
                        &model,
                        input_tokens,
                        output_tokens,
                        duration_ms,
                    ))
                    .await;
                Ok(text)
            }
            Err(err) => {
                warn!(
                    request_id = %request.request_id,
                    model,
                    duration_ms,
                    error = %err,
                    "remote call failed"
                );
                self.ledger
                    .record(UsageRecord::failure(
                        &request.request_id,
                        &model,
                        estimated_input,
                        duration_ms,
                        err.kind(),
                    ))
                    .await;
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for RemoteModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteModelClient")
            .field("endpoint", &self.endpoint)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Request payload shape by model-id prefix.
fn payload_for_model(
    model: &str,
    prompt: &str,
    temperature: f64,
    max_tokens: u32,
) -> serde_json::Value {
    let vendor = model.split('.').next().unwrap_or_default();
    match vendor {
        "anthropic" => json!({
            "anthropic_version": "runtime-2023-05-31",
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{"role": "user", "content": prompt}],
        }),
        "amazon" => json!({
            "inputText": prompt,
            "textGenerationConfig": {
                "maxTokenCount": max_tokens,
                "temperature": temperature,
                "topP": 0.9,
            }
        }),
        _ => json!({
            "prompt": prompt,
            "max_tokens": max_tokens,
            "temperature": temperature,
        }),
    }
}

/// Pull the reply text and observed token counts out of a response body,
/// whichever vendor shape it uses.
fn parse_response(
    body: &serde_json::Value,
) -> Result<(String, Option<u64>, Option<u64>), RemoteModelError> {
    // amazon shape: {"results": [{"outputText": ..., "tokenCount": ...}], "inputTextTokenCount": ...}
    if let Some(first) = body.get("results").and_then(|r| r.get(0)) {
        let text = first
            .get("outputText")
            .and_then(|t| t.as_str())
            .ok_or_else(|| RemoteModelError::Unknown("no outputText in results".into()))?;
        let input = body.get("inputTextTokenCount").and_then(|v| v.as_u64());
        let output = first.get("tokenCount").and_then(|v| v.as_u64());
        return Ok((text.to_string(), input, output));
    }

    // anthropic shape: {"content": [{"text": ...}], "usage": {"input_tokens", "output_tokens"}}
    if let Some(first) = body.get("content").and_then(|c| c.get(0)) {
        let text = first
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| RemoteModelError::Unknown("no text in content".into()))?;
        let usage = body.get("usage");
        let input = usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(|v| v.as_u64());
        let output = usage
            .and_then(|u| u.get("output_tokens"))
            .and_then(|v| v.as_u64());
        return Ok((text.to_string(), input, output));
    }

    // generic shape: {"completion": ...} or {"response": ...}
    if let Some(text) = body
        .get("completion")
        .or_else(|| body.get("response"))
        .and_then(|t| t.as_str())
    {
        return Ok((text.to_string(), None, None));
    }

    Err(RemoteModelError::Unknown("no recognizable text in response".into()))
}

fn map_reqwest_error(err: reqwest::Error) -> RemoteModelError {
    if err.is_timeout() {
        RemoteModelError::Timeout
    } else if err.is_connect() {
        RemoteModelError::Connection(err.to_string())
    } else if err.is_decode() {
        RemoteModelError::Unknown(format!("invalid response body: {err}"))
    } else {
        RemoteModelError::Unknown(err.to_string())
    }
}

//! Tier 3: the remote model.
//!
//! The most capable and most expensive path. A specialized handler
//! builds the prompt when one is registered for the intent; otherwise
//! the general prompt builder does. Conversation history is folded in
//! when a conversation id is present, and the exchange is recorded on
//! success. Transient failures (including service throttling, which may
//! clear between attempts) are retried; a ledger admission denial is
//! final and fails fast. Either way a quota failure surfaces the
//! specific limit-reached message and never cascades down — a cheaper
//! tier cannot answer what the budget refused.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use kotoba_llm::local::GenerateOptions;
use kotoba_llm::remote::RemoteGenerate;
use kotoba_llm::retry::{retry_async, RetryConfig};
use kotoba_llm::RemoteModelError;
use kotoba_types::request::{ClassifiedRequest, Tier};
use kotoba_types::Result;

use crate::conversation::manager::ConversationManager;
use crate::metrics::MetricsRegistry;
use crate::prompt::PromptBuilder;

use super::{clean_model_output, messages, HandlerRegistry, Processor};

/// Model and sampling parameters for the remote tier.
#[derive(Debug, Clone)]
pub struct Tier3Models {
    /// The remote model id.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Generation budget.
    pub max_tokens: u32,
}

impl Default for Tier3Models {
    fn default() -> Self {
        Self {
            model: "anthropic.claude-3-sonnet".into(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// The remote-model tier.
pub struct Tier3Processor {
    client: Arc<dyn RemoteGenerate>,
    prompt: Arc<PromptBuilder>,
    handlers: HandlerRegistry,
    conversation: Option<Arc<ConversationManager>>,
    models: Tier3Models,
    retry: RetryConfig,
    metrics: Arc<MetricsRegistry>,
}

impl Tier3Processor {
    /// Build the tier with the built-in handler registry.
    pub fn new(
        client: Arc<dyn RemoteGenerate>,
        prompt: Arc<PromptBuilder>,
        models: Tier3Models,
        retry: RetryConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            client,
            prompt,
            handlers: HandlerRegistry::with_builtin(),
            conversation: None,
            models,
            retry,
            metrics,
        }
    }

    /// Replace the handler registry.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Thread conversation history through prompts and record exchanges.
    pub fn with_conversation(mut self, conversation: Arc<ConversationManager>) -> Self {
        self.conversation = Some(conversation);
        self
    }

    async fn assemble_prompt(&self, request: &ClassifiedRequest) -> String {
        let base = match self.handlers.get(request.intent) {
            Some(handler) => {
                debug!(
                    request_id = %request.request_id(),
                    intent = request.intent.label(),
                    "using specialized handler prompt"
                );
                handler.build_prompt(request)
            }
            None => self.prompt.build(request).await,
        };

        let (Some(conversation), Some(id)) = (&self.conversation, request.conversation_id())
        else {
            return base;
        };
        let history = match conversation.history(id).await {
            Ok(history) => history,
            Err(e) => {
                warn!(conversation_id = id, error = %e, "history unavailable");
                return base;
            }
        };
        let state = conversation.detect_state(request.player_input(), &history);
        conversation.build_prompt(&base, &history, state)
    }

    async fn generate_with_retries(
        &self,
        request: &ClassifiedRequest,
        prompt: &str,
    ) -> std::result::Result<String, RemoteModelError> {
        let attempts = AtomicU32::new(0);
        let result = retry_async(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                let opts = GenerateOptions {
                    model: Some(self.models.model.clone()),
                    temperature: self.models.temperature,
                    max_tokens: self.models.max_tokens,
                    prompt: Some(prompt.to_string()),
                };
                self.client.generate(&request.request, opts)
            },
            &self.retry,
            RemoteModelError::is_transient,
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        for retry_number in 1..attempts {
            self.metrics.track_retry("tier3", retry_number - 1);
        }
        result
    }
}

#[async_trait]
impl Processor for Tier3Processor {
    fn tier(&self) -> Tier {
        Tier::Tier3
    }

    async fn process(&self, request: &mut ClassifiedRequest) -> Result<String> {
        self.metrics.track_request("tier3");
        let start = Instant::now();

        let prompt = self.assemble_prompt(request).await;
        debug!(
            request_id = %request.request_id(),
            model = %self.models.model,
            prompt_chars = prompt.len(),
            "tier 3 generating"
        );

        let reply = match self.generate_with_retries(request, &prompt).await {
            Ok(raw) => {
                let cleaned = match self.handlers.get(request.intent) {
                    Some(handler) => handler.post_process(&raw, request),
                    None => clean_model_output(&raw),
                };
                if let (Some(conversation), Some(id)) =
                    (&self.conversation, request.conversation_id())
                {
                    if let Err(e) = conversation.record(id, request, &cleaned).await {
                        warn!(conversation_id = id, error = %e, "failed to record exchange");
                    }
                }
                self.metrics.track_success("tier3", true);
                cleaned
            }
            Err(error) => {
                self.metrics.track_failure("tier3", error.kind());
                match error {
                    RemoteModelError::Quota { reason, .. } => {
                        info!(
                            request_id = %request.request_id(),
                            reason,
                            "remote quota reached"
                        );
                        messages::LIMIT_REACHED.to_string()
                    }
                    RemoteModelError::Content(_) => {
                        info!(request_id = %request.request_id(), "content rejection");
                        messages::CONTENT_RESTRICTED.to_string()
                    }
                    other => {
                        warn!(request_id = %request.request_id(), error = %other, "tier 3 failed");
                        messages::GENERIC_APOLOGY.to_string()
                    }
                }
            }
        };

        self.metrics
            .track_response_time("tier3", start.elapsed().as_millis() as u64);
        Ok(reply)
    }
}

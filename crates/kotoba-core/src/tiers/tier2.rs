//! Tier 2: the local model.
//!
//! Picks a model by complexity, builds a (contextual) prompt, and calls
//! the local client through the retry driver. Transient errors are
//! retried; a model error on the larger model triggers one shot with the
//! smaller model; persistent failures degrade to tier 1 or a fixed
//! apology depending on the error kind. Content rejections never
//! cascade: the input is the problem, not the model.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use kotoba_llm::local::{GenerateOptions, LocalGenerate};
use kotoba_llm::retry::{retry_async, RetryConfig};
use kotoba_llm::LocalModelError;
use kotoba_types::request::{ClassifiedRequest, Complexity, Tier};
use kotoba_types::Result;

use crate::conversation::manager::ConversationManager;
use crate::metrics::MetricsRegistry;
use crate::prompt::PromptBuilder;

use super::{clean_model_output, messages, Processor, Tier1Processor};

/// Models and sampling parameters for the local tier.
#[derive(Debug, Clone)]
pub struct Tier2Models {
    /// Model for simple and moderate requests.
    pub default_model: String,
    /// Larger model for complex requests.
    pub complex_model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Generation budget.
    pub max_tokens: u32,
}

impl Default for Tier2Models {
    fn default() -> Self {
        Self {
            default_model: "llama3".into(),
            complex_model: "llama3:16b".into(),
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

/// The local-model tier.
pub struct Tier2Processor {
    client: Arc<dyn LocalGenerate>,
    prompt: Arc<PromptBuilder>,
    tier1: Arc<Tier1Processor>,
    conversation: Option<Arc<ConversationManager>>,
    models: Tier2Models,
    retry: RetryConfig,
    metrics: Arc<MetricsRegistry>,
}

impl Tier2Processor {
    /// Build the tier.
    pub fn new(
        client: Arc<dyn LocalGenerate>,
        prompt: Arc<PromptBuilder>,
        tier1: Arc<Tier1Processor>,
        models: Tier2Models,
        retry: RetryConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            client,
            prompt,
            tier1,
            conversation: None,
            models,
            retry,
            metrics,
        }
    }

    /// Record successful exchanges into this conversation manager.
    pub fn with_conversation(mut self, conversation: Arc<ConversationManager>) -> Self {
        self.conversation = Some(conversation);
        self
    }

    fn select_model(&self, complexity: Complexity) -> &str {
        match complexity {
            Complexity::Complex => &self.models.complex_model,
            _ => &self.models.default_model,
        }
    }

    async fn generate_with_retries(
        &self,
        request: &ClassifiedRequest,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<String, LocalModelError> {
        let attempts = AtomicU32::new(0);
        let result = retry_async(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                let opts = GenerateOptions {
                    model: Some(model.to_string()),
                    temperature: self.models.temperature,
                    max_tokens: self.models.max_tokens,
                    prompt: Some(prompt.to_string()),
                };
                self.client.generate(&request.request, opts)
            },
            &self.retry,
            LocalModelError::is_transient,
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        for retry_number in 1..attempts {
            self.metrics.track_retry("tier2", retry_number - 1);
        }
        result
    }

    async fn degrade(
        &self,
        request: &mut ClassifiedRequest,
        error: LocalModelError,
    ) -> Result<String> {
        self.metrics.track_failure("tier2", error.kind());

        match error {
            LocalModelError::Content(_) => {
                info!(request_id = %request.request_id(), "content rejection, fixed apology");
                self.metrics.track_fallback("tier2", "default_response");
                Ok(messages::CONTENT_RESTRICTED.to_string())
            }
            LocalModelError::Connection(_)
            | LocalModelError::Timeout
            | LocalModelError::Memory(_)
            | LocalModelError::Model(_) => {
                info!(
                    request_id = %request.request_id(),
                    error = %error,
                    "delegating to tier 1"
                );
                self.metrics.track_fallback("tier2", "tier1");
                match self.tier1.process(request).await {
                    Ok(reply) => Ok(reply),
                    Err(e) => {
                        warn!(request_id = %request.request_id(), error = %e, "tier 1 delegation failed");
                        self.metrics.track_fallback("tier2", "default_response");
                        Ok(messages::GENERIC_APOLOGY.to_string())
                    }
                }
            }
            LocalModelError::Unknown(_) => {
                self.metrics.track_fallback("tier2", "default_response");
                Ok(messages::GENERIC_APOLOGY.to_string())
            }
        }
    }
}

#[async_trait]
impl Processor for Tier2Processor {
    fn tier(&self) -> Tier {
        Tier::Tier2
    }

    async fn process(&self, request: &mut ClassifiedRequest) -> Result<String> {
        self.metrics.track_request("tier2");
        let start = Instant::now();

        let model = self.select_model(request.complexity).to_string();
        let prompt = match request.conversation_id() {
            Some(conversation_id) => {
                self.prompt.build_contextual(request, conversation_id).await
            }
            None => self.prompt.build(request).await,
        };
        debug!(
            request_id = %request.request_id(),
            model,
            prompt_chars = prompt.len(),
            "tier 2 generating"
        );

        let mut result = self.generate_with_retries(request, &model, &prompt).await;

        // One shot with the smaller model when the larger one was the
        // problem.
        let larger_model_broke = matches!(&result, Err(e) if e.is_model_related())
            && model == self.models.complex_model;
        if larger_model_broke {
            warn!(
                request_id = %request.request_id(),
                model,
                "larger model failed, retrying with the default model"
            );
            self.metrics.track_fallback("tier2", "simpler_model");
            result = self
                .generate_with_retries(request, &self.models.default_model, &prompt)
                .await;
        }

        let reply = match result {
            Ok(raw) => {
                let reply = clean_model_output(&raw);
                if let (Some(conversation), Some(id)) =
                    (&self.conversation, request.conversation_id())
                {
                    if let Err(e) = conversation.record(id, request, &reply).await {
                        warn!(conversation_id = id, error = %e, "failed to record exchange");
                    }
                }
                self.metrics.track_success("tier2", true);
                reply
            }
            Err(error) => self.degrade(request, error).await?,
        };

        self.metrics
            .track_response_time("tier2", start.elapsed().as_millis() as u64);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptConfig;
    use kotoba_types::request::AssistRequest;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted mock: pops one outcome per call.
    struct MockLocalModel {
        script: Mutex<Vec<std::result::Result<String, LocalModelError>>>,
        calls: AtomicU32,
        models_seen: Mutex<Vec<String>>,
    }

    impl MockLocalModel {
        fn new(script: Vec<std::result::Result<String, LocalModelError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                models_seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LocalGenerate for MockLocalModel {
        async fn generate(
            &self,
            _request: &AssistRequest,
            opts: GenerateOptions,
        ) -> std::result::Result<String, LocalModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.models_seen
                .lock()
                .unwrap()
                .push(opts.model.unwrap_or_default());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok("scripted default reply from the local model".into())
            } else {
                script.remove(0)
            }
        }
    }

    fn processor(client: Arc<dyn LocalGenerate>) -> Tier2Processor {
        let metrics = Arc::new(MetricsRegistry::new());
        Tier2Processor::new(
            client,
            Arc::new(PromptBuilder::new(PromptConfig::default())),
            Arc::new(Tier1Processor::new(metrics.clone())),
            Tier2Models::default(),
            RetryConfig::immediate(2),
            metrics,
        )
    }

    fn classified(input: &str, complexity: Complexity) -> ClassifiedRequest {
        ClassifiedRequest {
            request: AssistRequest::new(input, "vocabulary"),
            intent: kotoba_types::request::Intent::VocabularyHelp,
            complexity,
            preferred_tier: Tier::Tier2,
            confidence: 0.8,
            extracted_entities: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn success_passes_cleaned_output_through() {
        let mock = MockLocalModel::new(vec![Ok(
            "<assistant>'Kippu' means 'ticket' in Japanese.</assistant>".into()
        )]);
        let p = processor(mock.clone());
        let mut request = classified("What does 'kippu' mean?", Complexity::Simple);
        let reply = p.process(&mut request).await.unwrap();
        assert_eq!(reply, "'Kippu' means 'ticket' in Japanese.");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn model_selection_by_complexity() {
        let mock = MockLocalModel::new(vec![]);
        let p = processor(mock.clone());

        let mut simple = classified("short question", Complexity::Simple);
        p.process(&mut simple).await.unwrap();
        let mut complex = classified("long involved question", Complexity::Complex);
        p.process(&mut complex).await.unwrap();

        let models = mock.models_seen.lock().unwrap().clone();
        assert_eq!(models, vec!["llama3", "llama3:16b"]);
    }

    #[tokio::test]
    async fn transient_errors_retried_then_fallback_to_tier1() {
        // Initial + 2 retries, all connection errors, then tier 1 answers.
        let mock = MockLocalModel::new(vec![
            Err(LocalModelError::Connection("refused".into())),
            Err(LocalModelError::Connection("refused".into())),
            Err(LocalModelError::Connection("refused".into())),
        ]);
        let p = processor(mock.clone());
        let mut request = classified("What does 'kippu' mean?", Complexity::Simple);
        let reply = p.process(&mut request).await.unwrap();

        assert_eq!(mock.calls(), 3, "initial attempt + 2 retries");
        // Tier 1's template answered.
        assert!(reply.contains("ticket"), "{reply}");
        let snapshot = p.metrics.snapshot();
        assert_eq!(snapshot.fallbacks("tier2", "tier1"), 1);
        assert_eq!(snapshot.requests("tier1"), 1);
    }

    #[tokio::test]
    async fn model_error_on_larger_model_retries_smaller_once() {
        let mock = MockLocalModel::new(vec![
            Err(LocalModelError::Model("llama3:16b not loaded".into())),
            Ok("reply from the smaller model".into()),
        ]);
        let p = processor(mock.clone());
        let mut request = classified("a complex question", Complexity::Complex);
        let reply = p.process(&mut request).await.unwrap();

        assert_eq!(reply, "reply from the smaller model");
        let models = mock.models_seen.lock().unwrap().clone();
        assert_eq!(models, vec!["llama3:16b", "llama3"]);
        assert_eq!(
            p.metrics.snapshot().fallbacks("tier2", "simpler_model"),
            1
        );
    }

    #[tokio::test]
    async fn model_error_on_default_model_goes_to_tier1() {
        let mock = MockLocalModel::new(vec![Err(LocalModelError::Model(
            "llama3 not loaded".into(),
        ))]);
        let p = processor(mock.clone());
        let mut request = classified("What does 'eki' mean?", Complexity::Simple);
        let reply = p.process(&mut request).await.unwrap();

        // No smaller model to fall to: straight to tier 1.
        assert_eq!(mock.calls(), 1);
        assert!(!reply.is_empty());
        assert_eq!(p.metrics.snapshot().fallbacks("tier2", "tier1"), 1);
    }

    #[tokio::test]
    async fn content_error_returns_fixed_apology_without_tier1() {
        let mock = MockLocalModel::new(vec![Err(LocalModelError::Content(
            "safety filter".into(),
        ))]);
        let p = processor(mock.clone());
        let mut request = classified("something inappropriate", Complexity::Simple);
        let reply = p.process(&mut request).await.unwrap();

        assert_eq!(reply, messages::CONTENT_RESTRICTED);
        assert_eq!(mock.calls(), 1, "content errors are not retried");
        let snapshot = p.metrics.snapshot();
        assert_eq!(snapshot.fallbacks("tier2", "tier1"), 0);
        assert_eq!(snapshot.requests("tier1"), 0);
    }

    #[tokio::test]
    async fn unknown_error_returns_generic_apology() {
        let mock = MockLocalModel::new(vec![Err(LocalModelError::Unknown("boom".into()))]);
        let p = processor(mock);
        let mut request = classified("hello there friend", Complexity::Simple);
        let reply = p.process(&mut request).await.unwrap();
        assert_eq!(reply, messages::GENERIC_APOLOGY);
    }

    #[tokio::test]
    async fn records_exchange_when_conversation_attached() {
        use crate::conversation::store::MemoryConversationStore;

        let store = MemoryConversationStore::shared(10);
        let manager = Arc::new(ConversationManager::new(store));
        let mock = MockLocalModel::new(vec![Ok("'Eki' means 'station' in Japanese.".into())]);

        let metrics = Arc::new(MetricsRegistry::new());
        let p = Tier2Processor::new(
            mock,
            Arc::new(PromptBuilder::new(PromptConfig::default())),
            Arc::new(Tier1Processor::new(metrics.clone())),
            Tier2Models::default(),
            RetryConfig::immediate(1),
            metrics,
        )
        .with_conversation(manager.clone());

        let mut request = classified("What does 'eki' mean?", Complexity::Simple);
        request.request.conversation_id = Some("c7".into());
        p.process(&mut request).await.unwrap();

        let history = manager.history("c7").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].text, "'Eki' means 'station' in Japanese.");
    }
}

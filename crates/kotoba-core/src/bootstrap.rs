//! Engine assembly from the configuration record.
//!
//! [`CompanionEngine::build`] wires the whole stack — clients, ledger,
//! conversation layer, knowledge store, tiers, router — from one
//! [`KotobaConfig`]. Collaborators a deployment must supply (the request
//! signer, a real knowledge backend) are injected; everything else comes
//! from configuration defaults.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use kotoba_llm::cache::CacheStats;
use kotoba_llm::local::LocalModelClient;
use kotoba_llm::remote::RemoteModelClient;
use kotoba_llm::retry::RetryConfig;
use kotoba_llm::signing::RequestSigner;
use kotoba_llm::usage::{UsageLedger, UsageSummary};
use kotoba_types::request::{AssistRequest, InteractionLog, Tier};
use kotoba_types::{KotobaConfig, Result};

use crate::conversation::manager::ConversationManager;
use crate::conversation::store::{
    ConversationStore, FileConversationStore, MemoryConversationStore,
};
use crate::formatter::ResponseFormatter;
use crate::knowledge::{builtin_world, KnowledgeStore, MemoryKnowledgeStore};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::profiles::ProfileRegistry;
use crate::prompt::{PromptBuilder, PromptConfig};
use crate::router::{CascadeRouter, ProcessorRegistry};
use crate::tiers::tier2::Tier2Models;
use crate::tiers::tier3::Tier3Models;
use crate::tiers::{Tier1Processor, Tier2Processor, Tier3Processor};

/// The assembled core: one router plus handles to the shared services.
pub struct CompanionEngine {
    router: CascadeRouter,
    ledger: Arc<UsageLedger>,
    local_client: Arc<LocalModelClient>,
    conversation: Arc<ConversationManager>,
    cleanup_age_days: u32,
}

impl CompanionEngine {
    /// Build the engine from configuration with the built-in world
    /// corpus and profiles.
    pub async fn build(
        config: &KotobaConfig,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self> {
        let knowledge: Arc<dyn KnowledgeStore> =
            Arc::new(MemoryKnowledgeStore::from_docs(builtin_world()));
        Self::build_with(config, signer, knowledge, Arc::new(ProfileRegistry::with_builtin()))
            .await
    }

    /// Build the engine with an injected knowledge backend and profiles.
    pub async fn build_with(
        config: &KotobaConfig,
        signer: Arc<dyn RequestSigner>,
        knowledge: Arc<dyn KnowledgeStore>,
        profiles: Arc<ProfileRegistry>,
    ) -> Result<Self> {
        let metrics = Arc::new(MetricsRegistry::new());
        let retry = RetryConfig::from_params(&config.retry);

        let store: Arc<dyn ConversationStore> = match &config.conversation.storage_dir {
            Some(dir) => Arc::new(
                FileConversationStore::new(dir.clone(), config.conversation.max_history).await?,
            ),
            None => MemoryConversationStore::shared(config.conversation.max_history),
        };
        let conversation = Arc::new(ConversationManager::new(store));

        let ledger = Arc::new(UsageLedger::new(config.quota.clone()));
        let local_client = Arc::new(LocalModelClient::new(&config.local_model)?);
        let remote_client = Arc::new(RemoteModelClient::new(
            &config.remote_model,
            signer,
            ledger.clone(),
        ));

        let tier1 = Arc::new(Tier1Processor::new(metrics.clone()));

        let tier2_prompt = Arc::new(
            PromptBuilder::new(PromptConfig {
                optimize: true,
                ..PromptConfig::default()
            })
            .with_knowledge(knowledge.clone())
            .with_conversation(conversation.clone()),
        );
        let tier2 = Arc::new(
            Tier2Processor::new(
                local_client.clone(),
                tier2_prompt,
                tier1.clone(),
                Tier2Models {
                    default_model: config
                        .tier2
                        .default_model
                        .clone()
                        .unwrap_or_else(|| config.local_model.default_model.clone()),
                    complex_model: config.local_model.complex_model.clone(),
                    temperature: config.tier2.temperature,
                    max_tokens: config.tier2.max_tokens,
                },
                retry.clone(),
                metrics.clone(),
            )
            .with_conversation(conversation.clone()),
        );

        let tier3_prompt = Arc::new(
            PromptBuilder::new(PromptConfig {
                model_format: Some("conversational".into()),
                ..PromptConfig::default()
            })
            .with_knowledge(knowledge),
        );
        let tier3 = Arc::new(
            Tier3Processor::new(
                remote_client,
                tier3_prompt,
                Tier3Models {
                    model: config
                        .tier3
                        .default_model
                        .clone()
                        .unwrap_or_else(|| config.remote_model.default_model.clone()),
                    temperature: config.tier3.temperature,
                    max_tokens: config.tier3.max_tokens.min(config.remote_model.max_tokens),
                },
                retry,
                metrics.clone(),
            )
            .with_conversation(conversation.clone()),
        );

        let registry = ProcessorRegistry::new()
            .register(tier1)
            .register(tier2)
            .register(tier3)
            .set_enabled(Tier::Tier1, config.tier1.enabled)
            .set_enabled(Tier::Tier2, config.tier2.enabled)
            .set_enabled(Tier::Tier3, config.tier3.enabled);

        let formatter = ResponseFormatter::new(profiles);
        let router = CascadeRouter::new(registry, formatter, metrics);

        info!(
            tier1 = config.tier1.enabled,
            tier2 = config.tier2.enabled,
            tier3 = config.tier3.enabled,
            "companion engine assembled"
        );

        Ok(Self {
            router,
            ledger,
            local_client,
            conversation,
            cleanup_age_days: config.conversation.cleanup_age_days,
        })
    }

    /// Handle one request. Never fails; always returns a reply.
    pub async fn handle(
        &self,
        request: &AssistRequest,
        log: Option<&mut InteractionLog>,
    ) -> String {
        self.router.handle(request, log).await
    }

    /// Per-tier processing counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.router.metrics()
    }

    /// Local-model cache counters.
    pub fn cache_info(&self) -> CacheStats {
        self.local_client.cache_info()
    }

    /// Remote usage and quota standing.
    pub async fn usage_summary(&self) -> UsageSummary {
        self.ledger.summary().await
    }

    /// Delete conversations idle longer than the configured age.
    /// Returns the number removed.
    pub async fn gc_conversations(&self) -> Result<usize> {
        self.conversation
            .cleanup(Duration::days(self.cleanup_age_days as i64))
            .await
    }
}

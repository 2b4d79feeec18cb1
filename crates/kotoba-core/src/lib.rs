//! # kotoba-core
//!
//! Core engine for the kotoba companion assistant: a tiered request
//! router for an interactive language-learning game.
//!
//! A request flows classifier → cascade router → tier processor →
//! response formatter. Tier 1 is rule-based (templates and dialog
//! trees), tier 2 uses the cached local model, tier 3 uses the
//! quota-guarded remote model. The conversation layer threads bounded
//! multi-turn history through the prompt builder.

pub mod bootstrap;
pub mod classify;
pub mod conversation;
pub mod decision_tree;
pub mod formatter;
pub mod knowledge;
pub mod metrics;
pub mod profiles;
pub mod prompt;
pub mod router;
pub mod template;
pub mod tiers;

pub use bootstrap::CompanionEngine;
pub use classify::IntentClassifier;
pub use conversation::manager::{ConversationManager, ConversationState};
pub use conversation::store::{ConversationStore, FileConversationStore, MemoryConversationStore};
pub use decision_tree::{DecisionTree, DecisionTreeEngine, NavigatorState};
pub use formatter::{FormatOptions, ResponseFormatter};
pub use knowledge::{KnowledgeDoc, KnowledgeHit, KnowledgeStore, MemoryKnowledgeStore};
pub use metrics::MetricsRegistry;
pub use profiles::ProfileRegistry;
pub use prompt::{PromptBuilder, PromptConfig};
pub use router::{CascadeRouter, ProcessorRegistry};
pub use template::{MatchResult, TemplateEngine};
pub use tiers::{Processor, Tier1Processor, Tier2Processor, Tier3Processor};

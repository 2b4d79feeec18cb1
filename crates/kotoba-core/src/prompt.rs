//! Layered prompt assembly.
//!
//! A prompt is built from ordered sections, each omitted when not
//! applicable: system role, game context, intent directive, complexity
//! directive, request-type directive, extracted entities, world context,
//! and the final reminder. The system role, intent directive, and final
//! reminder are load-bearing and survive every optimization; the game
//! context, request-type, and world-context sections are dropped first
//! when the token budget is tight.

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use kotoba_types::request::{ClassifiedRequest, Complexity, Intent};

use crate::conversation::manager::{ConversationManager, ConversationState};
use crate::knowledge::KnowledgeStore;

/// Prompt-assembly tuning.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// Whether the token-budget optimization pass runs.
    pub optimize: bool,
    /// Budget for the optimization pass, in estimated tokens.
    pub max_prompt_tokens: usize,
    /// Model-specific wrapping ("conversational" wraps in
    /// `<s>…</s>\n<user>…</user>`).
    pub model_format: Option<String>,
    /// Tier-specific passthrough appended after the reminder.
    pub additional_instructions: Option<String>,
    /// World-context entries included at most.
    pub world_top_k: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            optimize: false,
            max_prompt_tokens: 800,
            model_format: None,
            additional_instructions: None,
            world_top_k: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    SystemRole,
    GameContext,
    Intent,
    Complexity,
    RequestType,
    Entities,
    WorldContext,
    Reminder,
    Passthrough,
}

impl Section {
    /// Sections that may be dropped under token pressure, in drop order.
    const DROPPABLE: [Section; 3] = [Section::WorldContext, Section::RequestType, Section::GameContext];
}

/// Assembles layered prompts for the model tiers.
pub struct PromptBuilder {
    config: PromptConfig,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    conversation: Option<Arc<ConversationManager>>,
}

impl PromptBuilder {
    /// A builder with no knowledge store or conversation manager.
    pub fn new(config: PromptConfig) -> Self {
        Self {
            config,
            knowledge: None,
            conversation: None,
        }
    }

    /// Attach a world-knowledge store.
    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Attach a conversation manager for contextual prompts.
    pub fn with_conversation(mut self, conversation: Arc<ConversationManager>) -> Self {
        self.conversation = Some(conversation);
        self
    }

    /// Build the full prompt for a classified request.
    pub async fn build(&self, request: &ClassifiedRequest) -> String {
        let mut sections: Vec<(Section, String)> = Vec::new();

        sections.push((Section::SystemRole, system_role(request)));

        if let Some(context) = &request.request.game_context {
            let block = game_context_block(context);
            if !block.is_empty() {
                sections.push((Section::GameContext, block));
            }
        }

        sections.push((Section::Intent, intent_block(request.intent)));
        sections.push((Section::Complexity, complexity_block(request.complexity)));

        if let Some(block) = request_type_block(&request.request.request_type) {
            sections.push((Section::RequestType, block));
        }

        if !request.extracted_entities.is_empty() {
            sections.push((Section::Entities, entities_block(request)));
        }

        if let Some(knowledge) = &self.knowledge {
            let hits = knowledge
                .contextual_search(request, self.config.world_top_k)
                .await;
            if !hits.is_empty() {
                let mut block = String::from("Relevant game world information:\n");
                for (index, hit) in hits.iter().enumerate() {
                    let title = hit
                        .metadata
                        .get("title")
                        .and_then(|t| t.as_str())
                        .unwrap_or("Information");
                    block.push_str(&format!(
                        "{}. {title} (relevance {:.2}): {}\n",
                        index + 1,
                        hit.score,
                        hit.document
                    ));
                }
                sections.push((Section::WorldContext, block));
            }
        }

        sections.push((Section::Reminder, reminder_block()));

        if let Some(extra) = &self.config.additional_instructions {
            sections.push((Section::Passthrough, extra.clone()));
        }

        let mut prompt = join_sections(&sections);

        if self.config.optimize {
            prompt = self.optimize(prompt, &mut sections);
        }

        if let Some(format) = self.config.model_format.as_deref() {
            prompt = wrap_for_model(format, prompt, request.player_input());
        }

        debug!(
            request_id = %request.request_id(),
            chars = prompt.len(),
            "assembled prompt"
        );
        prompt
    }

    /// Build a prompt that folds in conversation history when the input
    /// is a follow-up or clarification.
    pub async fn build_contextual(
        &self,
        request: &ClassifiedRequest,
        conversation_id: &str,
    ) -> String {
        let base = self.build(request).await;
        let Some(manager) = &self.conversation else {
            return base;
        };
        let history = match manager.history(conversation_id).await {
            Ok(history) => history,
            Err(e) => {
                debug!(conversation_id, error = %e, "history unavailable, using base prompt");
                return base;
            }
        };
        let state = manager.detect_state(request.player_input(), &history);
        if state == ConversationState::NewTopic {
            return base;
        }
        manager.build_prompt(&base, &history, state)
    }

    /// Enforce the token budget: collapse whitespace, drop filler words,
    /// then drop the expendable sections until the estimate fits. The
    /// system role, intent directive, and reminder are never dropped.
    fn optimize(&self, prompt: String, sections: &mut Vec<(Section, String)>) -> String {
        if estimate_tokens(&prompt) <= self.config.max_prompt_tokens {
            return prompt;
        }

        let mut compressed = compress_text(&prompt);
        if estimate_tokens(&compressed) <= self.config.max_prompt_tokens {
            return compressed;
        }

        for droppable in Section::DROPPABLE {
            sections.retain(|(section, _)| *section != droppable);
            compressed = compress_text(&join_sections(sections));
            if estimate_tokens(&compressed) <= self.config.max_prompt_tokens {
                return compressed;
            }
        }
        compressed
    }
}

/// Token estimate: characters divided by four.
fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

fn join_sections(sections: &[(Section, String)]) -> String {
    sections
        .iter()
        .map(|(_, text)| text.trim_end())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn system_role(request: &ClassifiedRequest) -> String {
    format!(
        "You are a friendly bilingual companion in a Japanese train-station \
         adventure, helping the player learn basic Japanese (JLPT N5).\n\
         Response constraints:\n\
         1. Keep responses under 3 sentences.\n\
         2. Use JLPT N5 vocabulary and grammar only.\n\
         3. Always include both Japanese (in hiragana) and English.\n\
         4. Only discuss Japanese language, station navigation, or the \
         game; politely redirect anything else.\n\n\
         The player has asked: \"{}\"\n\
         This is a {} request with intent: {}.",
        request.player_input(),
        request.request.request_type,
        request.intent.label()
    )
}

fn game_context_block(context: &kotoba_types::request::GameContext) -> String {
    let mut block = String::from("Current game context:\n");
    let mut any = false;
    if !context.player_location.is_empty() {
        block.push_str(&format!("- Player location: {}\n", context.player_location));
        any = true;
    }
    if !context.current_objective.is_empty() {
        block.push_str(&format!("- Current objective: {}\n", context.current_objective));
        any = true;
    }
    if !context.nearby_npcs.is_empty() {
        block.push_str(&format!("- Nearby NPCs: {}\n", context.nearby_npcs.join(", ")));
        any = true;
    }
    if !context.nearby_objects.is_empty() {
        block.push_str(&format!(
            "- Nearby objects: {}\n",
            context.nearby_objects.join(", ")
        ));
        any = true;
    }
    if !context.player_inventory.is_empty() {
        block.push_str(&format!(
            "- Player inventory: {}\n",
            context.player_inventory.join(", ")
        ));
        any = true;
    }
    if !context.language_proficiency.is_empty() {
        block.push_str("- Language proficiency:\n");
        let mut skills: Vec<_> = context.language_proficiency.iter().collect();
        skills.sort_by(|a, b| a.0.cmp(b.0));
        for (skill, level) in skills {
            block.push_str(&format!("  - {skill}: {level:.2}\n"));
        }
        any = true;
    }
    if any {
        block
    } else {
        String::new()
    }
}

fn intent_block(intent: Intent) -> String {
    match intent {
        Intent::VocabularyHelp => "Vocabulary response format:\n\
             - the word in hiragana\n\
             - its English meaning\n\
             - one simple example sentence"
            .into(),
        Intent::GrammarExplanation => "Grammar response format:\n\
             - one N5 grammar point\n\
             - a simple example\n\
             - a station-context usage"
            .into(),
        Intent::DirectionGuidance => "Navigation response format:\n\
             - the direction in English\n\
             - the basic Japanese direction word\n\
             - a simple station phrase"
            .into(),
        Intent::TranslationConfirmation => "Translation response format:\n\
             - confirm or correct the player's phrase\n\
             - the Japanese in hiragana\n\
             - a short pronunciation guide"
            .into(),
        Intent::GeneralHint => "Provide a simple, N5-level response that addresses the \
             player's question directly, with both English and Japanese."
            .into(),
    }
}

fn complexity_block(complexity: Complexity) -> String {
    match complexity {
        Complexity::Simple => "Style: very short, direct sentences; one concept only; \
             common station words."
            .into(),
        Complexity::Moderate => "Style: standard N5 vocabulary; balance detail with \
             clarity; focus on practical usage."
            .into(),
        Complexity::Complex => "Style: more detailed N5 vocabulary; related concepts \
             and examples; add a cultural note when relevant."
            .into(),
    }
}

fn request_type_block(request_type: &str) -> Option<String> {
    let block = match request_type {
        "translation" => "For this translation request, give the Japanese with both \
             kana and romaji, and keep it natural for the situation.",
        "vocabulary" => "For this vocabulary request, explain meaning and usage with \
             an example sentence.",
        "grammar" => "For this grammar request, explain the pattern with an example \
             and a usage note.",
        "directions" => "For this directions request, use landmarks and station \
             names, and include one phrase for asking for help.",
        "culture" => "For this cultural request, give accurate information and tie \
             it back to language usage.",
        _ => return None,
    };
    Some(block.to_string())
}

fn entities_block(request: &ClassifiedRequest) -> String {
    let mut block = String::from("Extracted entities:\n");
    let mut entries: Vec<_> = request.extracted_entities.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in entries {
        block.push_str(&format!("- {key}: {value}\n"));
    }
    block
}

fn reminder_block() -> String {
    "Remember: under 3 sentences, JLPT N5 only, hiragana with a \
     pronunciation guide, one new concept, and only game-relevant topics."
        .into()
}

fn wrap_for_model(format: &str, prompt: String, player_input: &str) -> String {
    match format {
        "conversational" => {
            format!("<s>\n{prompt}\n</s>\n\n<user>\n{player_input}\n</user>")
        }
        _ => prompt,
    }
}

/// Whitespace collapse and filler-word removal.
fn compress_text(text: &str) -> String {
    let collapsed = Regex::new(r"\s+")
        .expect("static regex")
        .replace_all(text, " ")
        .into_owned();
    let fillers = Regex::new(r"\b(?:very|really|quite|just|simply|basically|actually)\b ?")
        .expect("static regex");
    fillers.replace_all(&collapsed, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::store::MemoryConversationStore;
    use crate::knowledge::{builtin_world, MemoryKnowledgeStore};
    use kotoba_types::request::{AssistRequest, GameContext, Tier};
    use std::collections::HashMap;

    fn classified(input: &str, request_type: &str) -> ClassifiedRequest {
        ClassifiedRequest {
            request: AssistRequest::new(input, request_type),
            intent: Intent::VocabularyHelp,
            complexity: Complexity::Simple,
            preferred_tier: Tier::Tier2,
            confidence: 0.8,
            extracted_entities: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn build_contains_protected_sections() {
        let builder = PromptBuilder::new(PromptConfig::default());
        let prompt = builder
            .build(&classified("What does 'kippu' mean?", "vocabulary"))
            .await;
        assert!(prompt.contains("What does 'kippu' mean?"));
        assert!(prompt.contains("Vocabulary response format"));
        assert!(prompt.contains("Remember:"));
    }

    #[tokio::test]
    async fn sections_appear_in_order() {
        let builder = PromptBuilder::new(PromptConfig::default());
        let mut request = classified("What does 'kippu' mean?", "vocabulary");
        request.request.game_context = Some(GameContext {
            player_location: "ticket hall".into(),
            ..GameContext::default()
        });
        request
            .extracted_entities
            .insert("word".into(), "kippu".into());

        let prompt = builder.build(&request).await;
        let system = prompt.find("You are a friendly bilingual companion").unwrap();
        let game = prompt.find("Current game context").unwrap();
        let intent = prompt.find("Vocabulary response format").unwrap();
        let entities = prompt.find("Extracted entities").unwrap();
        let reminder = prompt.find("Remember:").unwrap();
        assert!(system < game && game < intent && intent < entities && entities < reminder);
    }

    #[tokio::test]
    async fn game_context_block_renders_fields() {
        let builder = PromptBuilder::new(PromptConfig::default());
        let mut request = classified("where is the gate", "directions");
        request.request.game_context = Some(GameContext {
            player_location: "platform 2".into(),
            current_objective: "board the Odawara train".into(),
            player_inventory: vec!["ticket".into()],
            language_proficiency: HashMap::from([("vocabulary".into(), 0.4)]),
            ..GameContext::default()
        });
        let prompt = builder.build(&request).await;
        assert!(prompt.contains("platform 2"));
        assert!(prompt.contains("board the Odawara train"));
        assert!(prompt.contains("- Player inventory: ticket"));
        assert!(prompt.contains("vocabulary: 0.40"));
    }

    #[tokio::test]
    async fn world_context_included_when_knowledge_attached() {
        let knowledge = Arc::new(MemoryKnowledgeStore::from_docs(builtin_world()));
        let builder = PromptBuilder::new(PromptConfig::default()).with_knowledge(knowledge);
        let prompt = builder
            .build(&classified("where are the ticket machines?", "directions"))
            .await;
        assert!(prompt.contains("Relevant game world information"));
        assert!(prompt.contains("Ticket machines"));
    }

    #[tokio::test]
    async fn additional_instructions_passthrough() {
        let builder = PromptBuilder::new(PromptConfig {
            additional_instructions: Some("Always end with ganbatte!".into()),
            ..PromptConfig::default()
        });
        let prompt = builder.build(&classified("hello", "general")).await;
        assert!(prompt.ends_with("Always end with ganbatte!"));
    }

    #[tokio::test]
    async fn optimization_respects_budget_and_keeps_protected_sections() {
        let knowledge = Arc::new(MemoryKnowledgeStore::from_docs(builtin_world()));
        let builder = PromptBuilder::new(PromptConfig {
            optimize: true,
            max_prompt_tokens: 250,
            ..PromptConfig::default()
        })
        .with_knowledge(knowledge);

        let mut request = classified("What does 'kippu' mean?", "vocabulary");
        request.request.game_context = Some(GameContext {
            player_location: "a very long location description that repeats itself".into(),
            current_objective: "an equally long objective that pads the prompt".into(),
            ..GameContext::default()
        });

        let prompt = builder.build(&request).await;
        assert!(
            estimate_tokens(&prompt) <= 250,
            "estimate {} over budget",
            estimate_tokens(&prompt)
        );
        // Protected sections survive.
        assert!(prompt.contains("Vocabulary response format"));
        assert!(prompt.contains("Remember:"));
        // Droppable sections went first.
        assert!(!prompt.contains("Relevant game world information"));
    }

    #[tokio::test]
    async fn conversational_wrapping() {
        let builder = PromptBuilder::new(PromptConfig {
            model_format: Some("conversational".into()),
            ..PromptConfig::default()
        });
        let prompt = builder
            .build(&classified("What does 'eki' mean?", "vocabulary"))
            .await;
        assert!(prompt.starts_with("<s>\n"));
        assert!(prompt.contains("</s>"));
        assert!(prompt.contains("<user>\nWhat does 'eki' mean?\n</user>"));
    }

    #[tokio::test]
    async fn build_contextual_appends_history_for_follow_up() {
        let store = MemoryConversationStore::shared(10);
        let manager = Arc::new(ConversationManager::new(store));
        let builder =
            PromptBuilder::new(PromptConfig::default()).with_conversation(manager.clone());

        // Seed history.
        let seed = classified("What does 'kippu' mean?", "vocabulary");
        manager
            .record("c1", &seed, "'Kippu' means 'ticket'.")
            .await
            .unwrap();

        let request = classified("What about tickets to Odawara?", "vocabulary");
        let prompt = builder.build_contextual(&request, "c1").await;
        assert!(prompt.contains(r#""role": "user""#));
        assert!(prompt.contains("follow-up"));
    }

    #[tokio::test]
    async fn build_contextual_new_topic_is_plain_build() {
        let store = MemoryConversationStore::shared(10);
        let manager = Arc::new(ConversationManager::new(store));
        let builder =
            PromptBuilder::new(PromptConfig::default()).with_conversation(manager.clone());

        let request = classified("where is the exit", "directions");
        let prompt = builder.build_contextual(&request, "fresh-conversation").await;
        assert!(!prompt.contains("Previous conversation"));
    }

    #[test]
    fn compress_removes_fillers_and_collapses_whitespace() {
        let text = "This is   really   just a very    simple test";
        let compressed = compress_text(text);
        assert_eq!(compressed, "This is a simple test");
    }

    #[test]
    fn estimate_tokens_floor() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }
}

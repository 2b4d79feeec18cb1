//! Specialized handlers for the remote tier.
//!
//! A handler owns the prompt and post-processing for one intent the
//! remote model is particularly good at. Dispatch is by explicit
//! registry, not type lookup: the tier asks the registry for the
//! request's intent and falls back to the general prompt builder when
//! nothing is registered.

use std::collections::HashMap;
use std::sync::Arc;

use kotoba_types::request::{ClassifiedRequest, Intent};

/// Intent-specific prompt builder and post-processor.
pub trait SpecializedHandler: Send + Sync {
    /// Whether this handler covers `intent`.
    fn can_handle(&self, intent: Intent) -> bool;

    /// Build the intent-specific prompt.
    fn build_prompt(&self, request: &ClassifiedRequest) -> String;

    /// Clean up the raw model output.
    fn post_process(&self, raw: &str, _request: &ClassifiedRequest) -> String {
        raw.trim().to_string()
    }
}

/// Explicit intent -> handler registry.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Intent, Arc<dyn SpecializedHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in grammar and translation handlers.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            Intent::GrammarExplanation,
            Arc::new(GrammarExplanationHandler),
        );
        registry.register(
            Intent::TranslationConfirmation,
            Arc::new(TranslationConfirmationHandler),
        );
        registry
    }

    /// Register `handler` for `intent`. The handler must agree that it
    /// covers the intent; a mismatch is ignored.
    pub fn register(&mut self, intent: Intent, handler: Arc<dyn SpecializedHandler>) {
        if handler.can_handle(intent) {
            self.handlers.insert(intent, handler);
        }
    }

    /// The handler for `intent`, if one is registered.
    pub fn get(&self, intent: Intent) -> Option<&Arc<dyn SpecializedHandler>> {
        self.handlers.get(&intent)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Handler for grammar explanations.
pub struct GrammarExplanationHandler;

impl SpecializedHandler for GrammarExplanationHandler {
    fn can_handle(&self, intent: Intent) -> bool {
        intent == Intent::GrammarExplanation
    }

    fn build_prompt(&self, request: &ClassifiedRequest) -> String {
        let mut prompt = format!(
            "You are a patient Japanese teacher inside a train-station \
             adventure game.\nThe player asked: \"{}\"\n\n\
             Explain the grammar point at JLPT N5 level:\n\
             1. Name the pattern and what it expresses.\n\
             2. Give one example sentence in hiragana with romaji.\n\
             3. Tie the example to a train-station situation.\n\
             Keep the whole answer under 3 sentences.",
            request.player_input()
        );
        if let Some(pattern) = request.extracted_entities.get("pattern") {
            prompt.push_str(&format!("\nThe pattern in question is: {pattern}"));
        }
        prompt
    }
}

/// Handler for translation confirmations.
pub struct TranslationConfirmationHandler;

impl SpecializedHandler for TranslationConfirmationHandler {
    fn can_handle(&self, intent: Intent) -> bool {
        intent == Intent::TranslationConfirmation
    }

    fn build_prompt(&self, request: &ClassifiedRequest) -> String {
        let mut prompt = format!(
            "You are a bilingual companion checking a player's Japanese.\n\
             The player asked: \"{}\"\n\n\
             Confirm whether their phrase is correct. If it is, say so \
             briefly and encouragingly; if not, give the corrected phrase \
             in hiragana with romaji. Keep it under 3 sentences.",
            request.player_input()
        );
        if let Some(phrase) = request.extracted_entities.get("phrase") {
            prompt.push_str(&format!("\nThe phrase to check is: {phrase}"));
        }
        prompt
    }

    fn post_process(&self, raw: &str, _request: &ClassifiedRequest) -> String {
        // Models often lead with "Translation:"; the player doesn't need
        // the label.
        raw.trim()
            .trim_start_matches("Translation:")
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kotoba_types::request::{AssistRequest, Complexity, Tier};

    fn classified(input: &str, intent: Intent) -> ClassifiedRequest {
        ClassifiedRequest {
            request: AssistRequest::new(input, "grammar"),
            intent,
            complexity: Complexity::Complex,
            preferred_tier: Tier::Tier3,
            confidence: 0.9,
            extracted_entities: HashMap::new(),
        }
    }

    #[test]
    fn builtin_registry_covers_grammar_and_translation() {
        let registry = HandlerRegistry::with_builtin();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(Intent::GrammarExplanation).is_some());
        assert!(registry.get(Intent::TranslationConfirmation).is_some());
        assert!(registry.get(Intent::VocabularyHelp).is_none());
    }

    #[test]
    fn mismatched_registration_ignored() {
        let mut registry = HandlerRegistry::new();
        registry.register(Intent::VocabularyHelp, Arc::new(GrammarExplanationHandler));
        assert!(registry.is_empty());
    }

    #[test]
    fn grammar_prompt_includes_input_and_pattern() {
        let mut request = classified("Explain は vs が", Intent::GrammarExplanation);
        request
            .extracted_entities
            .insert("pattern".into(), "は vs が".into());
        let prompt = GrammarExplanationHandler.build_prompt(&request);
        assert!(prompt.contains("Explain は vs が"));
        assert!(prompt.contains("The pattern in question is: は vs が"));
        assert!(prompt.contains("JLPT N5"));
    }

    #[test]
    fn translation_post_process_strips_label() {
        let request = classified("Is 'sumimasen' correct?", Intent::TranslationConfirmation);
        let cleaned = TranslationConfirmationHandler
            .post_process("Translation: Yes, that's right!", &request);
        assert_eq!(cleaned, "Yes, that's right!");
    }
}

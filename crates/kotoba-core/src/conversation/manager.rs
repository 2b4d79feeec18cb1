//! Multi-turn conversation management.
//!
//! Detects whether an input opens a new topic, follows up on the previous
//! exchanges, or asks for clarification; renders the history block
//! appended to model prompts; and records finished exchanges back into
//! the store.

use std::sync::Arc;

use regex::Regex;
use serde_json::json;
use tracing::debug;

use kotoba_types::conversation::ConversationEntry;
use kotoba_types::request::ClassifiedRequest;
use kotoba_types::Result;

use super::store::ConversationStore;

/// How the current input relates to the conversation so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Unrelated to the previous exchanges (or there are none).
    NewTopic,
    /// Builds on the previous exchanges.
    FollowUp,
    /// Asks for the previous answer to be explained again.
    Clarification,
}

/// State detection, contextual prompt assembly, and history recording.
pub struct ConversationManager {
    store: Arc<dyn ConversationStore>,
    follow_up_patterns: Vec<Regex>,
    clarification_patterns: Vec<Regex>,
}

impl ConversationManager {
    /// Entries included in the history block of a contextual prompt.
    const HISTORY_WINDOW: usize = 6;

    /// Build a manager over `store` with the built-in pattern lists.
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        let follow_up = [
            r"what does .+ mean in that",
            r"can you explain .+ in that",
            r"how do you say .+ in that",
            r"what about .+",
            r"how about .+",
            r"tell me more about .+",
            r"what is the difference between .+",
            r"could you elaborate on .+",
        ];
        let clarification = [
            r"can you explain that again",
            r"i don'?t understand",
            r"what do you mean",
            r"could you clarify",
            r"can you clarify",
            r"please explain again",
            r"i'?m confused",
            r"that doesn'?t make sense",
            r"can you repeat that",
            r"what was that again",
        ];
        Self {
            store,
            follow_up_patterns: compile(&follow_up),
            clarification_patterns: compile(&clarification),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Current history for `conversation_id` (empty when absent).
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<ConversationEntry>> {
        Ok(self
            .store
            .get(conversation_id)
            .await?
            .map(|context| context.entries)
            .unwrap_or_default())
    }

    /// Classify the input against the conversation history.
    ///
    /// Pure and deterministic:
    /// 1. empty history -> NewTopic
    /// 2. clarification pattern match -> Clarification
    /// 3. follow-up pattern match -> FollowUp
    /// 4. input mentions an entity from the history -> FollowUp
    /// 5. otherwise -> NewTopic
    pub fn detect_state(&self, input: &str, history: &[ConversationEntry]) -> ConversationState {
        if history.is_empty() {
            return ConversationState::NewTopic;
        }

        let input = input.to_lowercase();
        if self
            .clarification_patterns
            .iter()
            .any(|p| p.is_match(&input))
        {
            debug!("detected clarification request");
            return ConversationState::Clarification;
        }
        if self.follow_up_patterns.iter().any(|p| p.is_match(&input)) {
            debug!("detected follow-up question");
            return ConversationState::FollowUp;
        }

        for entry in history {
            for value in entry.entities.values() {
                if !value.is_empty() && input.contains(&value.to_lowercase()) {
                    debug!(entity = %value, "input references a previous entity");
                    return ConversationState::FollowUp;
                }
            }
        }

        ConversationState::NewTopic
    }

    /// Extend `base` with the conversation history when the state calls
    /// for it.
    ///
    /// For follow-ups and clarifications the last entries (up to six) are
    /// rendered as an ordered array of `{role, content}` records,
    /// followed by a one-sentence directive describing the state. For new
    /// topics `base` is returned unchanged.
    pub fn build_prompt(
        &self,
        base: &str,
        history: &[ConversationEntry],
        state: ConversationState,
    ) -> String {
        if history.is_empty() || state == ConversationState::NewTopic {
            return base.to_string();
        }

        let start = history.len().saturating_sub(Self::HISTORY_WINDOW);
        let messages: Vec<serde_json::Value> = history[start..]
            .iter()
            .map(|entry| json!({"role": entry.kind.role(), "content": entry.text}))
            .collect();

        let mut prompt = base.to_string();
        prompt.push_str("\nPrevious conversation:\n");
        prompt.push_str(
            &serde_json::to_string_pretty(&messages).unwrap_or_else(|_| "[]".into()),
        );
        prompt.push('\n');

        match state {
            ConversationState::FollowUp => {
                prompt.push_str(
                    "\nThe player is asking a follow-up question related to the \
                     previous exchanges; answer with the conversation history in mind.\n",
                );
            }
            ConversationState::Clarification => {
                prompt.push_str(
                    "\nThe player is asking for clarification; explain the most \
                     recent topic again in more detail.\n",
                );
            }
            ConversationState::NewTopic => {}
        }

        prompt
    }

    /// Record a finished exchange: the user message (with intent and
    /// entities) followed by the assistant reply.
    pub async fn record(
        &self,
        conversation_id: &str,
        request: &ClassifiedRequest,
        response_text: &str,
    ) -> Result<()> {
        self.store
            .append_entry(
                conversation_id,
                ConversationEntry::user(
                    &request.request.player_input,
                    Some(request.intent),
                    request.extracted_entities.clone(),
                ),
            )
            .await?;
        self.store
            .append_entry(conversation_id, ConversationEntry::assistant(response_text))
            .await?;
        Ok(())
    }

    /// Delete conversations idle longer than `max_age`.
    pub async fn cleanup(&self, max_age: chrono::Duration) -> Result<usize> {
        self.store.gc(max_age).await
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
}

//! Persistent conversation history types.
//!
//! A [`ConversationContext`] is the durable, bounded history for one
//! `conversation_id`. Entries alternate between user and assistant
//! messages; the store trims the oldest entries once `max_history` is
//! exceeded. Contexts are owned by the conversation store; callers get
//! snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::Intent;

/// Who authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    UserMessage,
    AssistantMessage,
}

impl EntryKind {
    /// The OpenAI-style role string ("user" / "assistant").
    pub fn role(self) -> &'static str {
        match self {
            EntryKind::UserMessage => "user",
            EntryKind::AssistantMessage => "assistant",
        }
    }
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Author of the entry.
    pub kind: EntryKind,

    /// The message text.
    pub text: String,

    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,

    /// Classified intent (user entries only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,

    /// Entities extracted from the input (user entries only).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub entities: HashMap<String, String>,
}

impl ConversationEntry {
    /// Create a user entry carrying intent and entities.
    pub fn user(
        text: impl Into<String>,
        intent: Option<Intent>,
        entities: HashMap<String, String>,
    ) -> Self {
        Self {
            kind: EntryKind::UserMessage,
            text: text.into(),
            timestamp: Utc::now(),
            intent,
            entities,
        }
    }

    /// Create an assistant entry.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::AssistantMessage,
            text: text.into(),
            timestamp: Utc::now(),
            intent: None,
            entities: HashMap::new(),
        }
    }
}

/// Bounded per-conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// The conversation this history belongs to.
    pub conversation_id: String,

    /// When the context was first created.
    pub created_at: DateTime<Utc>,

    /// Updated on every append.
    pub updated_at: DateTime<Utc>,

    /// Ordered entries, oldest first.
    #[serde(default)]
    pub entries: Vec<ConversationEntry>,
}

impl ConversationContext {
    /// Create an empty context for `conversation_id`.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            created_at: now,
            updated_at: now,
            entries: Vec::new(),
        }
    }

    /// Append an entry, trimming the oldest entries so at most
    /// `max_history` remain. With `max_history == 0` the append succeeds
    /// but the history stays empty.
    pub fn push_entry(&mut self, entry: ConversationEntry, max_history: usize) {
        self.entries.push(entry);
        if self.entries.len() > max_history {
            let excess = self.entries.len() - max_history;
            self.entries.drain(..excess);
        }
        self.updated_at = Utc::now();
    }
}

//! Request and classification data model.
//!
//! A raw [`AssistRequest`] arrives from the game layer, is classified into
//! a [`ClassifiedRequest`] by the intent classifier, and flows through a
//! tier processor to produce a formatted reply. [`InteractionLog`] is the
//! request-scoped exchange log the router appends to when the caller
//! supplies one; it is distinct from the persistent conversation store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Intent categories for player requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// "What does X mean?"
    VocabularyHelp,
    /// "Explain particle X" / "how does X work grammatically"
    GrammarExplanation,
    /// "Where is the ticket gate?"
    DirectionGuidance,
    /// "Is this how you say X?"
    TranslationConfirmation,
    /// Anything else the companion can help with.
    GeneralHint,
}

impl Intent {
    /// Stable label used in logs, metrics, and template lookups.
    pub fn label(self) -> &'static str {
        match self {
            Intent::VocabularyHelp => "vocabulary_help",
            Intent::GrammarExplanation => "grammar_explanation",
            Intent::DirectionGuidance => "direction_guidance",
            Intent::TranslationConfirmation => "translation_confirmation",
            Intent::GeneralHint => "general_hint",
        }
    }
}

/// Complexity levels for processing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// One step simpler, saturating at [`Complexity::Simple`].
    pub fn downgraded(self) -> Self {
        match self {
            Complexity::Complex => Complexity::Moderate,
            _ => Complexity::Simple,
        }
    }
}

/// Processing tiers, ordered by cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Rule-based: templates and dialog trees. Never suspends.
    Tier1,
    /// Local model via the on-host endpoint, with response cache.
    Tier2,
    /// Remote model via the signed endpoint, quota-guarded.
    Tier3,
}

impl Tier {
    /// Stable label used in logs and metrics ("tier1", "tier2", "tier3").
    pub fn label(self) -> &'static str {
        match self {
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
            Tier::Tier3 => "tier3",
        }
    }

    /// The cascade order starting from this preferred tier.
    ///
    /// The preferred tier is tried first; the rest follow in the fixed
    /// fallback order.
    pub fn cascade_order(self) -> [Tier; 3] {
        match self {
            Tier::Tier1 => [Tier::Tier1, Tier::Tier2, Tier::Tier3],
            Tier::Tier2 => [Tier::Tier2, Tier::Tier3, Tier::Tier1],
            Tier::Tier3 => [Tier::Tier3, Tier::Tier2, Tier::Tier1],
        }
    }
}

/// Current game-state snapshot attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameContext {
    /// Where the player currently is (e.g. "ticket_hall").
    #[serde(default)]
    pub player_location: String,

    /// The active quest objective.
    #[serde(default)]
    pub current_objective: String,

    /// NPCs within interaction range.
    #[serde(default)]
    pub nearby_npcs: Vec<String>,

    /// Interactable objects within range.
    #[serde(default)]
    pub nearby_objects: Vec<String>,

    /// Items the player carries.
    #[serde(default)]
    pub player_inventory: Vec<String>,

    /// Per-skill proficiency estimates in `[0, 1]`.
    #[serde(default)]
    pub language_proficiency: HashMap<String, f64>,
}

/// A raw request from the player, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistRequest {
    /// Opaque unique id, assigned by the caller (or [`AssistRequest::new`]).
    pub request_id: String,

    /// The player's free-text input.
    pub player_input: String,

    /// Free-form tag from the caller: "vocabulary", "grammar", ...
    pub request_type: String,

    /// When the request was created.
    pub timestamp: DateTime<Utc>,

    /// Enables multi-turn handling when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Game-state snapshot, when the caller has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_context: Option<GameContext>,

    /// Selects the NPC profile used by the response formatter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,

    /// Extra caller-supplied parameters (dialog-tree state lives here).
    #[serde(default)]
    pub additional_params: HashMap<String, serde_json::Value>,
}

impl AssistRequest {
    /// Create a request with a fresh UUID and the current time.
    pub fn new(player_input: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            player_input: player_input.into(),
            request_type: request_type.into(),
            timestamp: Utc::now(),
            conversation_id: None,
            game_context: None,
            profile_id: None,
            additional_params: HashMap::new(),
        }
    }

    /// Builder-style setter for the conversation id.
    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Builder-style setter for the game context.
    pub fn with_game_context(mut self, ctx: GameContext) -> Self {
        self.game_context = Some(ctx);
        self
    }

    /// Builder-style setter for the NPC profile id.
    pub fn with_profile_id(mut self, id: impl Into<String>) -> Self {
        self.profile_id = Some(id.into());
        self
    }
}

/// A request that has been classified with intent, complexity, and tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedRequest {
    /// The original request.
    pub request: AssistRequest,

    /// The detected intent.
    pub intent: Intent,

    /// The detected complexity.
    pub complexity: Complexity,

    /// The tier the classifier prefers for this request.
    pub preferred_tier: Tier,

    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,

    /// Entities parsed out of the input (e.g. `word` -> "kippu").
    #[serde(default)]
    pub extracted_entities: HashMap<String, String>,
}

impl ClassifiedRequest {
    /// The request id of the underlying request.
    pub fn request_id(&self) -> &str {
        &self.request.request_id
    }

    /// The player's input text.
    pub fn player_input(&self) -> &str {
        &self.request.player_input
    }

    /// The conversation id, when multi-turn handling is enabled.
    pub fn conversation_id(&self) -> Option<&str> {
        self.request.conversation_id.as_deref()
    }
}

/// A finished reply paired with routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistResponse {
    /// Id of the request this answers.
    pub request_id: String,

    /// The formatted reply text.
    pub response_text: String,

    /// Intent the request was classified as.
    pub intent: Intent,

    /// The tier that produced the reply.
    pub tier: Tier,

    /// When the reply was produced.
    pub timestamp: DateTime<Utc>,
}

/// Request-scoped exchange log.
///
/// Callers that want a transcript of the exchanges made during their own
/// lifetime pass one of these to `CascadeRouter::handle`; it is purely
/// in-memory and independent of the persistent conversation store.
#[derive(Debug, Clone, Default)]
pub struct InteractionLog {
    /// Requests in arrival order.
    pub requests: Vec<AssistRequest>,

    /// Responses in production order, parallel to `requests`.
    pub responses: Vec<AssistResponse>,
}

impl InteractionLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one request/response exchange.
    pub fn add_interaction(&mut self, request: AssistRequest, response: AssistResponse) {
        self.requests.push(request);
        self.responses.push(response);
    }

    /// Number of completed exchanges.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// `true` when no exchange has been logged.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_gets_unique_ids() {
        let a = AssistRequest::new("hello", "general");
        let b = AssistRequest::new("hello", "general");
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.player_input, "hello");
        assert_eq!(a.request_type, "general");
        assert!(a.conversation_id.is_none());
    }

    #[test]
    fn builder_setters() {
        let req = AssistRequest::new("where is the gate", "directions")
            .with_conversation_id("c1")
            .with_profile_id("station_attendant");
        assert_eq!(req.conversation_id.as_deref(), Some("c1"));
        assert_eq!(req.profile_id.as_deref(), Some("station_attendant"));
    }

    #[test]
    fn complexity_downgrade_saturates() {
        assert_eq!(Complexity::Complex.downgraded(), Complexity::Moderate);
        assert_eq!(Complexity::Moderate.downgraded(), Complexity::Simple);
        assert_eq!(Complexity::Simple.downgraded(), Complexity::Simple);
    }

    #[test]
    fn cascade_orders() {
        assert_eq!(
            Tier::Tier1.cascade_order(),
            [Tier::Tier1, Tier::Tier2, Tier::Tier3]
        );
        assert_eq!(
            Tier::Tier2.cascade_order(),
            [Tier::Tier2, Tier::Tier3, Tier::Tier1]
        );
        assert_eq!(
            Tier::Tier3.cascade_order(),
            [Tier::Tier3, Tier::Tier2, Tier::Tier1]
        );
    }

    #[test]
    fn tier_labels() {
        assert_eq!(Tier::Tier1.label(), "tier1");
        assert_eq!(Tier::Tier2.label(), "tier2");
        assert_eq!(Tier::Tier3.label(), "tier3");
    }

    #[test]
    fn intent_serde_snake_case() {
        let json = serde_json::to_string(&Intent::VocabularyHelp).unwrap();
        assert_eq!(json, "\"vocabulary_help\"");
        let back: Intent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Intent::VocabularyHelp);
    }

    #[test]
    fn classified_request_accessors() {
        let req = AssistRequest::new("what does 'kippu' mean?", "vocabulary")
            .with_conversation_id("c9");
        let id = req.request_id.clone();
        let classified = ClassifiedRequest {
            request: req,
            intent: Intent::VocabularyHelp,
            complexity: Complexity::Simple,
            preferred_tier: Tier::Tier1,
            confidence: 0.9,
            extracted_entities: HashMap::from([("word".into(), "kippu".into())]),
        };
        assert_eq!(classified.request_id(), id);
        assert_eq!(classified.conversation_id(), Some("c9"));
        assert_eq!(classified.extracted_entities["word"], "kippu");
    }

    #[test]
    fn interaction_log_appends_in_order() {
        let mut log = InteractionLog::new();
        assert!(log.is_empty());

        let req = AssistRequest::new("hi", "general");
        let resp = AssistResponse {
            request_id: req.request_id.clone(),
            response_text: "Hello!".into(),
            intent: Intent::GeneralHint,
            tier: Tier::Tier1,
            timestamp: Utc::now(),
        };
        log.add_interaction(req, resp);
        assert_eq!(log.len(), 1);
        assert_eq!(log.responses[0].response_text, "Hello!");
    }

    #[test]
    fn game_context_roundtrip() {
        let ctx = GameContext {
            player_location: "platform_2".into(),
            current_objective: "buy a ticket to Odawara".into(),
            nearby_npcs: vec!["station_attendant".into()],
            nearby_objects: vec!["ticket_machine".into()],
            player_inventory: vec!["wallet".into()],
            language_proficiency: HashMap::from([("vocabulary".into(), 0.4)]),
        };
        let json = serde_json::to_string(&ctx).unwrap();
        let back: GameContext = serde_json::from_str(&json).unwrap();
        assert_eq!(ctx, back);
    }
}

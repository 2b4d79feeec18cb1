//! Tier 1: rule-based processing.
//!
//! Three stages, cheapest first: an active dialog-tree flow (state
//! carried in the request's additional params), the template pattern
//! set, and finally canned per-intent responses. No I/O, no retries,
//! never suspends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use kotoba_types::request::{ClassifiedRequest, Intent, Tier};
use kotoba_types::Result;

use crate::decision_tree::{DecisionTreeEngine, NavigatorState};
use crate::metrics::MetricsRegistry;
use crate::template::TemplateEngine;

use super::Processor;

/// Key in `additional_params` carrying the serialized dialog-tree state.
pub const CONVERSATION_STATE_KEY: &str = "conversation_state";

/// The rule-based tier.
pub struct Tier1Processor {
    templates: TemplateEngine,
    trees: DecisionTreeEngine,
    lexicon: HashMap<String, String>,
    metrics: Arc<MetricsRegistry>,
}

impl Tier1Processor {
    /// Build with the built-in templates, trees, and lexicon.
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self::with_engines(
            TemplateEngine::builtin(),
            DecisionTreeEngine::with_builtin_trees(),
            metrics,
        )
    }

    /// Build from explicit engines.
    pub fn with_engines(
        templates: TemplateEngine,
        trees: DecisionTreeEngine,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            templates,
            trees,
            lexicon: builtin_lexicon(),
            metrics,
        }
    }

    /// Drive an active dialog tree, persisting the new state back into
    /// the request. Returns `None` when no flow is active.
    fn step_dialog_tree(&self, request: &mut ClassifiedRequest) -> Result<Option<String>> {
        let Some(raw_state) = request.request.additional_params.get(CONVERSATION_STATE_KEY)
        else {
            return Ok(None);
        };
        let state: NavigatorState = match serde_json::from_value(raw_state.clone()) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    request_id = %request.request_id(),
                    error = %e,
                    "unreadable dialog-tree state, ignoring"
                );
                return Ok(None);
            }
        };

        let input = request.player_input().to_string();
        let outcome = self.trees.step(&state, &input)?;

        if let Ok(new_state) = serde_json::to_value(&outcome.state) {
            request
                .request
                .additional_params
                .insert(CONVERSATION_STATE_KEY.to_string(), new_state);
        }

        if outcome.output.is_empty() {
            return Ok(None);
        }
        Ok(Some(outcome.output))
    }

    /// Match the pattern set and render the associated template.
    fn render_template(&self, request: &mut ClassifiedRequest) -> Option<String> {
        let matched = self.templates.find_match(request.player_input());
        if !matched.matched {
            return None;
        }

        // Matched entities enrich the request for downstream consumers.
        for (key, value) in &matched.entities {
            request
                .extracted_entities
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        let template_id = matched.template_id?;
        let mut vars = request.extracted_entities.clone();
        if let Some(word) = vars.get("word") {
            if let Some(meaning) = self.lexicon.get(&word.to_lowercase()) {
                vars.entry("meaning".to_string())
                    .or_insert_with(|| meaning.clone());
            }
        }

        let rendered = self.templates.render(&template_id, &vars)?;
        // An unfilled placeholder means the lexicon could not supply a
        // variable; the canned responses read better than a hole.
        if rendered.contains('{') {
            debug!(template_id, "template left unfilled placeholders, skipping");
            return None;
        }
        Some(rendered)
    }

    fn canned_response(&self, intent: Intent) -> &'static str {
        match intent {
            Intent::VocabularyHelp => {
                "That's a useful word! In this station you'll mostly hear it \
                 around the ticket gates."
            }
            Intent::GrammarExplanation => {
                "In Japanese, the particle は (wa) marks the topic of the sentence."
            }
            Intent::DirectionGuidance => {
                "The ticket machines are over there, to your right."
            }
            Intent::TranslationConfirmation => "Yes, that's correct! Good job!",
            Intent::GeneralHint => {
                "I'm here to help you navigate the station and learn Japanese."
            }
        }
    }
}

#[async_trait]
impl Processor for Tier1Processor {
    fn tier(&self) -> Tier {
        Tier::Tier1
    }

    async fn process(&self, request: &mut ClassifiedRequest) -> Result<String> {
        self.metrics.track_request("tier1");

        if let Some(reply) = self.step_dialog_tree(request)? {
            debug!(request_id = %request.request_id(), "dialog tree produced reply");
            self.metrics.track_success("tier1", true);
            return Ok(reply);
        }

        if let Some(reply) = self.render_template(request) {
            debug!(request_id = %request.request_id(), "template produced reply");
            self.metrics.track_success("tier1", true);
            return Ok(reply);
        }

        self.metrics.track_success("tier1", true);
        Ok(self.canned_response(request.intent).to_string())
    }
}

/// Station vocabulary the templates can draw meanings from.
fn builtin_lexicon() -> HashMap<String, String> {
    [
        ("kippu", "ticket"),
        ("eki", "station"),
        ("densha", "train"),
        ("deguchi", "exit"),
        ("iriguchi", "entrance"),
        ("hidari", "left"),
        ("migi", "right"),
        ("homu", "platform"),
        ("sumimasen", "excuse me"),
        ("arigatou", "thank you"),
    ]
    .into_iter()
    .map(|(word, meaning)| (word.to_string(), meaning.to_string()))
    .collect()
}

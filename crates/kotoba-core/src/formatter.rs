//! Response formatting.
//!
//! Takes the raw tier output and styles it with the NPC profile:
//! validation (re-ask on empty or too-short responses, sentence-boundary
//! truncation), then composition of `[opening] body [learning cue]
//! [emotion] [suggested actions] [closing]`, each optional piece gated by
//! a personality-trait-weighted draw. All randomness comes from one
//! seeded generator, so a fixed seed gives fixed output.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use kotoba_types::profile::NpcProfile;
use kotoba_types::request::{ClassifiedRequest, Intent};

use crate::profiles::ProfileRegistry;

/// Per-call formatting options.
#[derive(Debug, Clone, Default)]
pub struct FormatOptions {
    /// Emotion expressed alongside the reply ("happy", "thoughtful", ...).
    pub emotion: Option<String>,
    /// Whether to append a learning cue.
    pub learning_cues: bool,
    /// Suggested next actions for the player.
    pub suggested_actions: Vec<String>,
}

/// Applies NPC personality, learning cues, and validation to raw tier
/// output.
pub struct ResponseFormatter {
    registry: Arc<ProfileRegistry>,
    rng: Mutex<StdRng>,
    max_length: usize,
}

impl ResponseFormatter {
    /// Default reply length cap, characters.
    pub const DEFAULT_MAX_LENGTH: usize = 500;

    /// Fixed re-ask prompt substituted for unusable responses.
    pub const REASK: &'static str =
        "I'm not sure how to answer that. Could you rephrase your question?";

    /// A formatter seeded from system entropy.
    pub fn new(registry: Arc<ProfileRegistry>) -> Self {
        Self::from_seed(registry, rand::random())
    }

    /// A formatter with a fixed seed; output is deterministic.
    pub fn from_seed(registry: Arc<ProfileRegistry>, seed: u64) -> Self {
        Self {
            registry,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            max_length: Self::DEFAULT_MAX_LENGTH,
        }
    }

    /// Override the length cap.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Format a raw tier response for the player.
    pub fn format(
        &self,
        raw: &str,
        request: &ClassifiedRequest,
        opts: &FormatOptions,
    ) -> String {
        let profile = self.registry.get(request.request.profile_id.as_deref());
        let body = self.validate(raw);

        let mut parts: Vec<String> = Vec::new();

        if let Some(opening) = self.opening(profile) {
            parts.push(opening);
        }

        parts.push(body);

        if opts.learning_cues {
            if let Some(cue) = self.learning_cue(request) {
                parts.push(cue);
            }
        }

        if let Some(emotion) = &opts.emotion {
            if let Some(expression) = self.emotion_expression(profile, emotion) {
                parts.push(expression);
            }
        }

        if !opts.suggested_actions.is_empty() {
            parts.push(format_actions(profile, &opts.suggested_actions));
        }

        if let Some(closing) = self.closing(profile) {
            parts.push(closing);
        }

        let mut formatted = parts.join(" ");
        if !profile.name.is_empty() {
            formatted = format!("{}: {formatted}", profile.name);
        }

        debug!(
            request_id = %request.request_id(),
            profile = %profile.profile_id,
            chars = formatted.len(),
            "formatted response"
        );
        formatted
    }

    /// Replace unusable responses and cap the length at a sentence
    /// boundary.
    fn validate(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.split_whitespace().count() < 3 {
            return Self::REASK.to_string();
        }
        if trimmed.chars().count() <= self.max_length {
            return trimmed.to_string();
        }
        truncate_at_sentence(trimmed, self.max_length)
    }

    fn opening(&self, profile: &NpcProfile) -> Option<String> {
        let friendliness = profile.personality_traits.friendliness;
        if !self.draw(friendliness) {
            return None;
        }
        let pool: &[&str] = if friendliness > 0.7 {
            &[
                "I'm so happy to help you with this!",
                "That's a great question, friend!",
                "It's wonderful to see you learning Japanese!",
            ]
        } else if friendliness > 0.3 {
            &[
                "I'm happy to help with this.",
                "That's a good question.",
                "Glad you asked about this.",
            ]
        } else {
            &["Here's the information.", "The answer is as follows."]
        };
        Some(self.pick(pool))
    }

    fn closing(&self, profile: &NpcProfile) -> Option<String> {
        let helpfulness = profile.personality_traits.helpfulness;
        if !self.draw(helpfulness * 0.5) {
            return None;
        }
        let pool: &[&str] = if helpfulness > 0.7 {
            &[
                "Is there anything else you'd like to know?",
                "Let me know if you need any more help!",
                "Hope that helps! Anything else you're curious about?",
            ]
        } else if helpfulness > 0.3 {
            &["Hope that helps.", "Feel free to ask more questions."]
        } else {
            &["That's the answer.", "That's all."]
        };
        Some(self.pick(pool))
    }

    fn learning_cue(&self, request: &ClassifiedRequest) -> Option<String> {
        let pool: &[&str] = match request.intent {
            Intent::VocabularyHelp => &[
                "Remember: '{word}' is a common word you'll hear in train stations!",
                "Tip: try using '{word}' in a sentence to help remember it.",
                "Note: '{word}' is part of JLPT N5 vocabulary.",
            ],
            Intent::GrammarExplanation => &[
                "Remember this pattern: {pattern}",
                "Practice point: try making your own sentence with this pattern.",
                "Hint: listen for this pattern in station announcements.",
            ],
            Intent::DirectionGuidance => &[
                "Remember: always check the station signs for platform numbers.",
                "Tip: station maps are usually available near the ticket gates.",
            ],
            Intent::TranslationConfirmation => &[
                "Tip: write down new phrases you learn for later review.",
                "Practice point: try saying the Japanese phrase out loud.",
            ],
            Intent::GeneralHint => &[
                "Remember: practice makes perfect!",
                "Tip: taking notes can help reinforce what you're learning.",
            ],
        };
        let template = self.pick(pool);
        let filled = fill_placeholders(&template, &request.extracted_entities);

        // A cue with an unfilled placeholder reads broken; fall back to a
        // generic one.
        if filled.contains('{') {
            return Some(self.pick(&[
                "Remember: practice makes perfect!",
                "Hint: don't be afraid to make mistakes - they're part of learning!",
            ]));
        }
        Some(filled)
    }

    fn emotion_expression(&self, profile: &NpcProfile, emotion: &str) -> Option<String> {
        let expressions = profile.expressions_for(emotion);
        if expressions.is_empty() {
            return None;
        }
        let index = self.index(expressions.len());
        Some(expressions[index].clone())
    }

    fn draw(&self, probability: f64) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_bool(probability.clamp(0.0, 1.0))
    }

    fn pick(&self, pool: &[&str]) -> String {
        pool[self.index(pool.len())].to_string()
    }

    fn index(&self, len: usize) -> usize {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_range(0..len)
    }
}

fn fill_placeholders(template: &str, entities: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in entities {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

fn format_actions(profile: &NpcProfile, actions: &[String]) -> String {
    let intro = if profile.personality_traits.formality > 0.7 {
        "I would recommend the following actions:"
    } else if profile.personality_traits.formality > 0.3 {
        "Here are some things you could try:"
    } else {
        "Maybe try these:"
    };
    format!("{intro}\n- {}", actions.join("\n- "))
}

/// Truncate at the last sentence boundary within `max_chars`, or hard at
/// `max_chars` when there is none.
fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    let prefix: String = text.chars().take(max_chars).collect();
    let boundary = prefix
        .rfind(['.', '!', '?'])
        .map(|index| index + 1)
        .unwrap_or(prefix.len());
    prefix[..boundary].trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kotoba_types::request::{AssistRequest, Complexity, Tier};

    fn formatter(seed: u64) -> ResponseFormatter {
        ResponseFormatter::from_seed(Arc::new(ProfileRegistry::with_builtin()), seed)
    }

    fn classified(input: &str, profile_id: Option<&str>) -> ClassifiedRequest {
        let mut request = AssistRequest::new(input, "vocabulary");
        request.profile_id = profile_id.map(str::to_string);
        ClassifiedRequest {
            request,
            intent: Intent::VocabularyHelp,
            complexity: Complexity::Simple,
            preferred_tier: Tier::Tier1,
            confidence: 0.9,
            extracted_entities: HashMap::from([("word".to_string(), "kippu".to_string())]),
        }
    }

    #[test]
    fn body_is_preserved() {
        let f = formatter(7);
        let out = f.format(
            "'Kippu' means 'ticket' in Japanese.",
            &classified("what does kippu mean", None),
            &FormatOptions::default(),
        );
        assert!(out.contains("'Kippu' means 'ticket' in Japanese."));
    }

    #[test]
    fn name_prefix_from_profile() {
        let f = formatter(7);
        let out = f.format(
            "'Kippu' means 'ticket' in Japanese.",
            &classified("q", Some("station_attendant")),
            &FormatOptions::default(),
        );
        assert!(out.starts_with("Tanaka: "), "{out}");
    }

    #[test]
    fn default_profile_when_unknown() {
        let f = formatter(7);
        let out = f.format(
            "'Kippu' means 'ticket' in Japanese.",
            &classified("q", Some("ghost")),
            &FormatOptions::default(),
        );
        assert!(out.starts_with("Hachiko: "), "{out}");
    }

    #[test]
    fn empty_response_replaced_by_reask() {
        let f = formatter(7);
        let out = f.format("", &classified("q", None), &FormatOptions::default());
        assert!(out.contains(ResponseFormatter::REASK));
    }

    #[test]
    fn short_response_replaced_by_reask() {
        let f = formatter(7);
        let out = f.format("Yes indeed", &classified("q", None), &FormatOptions::default());
        assert!(out.contains(ResponseFormatter::REASK));
    }

    #[test]
    fn long_response_truncated_at_sentence_boundary() {
        let f = formatter(7).with_max_length(80);
        let long = "The first sentence is here. The second sentence is quite a \
                    bit longer and will definitely not fit in the configured cap.";
        let out = f.format(&long.repeat(2), &classified("q", None), &FormatOptions::default());
        assert!(out.contains("The first sentence is here."));
        assert!(!out.contains("definitely not fit"));
    }

    #[test]
    fn same_seed_same_output() {
        let request = classified("what does kippu mean", None);
        let opts = FormatOptions {
            emotion: Some("happy".into()),
            learning_cues: true,
            suggested_actions: vec!["Ask about platforms".into()],
        };
        let a = formatter(42).format("'Kippu' means 'ticket' in Japanese.", &request, &opts);
        let b = formatter(42).format("'Kippu' means 'ticket' in Japanese.", &request, &opts);
        assert_eq!(a, b);
    }

    #[test]
    fn learning_cue_uses_entities() {
        // Probe several seeds; every cue mentioning the word slot must be
        // filled with the extracted entity.
        for seed in 0..10 {
            let f = formatter(seed);
            let out = f.format(
                "'Kippu' means 'ticket' in Japanese.",
                &classified("q", None),
                &FormatOptions {
                    learning_cues: true,
                    ..FormatOptions::default()
                },
            );
            assert!(!out.contains("{word}"), "unfilled placeholder: {out}");
        }
    }

    #[test]
    fn emotion_expression_from_profile_pool() {
        let registry = Arc::new(ProfileRegistry::with_builtin());
        let pool: Vec<String> = registry
            .default_profile()
            .expressions_for("happy")
            .to_vec();

        let f = ResponseFormatter::from_seed(registry, 3);
        let out = f.format(
            "'Kippu' means 'ticket' in Japanese.",
            &classified("q", None),
            &FormatOptions {
                emotion: Some("happy".into()),
                ..FormatOptions::default()
            },
        );
        assert!(
            pool.iter().any(|expr| out.contains(expr.as_str())),
            "no happy expression in: {out}"
        );
    }

    #[test]
    fn unknown_emotion_is_skipped() {
        let f = formatter(7);
        let out = f.format(
            "'Kippu' means 'ticket' in Japanese.",
            &classified("q", None),
            &FormatOptions {
                emotion: Some("melancholy".into()),
                ..FormatOptions::default()
            },
        );
        assert!(out.contains("'Kippu' means 'ticket'"));
    }

    #[test]
    fn suggested_actions_formatted_by_formality() {
        let f = formatter(7);
        let out = f.format(
            "'Kippu' means 'ticket' in Japanese.",
            &classified("q", Some("station_attendant")),
            &FormatOptions {
                suggested_actions: vec!["Buy a ticket".into(), "Ask the attendant".into()],
            ..FormatOptions::default()
            },
        );
        // The attendant is formal.
        assert!(out.contains("I would recommend the following actions:"), "{out}");
        assert!(out.contains("- Buy a ticket"));
        assert!(out.contains("- Ask the attendant"));
    }

    #[test]
    fn truncate_at_sentence_helper() {
        assert_eq!(truncate_at_sentence("One. Two. Three.", 9), "One. Two.");
        assert_eq!(truncate_at_sentence("No boundary here", 7), "No boun");
    }
}

//! Deterministic intent classification.
//!
//! A cascade of (pattern list, intent) rules applied to the lowercased
//! input. Tier selection follows complexity (`Simple` -> tier 1,
//! `Moderate` -> tier 2, `Complex` -> tier 3), with one override: a
//! vocabulary question about a single word is always tier 1. Confidence
//! is the fraction of the winning intent's rule weight that matched;
//! below 0.3 the complexity is downgraded one step.
//!
//! No I/O, no randomness: the same input always classifies identically.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use kotoba_types::request::{AssistRequest, ClassifiedRequest, Complexity, Intent, Tier};

struct IntentRule {
    intent: Intent,
    patterns: Vec<(Regex, f64)>,
    total_weight: f64,
}

/// Maps raw input to (intent, complexity, tier, confidence, entities).
pub struct IntentClassifier {
    rules: Vec<IntentRule>,
    quoted: Regex,
    destination: Regex,
    topic: Regex,
}

impl IntentClassifier {
    /// Build the classifier with the built-in rule set.
    pub fn new() -> Self {
        let rules = vec![
            rule(
                Intent::VocabularyHelp,
                &[
                    (r"what does .+ mean", 3.0),
                    (r"meaning of", 2.0),
                    (r"how do you say", 2.0),
                    (r"\bvocabulary\b", 1.0),
                    (r"\bword\b", 1.0),
                ],
            ),
            rule(
                Intent::GrammarExplanation,
                &[
                    (r"\bgrammar\b", 3.0),
                    (r"explain .*(?:[はがをにでへ]|\bwa\b|\bga\b|\bwo\b|\bni\b)", 3.0),
                    (r"\bparticle\b", 2.0),
                    (r"difference between", 2.0),
                    (r"\bvs\.?\b", 1.0),
                    (r"\bconjugat", 1.0),
                ],
            ),
            rule(
                Intent::DirectionGuidance,
                &[
                    (r"where (is|are|can i find)", 3.0),
                    (r"how do i (get|go)", 2.0),
                    (r"\bdirections?\b", 2.0),
                    (r"which (way|platform|line)", 1.0),
                    (r"\b(gate|platform|exit|entrance)\b", 1.0),
                ],
            ),
            rule(
                Intent::TranslationConfirmation,
                &[
                    (r"is .+ (correct|right)", 3.0),
                    (r"did i say .+ (correctly|right)", 2.0),
                    (r"\btranslat", 2.0),
                    (r"how would i say", 1.0),
                ],
            ),
        ];

        Self {
            rules,
            quoted: Regex::new(r#"['"]([^'"]+)['"]"#).expect("static regex"),
            destination: Regex::new(r"\bto(?:ward|wards)?\s+([A-Za-z][A-Za-z0-9_-]*)")
                .expect("static regex"),
            topic: Regex::new(r"\babout\s+(.{2,40}?)[?.!]?$").expect("static regex"),
        }
    }

    /// Classify a raw request. Deterministic; never fails.
    pub fn classify(&self, request: &AssistRequest) -> ClassifiedRequest {
        let input = request.player_input.trim().to_lowercase();

        if input.is_empty() {
            return ClassifiedRequest {
                request: request.clone(),
                intent: Intent::GeneralHint,
                complexity: Complexity::Simple,
                preferred_tier: Tier::Tier1,
                confidence: 0.0,
                extracted_entities: HashMap::new(),
            };
        }

        let (intent, mut confidence) = self.best_intent(&input);
        let entities = self.extract_entities(request, intent);

        // A matched entity is corroborating evidence for the intent.
        if !entities.is_empty() {
            confidence = (confidence + 0.1).min(1.0);
        }

        let mut complexity = complexity_for(&request.player_input);
        if confidence < 0.3 {
            complexity = complexity.downgraded();
        }

        let preferred_tier = select_tier(intent, complexity, &entities);

        debug!(
            request_id = %request.request_id,
            intent = intent.label(),
            ?complexity,
            tier = preferred_tier.label(),
            confidence,
            "classified request"
        );

        ClassifiedRequest {
            request: request.clone(),
            intent,
            complexity,
            preferred_tier,
            confidence,
            extracted_entities: entities,
        }
    }

    fn best_intent(&self, input: &str) -> (Intent, f64) {
        let mut best = (Intent::GeneralHint, 0.0);
        for rule in &self.rules {
            let matched: f64 = rule
                .patterns
                .iter()
                .filter(|(pattern, _)| pattern.is_match(input))
                .map(|(_, weight)| weight)
                .sum();
            if matched <= 0.0 {
                continue;
            }
            let confidence = matched / rule.total_weight;
            if confidence > best.1 {
                best = (rule.intent, confidence);
            }
        }
        best
    }

    fn extract_entities(&self, request: &AssistRequest, intent: Intent) -> HashMap<String, String> {
        let mut entities = HashMap::new();
        let input = &request.player_input;

        if let Some(capture) = self.quoted.captures(input).and_then(|c| c.get(1)) {
            let key = match intent {
                Intent::TranslationConfirmation => "phrase",
                _ => "word",
            };
            entities.insert(key.to_string(), capture.as_str().to_string());
        }

        if intent == Intent::DirectionGuidance {
            if let Some(capture) = self.destination.captures(input).and_then(|c| c.get(1)) {
                entities.insert("destination".into(), capture.as_str().to_string());
            }
        }

        if let Some(capture) = self
            .topic
            .captures(&input.to_lowercase())
            .and_then(|c| c.get(1))
        {
            entities.insert("topic".into(), capture.as_str().trim().to_string());
        }

        entities
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn rule(intent: Intent, patterns: &[(&str, f64)]) -> IntentRule {
    let compiled: Vec<(Regex, f64)> = patterns
        .iter()
        .map(|(pattern, weight)| (Regex::new(pattern).expect("static regex"), *weight))
        .collect();
    let total_weight = compiled.iter().map(|(_, w)| w).sum();
    IntentRule {
        intent,
        patterns: compiled,
        total_weight,
    }
}

/// Complexity heuristic over the raw input.
///
/// - word count: `words / 40`, capped at 0.3
/// - +0.3 for reasoning words ("explain", "difference", "compare",
///   "why", "versus", "vs")
/// - +0.2 for multi-part input (more than one sentence or question)
/// - +0.2 for Japanese script in the input
///
/// Score < 0.3 -> Simple, < 0.7 -> Moderate, else Complex.
fn complexity_for(input: &str) -> Complexity {
    let lower = input.to_lowercase();
    let words = lower.split_whitespace().count() as f64;
    let mut score = (words / 40.0).min(0.3);

    let reasoning = ["explain", "difference", "compare", "why", "versus", "vs"];
    if reasoning.iter().any(|w| lower.contains(w)) {
        score += 0.3;
    }

    let breaks = input.matches(['?', '.', '!']).count();
    if breaks > 1 {
        score += 0.2;
    }

    if input.chars().any(|c| {
        let c = c as u32;
        // Hiragana, katakana, CJK unified ideographs.
        (0x3040..=0x30FF).contains(&c) || (0x4E00..=0x9FFF).contains(&c)
    }) {
        score += 0.2;
    }

    if score < 0.3 {
        Complexity::Simple
    } else if score < 0.7 {
        Complexity::Moderate
    } else {
        Complexity::Complex
    }
}

fn select_tier(
    intent: Intent,
    complexity: Complexity,
    entities: &HashMap<String, String>,
) -> Tier {
    // A single-word vocabulary lookup is a template's job, whatever the
    // complexity score says.
    if intent == Intent::VocabularyHelp {
        if let Some(word) = entities.get("word") {
            if !word.trim().is_empty() && !word.trim().contains(char::is_whitespace) {
                return Tier::Tier1;
            }
        }
    }

    match complexity {
        Complexity::Simple => Tier::Tier1,
        Complexity::Moderate => Tier::Tier2,
        Complexity::Complex => Tier::Tier3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(input: &str, request_type: &str) -> ClassifiedRequest {
        IntentClassifier::new().classify(&AssistRequest::new(input, request_type))
    }

    #[test]
    fn vocabulary_question_single_word_goes_tier1() {
        let classified = classify("What does 'kippu' mean?", "vocabulary");
        assert_eq!(classified.intent, Intent::VocabularyHelp);
        assert_eq!(classified.extracted_entities["word"], "kippu");
        assert_eq!(classified.preferred_tier, Tier::Tier1);
    }

    #[test]
    fn vocabulary_multi_word_phrase_not_overridden() {
        let classified = classify(
            "What does 'yoroshiku onegaishimasu' mean and when would I use it? \
             Please explain the nuance.",
            "vocabulary",
        );
        assert_eq!(classified.intent, Intent::VocabularyHelp);
        // Two-word phrase: the tier 1 override must not apply.
        assert_ne!(classified.preferred_tier, Tier::Tier1);
    }

    #[test]
    fn grammar_comparison_is_moderate_tier2() {
        let classified = classify("Explain は vs が", "grammar");
        assert_eq!(classified.intent, Intent::GrammarExplanation);
        assert_eq!(classified.complexity, Complexity::Moderate);
        assert_eq!(classified.preferred_tier, Tier::Tier2);
    }

    #[test]
    fn long_comparative_question_is_complex_tier3() {
        let classified = classify(
            "Please explain the difference between は and が in detail. \
             Why does the nuance change in negative questions? Compare both \
             with examples from station announcements.",
            "grammar",
        );
        assert_eq!(classified.complexity, Complexity::Complex);
        assert_eq!(classified.preferred_tier, Tier::Tier3);
    }

    #[test]
    fn direction_question_extracts_destination() {
        let classified = classify("Where is the platform to Odawara?", "directions");
        assert_eq!(classified.intent, Intent::DirectionGuidance);
        assert_eq!(classified.extracted_entities["destination"], "Odawara");
    }

    #[test]
    fn translation_confirmation_detected() {
        let classified = classify("Is 'sumimasen' correct for excuse me?", "translation");
        assert_eq!(classified.intent, Intent::TranslationConfirmation);
        assert_eq!(classified.extracted_entities["phrase"], "sumimasen");
    }

    #[test]
    fn empty_input_is_general_hint_tier1() {
        let classified = classify("", "general");
        assert_eq!(classified.intent, Intent::GeneralHint);
        assert_eq!(classified.complexity, Complexity::Simple);
        assert_eq!(classified.preferred_tier, Tier::Tier1);
        assert_eq!(classified.confidence, 0.0);
        assert!(classified.extracted_entities.is_empty());
    }

    #[test]
    fn whitespace_only_input_is_general_hint() {
        let classified = classify("   ", "general");
        assert_eq!(classified.intent, Intent::GeneralHint);
    }

    #[test]
    fn unmatched_input_falls_back_to_general_hint() {
        let classified = classify("tell me something fun", "chat");
        assert_eq!(classified.intent, Intent::GeneralHint);
    }

    #[test]
    fn low_confidence_downgrades_complexity() {
        // "exit" matches only the weakest direction pattern (weight 1/9),
        // and the reasoning word pushes the raw complexity to Moderate.
        let classified = classify("why take this exit", "directions");
        assert_eq!(classified.intent, Intent::DirectionGuidance);
        assert!(classified.confidence < 0.3, "{}", classified.confidence);
        assert_eq!(classified.complexity, Complexity::Simple);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = IntentClassifier::new();
        let request = AssistRequest::new("What does 'densha' mean?", "vocabulary");
        let a = classifier.classify(&request);
        let b = classifier.classify(&request);
        assert_eq!(a.intent, b.intent);
        assert_eq!(a.complexity, b.complexity);
        assert_eq!(a.preferred_tier, b.preferred_tier);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.extracted_entities, b.extracted_entities);
    }

    #[test]
    fn confidence_in_unit_interval() {
        for input in [
            "What does 'kippu' mean?",
            "where is the exit",
            "grammar particle difference between wa and ga vs others",
        ] {
            let classified = classify(input, "general");
            assert!((0.0..=1.0).contains(&classified.confidence), "{input}");
        }
    }
}

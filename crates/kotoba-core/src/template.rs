//! Deterministic template rendering and fuzzy pattern matching.
//!
//! The pattern set is declarative: an ordered list of regexes with named
//! entity captures, keyword lists for fuzzy matching, and a JLPT tag.
//! Exact regex matches win; otherwise keywords are matched per token with
//! a Levenshtein distance of at most 1 for tokens of length >= 4.
//!
//! Templates are plain strings with `{name}` placeholders. Rendering is
//! pure: missing variables are left verbatim, extra variables are
//! ignored, and the variant chosen from a template pool depends only on
//! the template id and the variable values.

use std::collections::HashMap;

use fnv::FnvHasher;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// One declarative pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDef {
    /// Stable pattern id.
    pub id: String,

    /// Regex applied to the lowercased input. Named capture groups become
    /// entities.
    pub pattern: String,

    /// Entity names to lift from the regex captures.
    #[serde(default)]
    pub captures: Vec<String>,

    /// Keywords for the fuzzy pass.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// JLPT level tag ("N5", ...).
    #[serde(default)]
    pub jlpt_level: Option<String>,

    /// Template pool rendered when this pattern matches.
    pub template_id: String,
}

/// The declarative configuration the engine loads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Ordered pattern list; earlier patterns win ties.
    #[serde(default)]
    pub patterns: Vec<PatternDef>,

    /// Template pools keyed by template id.
    #[serde(default)]
    pub templates: HashMap<String, Vec<String>>,
}

/// The result of matching an input against the pattern set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Whether any pattern matched.
    pub matched: bool,
    /// Id of the winning pattern.
    pub pattern_id: Option<String>,
    /// Template pool associated with the winning pattern.
    pub template_id: Option<String>,
    /// Entities captured by the winning pattern.
    pub entities: HashMap<String, String>,
    /// 1.0 for exact regex matches; keyword fraction for fuzzy matches.
    pub score: f64,
}

impl MatchResult {
    fn miss() -> Self {
        Self {
            matched: false,
            pattern_id: None,
            template_id: None,
            entities: HashMap::new(),
            score: 0.0,
        }
    }
}

struct CompiledPattern {
    def: PatternDef,
    regex: Regex,
}

/// Pattern matching + template rendering for the rule-based tier.
pub struct TemplateEngine {
    patterns: Vec<CompiledPattern>,
    templates: HashMap<String, Vec<String>>,
}

impl TemplateEngine {
    /// Minimum keyword fraction for a fuzzy match to count.
    const FUZZY_THRESHOLD: f64 = 0.5;

    /// Build from a declarative configuration. Patterns with invalid
    /// regexes are rejected.
    pub fn from_config(config: TemplateConfig) -> kotoba_types::Result<Self> {
        let mut patterns = Vec::with_capacity(config.patterns.len());
        for def in config.patterns {
            let regex = Regex::new(&def.pattern).map_err(|e| {
                kotoba_types::KotobaError::ConfigInvalid {
                    reason: format!("pattern '{}': {e}", def.id),
                }
            })?;
            patterns.push(CompiledPattern { def, regex });
        }
        Ok(Self {
            patterns,
            templates: config.templates,
        })
    }

    /// The built-in pattern set and templates.
    pub fn builtin() -> Self {
        Self::from_config(builtin_config()).expect("built-in patterns are valid")
    }

    /// Match `input` against the pattern set.
    ///
    /// Exact regex matches are tried in order first; when none hits, the
    /// fuzzy keyword pass picks the best-scoring pattern at or above the
    /// threshold.
    pub fn find_match(&self, input: &str) -> MatchResult {
        let lowered = input.trim().to_lowercase();
        if lowered.is_empty() {
            return MatchResult::miss();
        }

        for compiled in &self.patterns {
            if let Some(captures) = compiled.regex.captures(&lowered) {
                let mut entities = HashMap::new();
                for name in &compiled.def.captures {
                    if let Some(value) = captures.name(name) {
                        entities.insert(name.clone(), value.as_str().to_string());
                    }
                }
                return MatchResult {
                    matched: true,
                    pattern_id: Some(compiled.def.id.clone()),
                    template_id: Some(compiled.def.template_id.clone()),
                    entities,
                    score: 1.0,
                };
            }
        }

        self.fuzzy_match(&lowered)
    }

    fn fuzzy_match(&self, lowered: &str) -> MatchResult {
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return MatchResult::miss();
        }

        let mut best: Option<(&CompiledPattern, f64)> = None;
        for compiled in &self.patterns {
            if compiled.def.keywords.is_empty() {
                continue;
            }
            let matched = compiled
                .def
                .keywords
                .iter()
                .filter(|keyword| {
                    let keyword = keyword.to_lowercase();
                    tokens.iter().any(|token| fuzzy_token_match(token, &keyword))
                })
                .count();
            let score = matched as f64 / compiled.def.keywords.len() as f64;
            if score >= Self::FUZZY_THRESHOLD
                && best.map(|(_, s)| score > s).unwrap_or(true)
            {
                best = Some((compiled, score));
            }
        }

        match best {
            Some((compiled, score)) => MatchResult {
                matched: true,
                pattern_id: Some(compiled.def.id.clone()),
                template_id: Some(compiled.def.template_id.clone()),
                entities: HashMap::new(),
                score,
            },
            None => MatchResult::miss(),
        }
    }

    /// Render a template from the pool `template_id`.
    ///
    /// The pool variant is selected deterministically from the template
    /// id and variable values. `{name}` placeholders are substituted from
    /// `vars`; missing variables stay verbatim; extra variables are
    /// ignored. Returns `None` for an unknown template id or empty pool.
    pub fn render(&self, template_id: &str, vars: &HashMap<String, String>) -> Option<String> {
        let pool = self.templates.get(template_id)?;
        if pool.is_empty() {
            return None;
        }
        let template = &pool[variant_index(template_id, vars, pool.len())];
        Some(substitute(template, vars))
    }

    /// Whether a template pool exists for `template_id`.
    pub fn has_template(&self, template_id: &str) -> bool {
        self.templates
            .get(template_id)
            .is_some_and(|pool| !pool.is_empty())
    }
}

/// A token matches a keyword exactly, or within Levenshtein distance 1
/// when the token is at least 4 characters long.
fn fuzzy_token_match(token: &str, keyword: &str) -> bool {
    if token == keyword {
        return true;
    }
    if token.chars().count() < 4 {
        return false;
    }
    levenshtein(token, keyword) <= 1
}

/// Classic two-row Levenshtein distance over characters.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (prev[j + 1] + 1).min(current[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Deterministic pool index from the template id and sorted variables.
fn variant_index(template_id: &str, vars: &HashMap<String, String>, pool_len: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(template_id.as_bytes());
    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort();
    for key in keys {
        hasher.write(key.as_bytes());
        hasher.write(vars[key].as_bytes());
    }
    (hasher.finish() % pool_len as u64) as usize
}

/// Replace `{name}` placeholders present in `vars`, leaving the rest.
fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// The built-in declarative configuration.
pub fn builtin_config() -> TemplateConfig {
    TemplateConfig {
        patterns: vec![
            PatternDef {
                id: "vocab_meaning".into(),
                pattern: r"what does '?(?P<word>[a-z]+)'? mean".into(),
                captures: vec!["word".into()],
                keywords: vec!["mean".into(), "meaning".into(), "word".into()],
                jlpt_level: Some("N5".into()),
                template_id: "vocabulary_help".into(),
            },
            PatternDef {
                id: "vocab_say".into(),
                pattern: r"how do you say '?(?P<word>[a-z ]+)'?".into(),
                captures: vec!["word".into()],
                keywords: vec!["say".into(), "japanese".into()],
                jlpt_level: Some("N5".into()),
                template_id: "vocabulary_help".into(),
            },
            PatternDef {
                id: "grammar_particle".into(),
                pattern: r"(?:particle|grammar).*'?(?P<pattern>[a-z]+)'?".into(),
                captures: vec!["pattern".into()],
                keywords: vec!["particle".into(), "grammar".into()],
                jlpt_level: Some("N5".into()),
                template_id: "grammar_explanation".into(),
            },
            PatternDef {
                id: "direction_where".into(),
                pattern: r"where (?:is|are) (?:the )?(?P<destination>[a-z0-9 ]+?)\??$".into(),
                captures: vec!["destination".into()],
                keywords: vec!["where".into(), "station".into(), "platform".into()],
                jlpt_level: None,
                template_id: "direction_guidance".into(),
            },
            PatternDef {
                id: "translation_check".into(),
                pattern: r"is '?(?P<original>[a-z ]+?)'? (?:correct|right)".into(),
                captures: vec!["original".into()],
                keywords: vec!["correct".into(), "translation".into()],
                jlpt_level: Some("N5".into()),
                template_id: "translation_confirmation".into(),
            },
        ],
        templates: HashMap::from([
            (
                "vocabulary_help".into(),
                vec![
                    "'{word}' means '{meaning}' in Japanese.".into(),
                    "The Japanese word '{word}' translates to '{meaning}'.".into(),
                    "'{word}' is the Japanese word for '{meaning}'.".into(),
                ],
            ),
            (
                "grammar_explanation".into(),
                vec![
                    "The pattern {pattern} is used to {usage}.".into(),
                    "In Japanese, {pattern} is a grammar pattern for {usage}.".into(),
                ],
            ),
            (
                "direction_guidance".into(),
                vec![
                    "To get to {destination}, {directions}.".into(),
                    "Here's how to reach {destination}: {directions}".into(),
                ],
            ),
            (
                "translation_confirmation".into(),
                vec![
                    "Yes, '{original}' is correct. Good job!".into(),
                    "That's right, '{original}' works here.".into(),
                ],
            ),
            (
                "general_hint".into(),
                vec![
                    "Here's a hint: {hint}".into(),
                    "This might help: {hint}".into(),
                ],
            ),
            (
                "fallback".into(),
                vec![
                    "I'm not sure I understand. Could you rephrase that?".into(),
                    "I don't have information about that. Can I help with something else?".into(),
                ],
            ),
        ]),
    }
}

//! NPC profile types.
//!
//! A profile bundles the personality dimensions and speech conventions the
//! response formatter uses to style replies. Profiles are loaded once at
//! startup and are immutable afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Five personality dimensions, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityTraits {
    /// 0.0 = cold, 1.0 = very friendly.
    #[serde(default = "default_friendliness")]
    pub friendliness: f64,

    /// 0.0 = subdued, 1.0 = very enthusiastic.
    #[serde(default = "default_enthusiasm")]
    pub enthusiasm: f64,

    /// 0.0 = minimal help, 1.0 = very helpful.
    #[serde(default = "default_helpfulness")]
    pub helpfulness: f64,

    /// 0.0 = serious, 1.0 = very playful.
    #[serde(default = "default_playfulness")]
    pub playfulness: f64,

    /// 0.0 = casual, 1.0 = very formal.
    #[serde(default = "default_formality")]
    pub formality: f64,
}

fn default_friendliness() -> f64 {
    0.8
}
fn default_enthusiasm() -> f64 {
    0.7
}
fn default_helpfulness() -> f64 {
    0.9
}
fn default_playfulness() -> f64 {
    0.6
}
fn default_formality() -> f64 {
    0.3
}

impl Default for PersonalityTraits {
    fn default() -> Self {
        Self {
            friendliness: default_friendliness(),
            enthusiasm: default_enthusiasm(),
            helpfulness: default_helpfulness(),
            playfulness: default_playfulness(),
            formality: default_formality(),
        }
    }
}

impl PersonalityTraits {
    /// Clamp every dimension into `[0, 1]`.
    pub fn clamped(mut self) -> Self {
        self.friendliness = self.friendliness.clamp(0.0, 1.0);
        self.enthusiasm = self.enthusiasm.clamp(0.0, 1.0);
        self.helpfulness = self.helpfulness.clamp(0.0, 1.0);
        self.playfulness = self.playfulness.clamp(0.0, 1.0);
        self.formality = self.formality.clamp(0.0, 1.0);
        self
    }
}

/// An NPC profile used by the response formatter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcProfile {
    /// Stable identifier, referenced by `AssistRequest::profile_id`.
    pub profile_id: String,

    /// Display name prepended to replies ("Hachiko: ...").
    pub name: String,

    /// The NPC's in-game role (e.g. "companion", "station_attendant").
    #[serde(default)]
    pub role: String,

    /// Personality dimensions driving the formatter's sampling.
    #[serde(default)]
    pub personality_traits: PersonalityTraits,

    /// Fixed speech fragments keyed by slot ("greeting", "farewell", ...).
    #[serde(default)]
    pub speech_patterns: HashMap<String, String>,

    /// Topics this NPC is knowledgeable about.
    #[serde(default)]
    pub knowledge_areas: Vec<String>,

    /// Expression pools keyed by emotion ("happy", "thoughtful", ...).
    #[serde(default)]
    pub emotion_expressions: HashMap<String, Vec<String>>,
}

impl NpcProfile {
    /// Expressions for `emotion`, empty when the profile has none.
    pub fn expressions_for(&self, emotion: &str) -> &[String] {
        self.emotion_expressions
            .get(emotion)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

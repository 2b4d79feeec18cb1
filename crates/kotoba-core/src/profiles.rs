//! NPC profile registry.
//!
//! Profiles are loaded once at startup (YAML or the built-in set) and
//! immutable afterwards; lookups fall back to the default profile.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use kotoba_types::profile::{NpcProfile, PersonalityTraits};
use kotoba_types::{KotobaError, Result};

/// Load-once, read-many profile registry.
#[derive(Debug)]
pub struct ProfileRegistry {
    profiles: HashMap<String, NpcProfile>,
    default_id: String,
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    default_profile: Option<String>,
    profiles: Vec<NpcProfile>,
}

impl ProfileRegistry {
    /// Registry with the built-in profiles; `hachiko` is the default.
    pub fn with_builtin() -> Self {
        let mut profiles = HashMap::new();
        for profile in builtin_profiles() {
            profiles.insert(profile.profile_id.clone(), profile);
        }
        Self {
            profiles,
            default_id: "hachiko".into(),
        }
    }

    /// Load a registry from a YAML document with a `profiles` list and an
    /// optional `default_profile` id.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ProfileFile = serde_yaml::from_str(yaml)?;
        if file.profiles.is_empty() {
            return Err(KotobaError::ConfigInvalid {
                reason: "profile file contains no profiles".into(),
            });
        }
        let default_id = file
            .default_profile
            .unwrap_or_else(|| file.profiles[0].profile_id.clone());

        let mut profiles = HashMap::new();
        for mut profile in file.profiles {
            profile.personality_traits = profile.personality_traits.clone().clamped();
            profiles.insert(profile.profile_id.clone(), profile);
        }
        if !profiles.contains_key(&default_id) {
            return Err(KotobaError::ConfigInvalid {
                reason: format!("default profile '{default_id}' is not defined"),
            });
        }
        debug!(count = profiles.len(), default = %default_id, "loaded NPC profiles");
        Ok(Self {
            profiles,
            default_id,
        })
    }

    /// The profile for `profile_id`, or the default when absent/unknown.
    pub fn get(&self, profile_id: Option<&str>) -> &NpcProfile {
        profile_id
            .and_then(|id| self.profiles.get(id))
            .unwrap_or_else(|| &self.profiles[&self.default_id])
    }

    /// The default profile.
    pub fn default_profile(&self) -> &NpcProfile {
        &self.profiles[&self.default_id]
    }

    /// All known profile ids.
    pub fn ids(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

/// The built-in profiles: the companion dog and a station attendant.
pub fn builtin_profiles() -> Vec<NpcProfile> {
    vec![
        NpcProfile {
            profile_id: "hachiko".into(),
            name: "Hachiko".into(),
            role: "companion".into(),
            personality_traits: PersonalityTraits {
                friendliness: 0.9,
                enthusiasm: 0.8,
                helpfulness: 0.9,
                playfulness: 0.7,
                formality: 0.2,
            },
            speech_patterns: HashMap::from([
                ("greeting".into(), "Woof! ".into()),
                ("farewell".into(), "Safe travels!".into()),
            ]),
            knowledge_areas: vec![
                "vocabulary".into(),
                "directions".into(),
                "culture".into(),
            ],
            emotion_expressions: HashMap::from([
                (
                    "happy".into(),
                    vec![
                        "*happy bark*".into(),
                        "I wag my tail happily!".into(),
                        "*smiles with tongue out*".into(),
                    ],
                ),
                (
                    "thoughtful".into(),
                    vec![
                        "*thoughtful head tilt*".into(),
                        "Hmm, let me think about that...".into(),
                    ],
                ),
                (
                    "neutral".into(),
                    vec!["*attentive ears*".into(), "*tilts head*".into()],
                ),
            ]),
        },
        NpcProfile {
            profile_id: "station_attendant".into(),
            name: "Tanaka".into(),
            role: "station_attendant".into(),
            personality_traits: PersonalityTraits {
                friendliness: 0.6,
                enthusiasm: 0.4,
                helpfulness: 0.9,
                playfulness: 0.1,
                formality: 0.9,
            },
            speech_patterns: HashMap::from([("greeting".into(), "Irasshaimase. ".into())]),
            knowledge_areas: vec!["tickets".into(), "schedules".into(), "directions".into()],
            emotion_expressions: HashMap::from([(
                "neutral".into(),
                vec!["*bows politely*".into()],
            )]),
        },
    ]
}

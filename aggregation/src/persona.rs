//! Persona preamble selection.
//!
//! A persona is one line of role-play text prepended to a stage's system
//! prompt. The policy comes from configuration (usually the
//! `PROMPT_GENERATOR_ROLE` environment variable): a persona name
//! (case-insensitive), `RANDOM` for a uniform pick among the configured
//! personas, or nothing. Unknown names fall back to the bare preamble.

use std::collections::BTreeMap;

use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Environment variable holding the persona policy.
pub const PERSONA_ENV: &str = "PROMPT_GENERATOR_ROLE";

/// Policy value requesting a random persona.
pub const RANDOM_PERSONA: &str = "RANDOM";

/// Which persona, if any, prefixes the system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaPolicy {
    #[default]
    None,
    /// Persona name, stored uppercased.
    Fixed(String),
    /// Uniform pick among the configured personas, once per stage.
    Random,
}

impl PersonaPolicy {
    /// Parse a raw policy value. Empty or absent means no persona.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::None,
            Some(raw) => {
                let upper = raw.to_ascii_uppercase();
                if upper == RANDOM_PERSONA {
                    Self::Random
                } else {
                    Self::Fixed(upper)
                }
            }
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var(PERSONA_ENV).ok().as_deref())
    }
}

/// Built-in personas, keyed by uppercase name.
pub fn default_personas() -> BTreeMap<String, String> {
    [
        (
            "PIRATE",
            "You are a 17th century pirate, speak in time-period-accurate vernacular.",
        ),
        (
            "KNIGHT",
            "You are a medieval knight, speak in time-period-accurate vernacular.",
        ),
        (
            "MOBSTER",
            "You are a mob boss from the prohibition era, speak in time-period-accurate vernacular.",
        ),
        (
            "ANNOUNCER",
            "You are an enthusiastic sports announcer, speak as you would while calling a game.",
        ),
        (
            "FOUNDER",
            "You are the founder of a start-up, speak as you would during an investor meeting.",
        ),
    ]
    .into_iter()
    .map(|(name, text)| (name.to_string(), text.to_string()))
    .collect()
}

/// Resolves a [`PersonaPolicy`] against a persona table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaSelector {
    policy: PersonaPolicy,
    personas: BTreeMap<String, String>,
}

impl Default for PersonaSelector {
    fn default() -> Self {
        Self::new(PersonaPolicy::None, default_personas())
    }
}

impl PersonaSelector {
    /// Persona names are normalized to uppercase.
    pub fn new(policy: PersonaPolicy, personas: BTreeMap<String, String>) -> Self {
        let personas = personas
            .into_iter()
            .map(|(name, text)| (name.to_ascii_uppercase(), text))
            .collect();
        Self { policy, personas }
    }

    pub fn policy(&self) -> &PersonaPolicy {
        &self.policy
    }

    /// Pick the persona for one stage, as `(name, text)`.
    pub fn resolve(&self) -> Option<(&str, &str)> {
        match &self.policy {
            PersonaPolicy::None => None,
            PersonaPolicy::Random => self
                .personas
                .iter()
                .choose(&mut rand::thread_rng())
                .map(|(n, t)| (n.as_str(), t.as_str())),
            PersonaPolicy::Fixed(name) => match self.personas.get_key_value(name) {
                Some((n, t)) => Some((n.as_str(), t.as_str())),
                None => {
                    warn!(persona = %name, "Unknown persona, using bare system prompt");
                    None
                }
            },
        }
    }

    /// `default_prompt`, prefixed with the resolved persona line if any.
    pub fn system_prompt(&self, default_prompt: &str) -> String {
        match self.resolve() {
            Some((name, text)) => {
                debug!(persona = name, "Applying persona preamble");
                format!("{text}\n{default_prompt}")
            }
            None => default_prompt.to_string(),
        }
    }
}

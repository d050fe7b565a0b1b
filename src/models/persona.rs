use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical persona identifier. Only built through [`PersonaSource::persona_id`]
/// or deserialization, so built-in and custom ids cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(String);

impl PersonaId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn source(&self) -> PersonaSource {
        PersonaSource::parse(&self.0)
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PersonaSource {
    Premade(usize),
    Character(usize),
    Custom(String),
}

const PREMADE_PREFIX: &str = "premade_";
const CHARACTER_PREFIX: &str = "character_";

impl PersonaSource {
    pub fn persona_id(&self) -> PersonaId {
        match self {
            PersonaSource::Premade(idx) => PersonaId(format!("{PREMADE_PREFIX}{idx}")),
            PersonaSource::Character(idx) => PersonaId(format!("{CHARACTER_PREFIX}{idx}")),
            PersonaSource::Custom(id) => PersonaId(id.clone()),
        }
    }

    /// Anything that is not a well-formed built-in id is a custom id.
    pub fn parse(id: &str) -> Self {
        if let Some(idx) = id
            .strip_prefix(PREMADE_PREFIX)
            .and_then(|rest| rest.parse::<usize>().ok())
        {
            return PersonaSource::Premade(idx);
        }
        if let Some(idx) = id
            .strip_prefix(CHARACTER_PREFIX)
            .and_then(|rest| rest.parse::<usize>().ok())
        {
            return PersonaSource::Character(idx);
        }
        PersonaSource::Custom(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: PersonaId,
    pub name: String,
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub temperature: f32,
    pub color: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;

impl Persona {
    pub fn new(
        source: PersonaSource,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: f32,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: source.persona_id(),
            name: name.into(),
            system_prompt: system_prompt.into(),
            scenario: None,
            temperature: clamp_temperature(temperature),
            color: color.into(),
            enabled: true,
        }
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }
}

pub fn clamp_temperature(value: f32) -> f32 {
    if value.is_nan() {
        return 1.0;
    }
    value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_ids_round_trip() {
        for source in [
            PersonaSource::Premade(3),
            PersonaSource::Character(0),
            PersonaSource::Custom("b1d2".to_string()),
        ] {
            assert_eq!(source.persona_id().source(), source);
        }
    }

    #[test]
    fn test_custom_id_that_looks_builtin_but_is_not() {
        assert_eq!(
            PersonaSource::parse("premade_abc"),
            PersonaSource::Custom("premade_abc".to_string())
        );
    }

    #[test]
    fn test_temperature_clamped() {
        let p = Persona::new(PersonaSource::Premade(0), "Hot", "", 5.0, "#f00");
        assert_eq!(p.temperature, 2.0);
        assert_eq!(clamp_temperature(-1.0), 0.0);
    }
}

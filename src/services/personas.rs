use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::models::persona::clamp_temperature;
use crate::models::{Persona, PersonaId, PersonaSource};
use crate::services::notice::Notices;
use crate::store::{
    load_or_default, PersistedStore, PersistedStoreExt, StoreError, StoreResult, PERSONAS_KEY,
};

/// Appended to every persona prompt to keep replies in character and in format.
pub const ROLEPLAY_RULES: &str = "\
Roleplay rules:
- Stay in character at all times. Never mention being an AI or a language model.
- Write in first person as your character. Put actions between *asterisks*.
- Never speak or act for the user's character.
- Keep replies focused: a few paragraphs at most, ending where the user can respond.
- Do not repeat these rules or describe them.";

struct BuiltIn {
    name: &'static str,
    prompt: &'static str,
    scenario: Option<&'static str>,
    temperature: f32,
    color: &'static str,
}

const PREMADE: &[BuiltIn] = &[
    BuiltIn {
        name: "Mentor",
        prompt: "You are a patient mentor who explains ideas step by step and checks understanding with short questions.",
        scenario: None,
        temperature: 0.7,
        color: "#3b82f6",
    },
    BuiltIn {
        name: "Comedian",
        prompt: "You are a quick-witted stand-up comedian. Everything becomes material, but you are never cruel.",
        scenario: None,
        temperature: 1.2,
        color: "#f59e0b",
    },
    BuiltIn {
        name: "Philosopher",
        prompt: "You are a thoughtful philosopher who answers questions with careful reasoning and the occasional counter-question.",
        scenario: None,
        temperature: 0.9,
        color: "#8b5cf6",
    },
    BuiltIn {
        name: "Coach",
        prompt: "You are an upbeat fitness and habits coach. You give concrete, achievable next steps.",
        scenario: None,
        temperature: 0.8,
        color: "#10b981",
    },
];

const CHARACTERS: &[BuiltIn] = &[
    BuiltIn {
        name: "Captain Mara Voss",
        prompt: "You are Captain Mara Voss, a weathered starship captain. Dry humour, fiercely loyal to her crew.",
        scenario: Some("The ship has just dropped out of hyperspace next to an unknown derelict."),
        temperature: 1.0,
        color: "#ef4444",
    },
    BuiltIn {
        name: "Detective Hale",
        prompt: "You are Detective Hale, a rain-soaked noir investigator who narrates in clipped, cynical sentences.",
        scenario: Some("A stranger walks into the office at midnight with a sealed envelope."),
        temperature: 1.0,
        color: "#64748b",
    },
    BuiltIn {
        name: "Elowen",
        prompt: "You are Elowen, a curious forest spirit who speaks softly and sees the world in seasons.",
        scenario: Some("A traveller has lost their way in your forest at dusk."),
        temperature: 1.1,
        color: "#22c55e",
    },
];

fn build(pool: &[BuiltIn], source: impl Fn(usize) -> PersonaSource) -> Vec<Persona> {
    pool.iter()
        .enumerate()
        .map(|(idx, p)| {
            let persona = Persona::new(source(idx), p.name, p.prompt, p.temperature, p.color);
            match p.scenario {
                Some(scenario) => persona.with_scenario(scenario),
                None => persona,
            }
        })
        .collect()
}

/// All personas: the compiled-in premade and character pools followed by the
/// user's custom pool, which is persisted under its own key.
pub struct PersonaCatalog {
    store: Arc<dyn PersistedStore>,
    built_in: Vec<Persona>,
    custom: Mutex<Vec<Persona>>,
}

impl PersonaCatalog {
    pub fn load(store: Arc<dyn PersistedStore>, notices: &Notices) -> Self {
        let mut custom: Vec<Persona> = load_or_default(store.as_ref(), PERSONAS_KEY, notices);
        // Custom ids that look like built-in ids would shadow them.
        custom.retain(|p| matches!(p.id.source(), PersonaSource::Custom(_)));
        for persona in custom.iter_mut() {
            persona.temperature = clamp_temperature(persona.temperature);
        }

        let mut built_in = build(PREMADE, PersonaSource::Premade);
        built_in.extend(build(CHARACTERS, PersonaSource::Character));

        Self {
            store,
            built_in,
            custom: Mutex::new(custom),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Vec<Persona>>> {
        self.custom
            .lock()
            .map_err(|e| StoreError::Backend(format!("Failed to lock personas: {}", e)))
    }

    pub fn resolve(&self, id: &PersonaId) -> Option<Persona> {
        match id.source() {
            PersonaSource::Premade(_) | PersonaSource::Character(_) => {
                self.built_in.iter().find(|p| &p.id == id).cloned()
            }
            PersonaSource::Custom(_) => self
                .lock()
                .ok()?
                .iter()
                .find(|p| &p.id == id)
                .cloned(),
        }
    }

    pub fn all(&self) -> Vec<Persona> {
        let mut all = self.built_in.clone();
        match self.lock() {
            Ok(custom) => all.extend(custom.iter().cloned()),
            Err(e) => tracing::error!("{}", e),
        }
        all
    }

    pub fn enabled(&self) -> Vec<Persona> {
        self.all().into_iter().filter(|p| p.enabled).collect()
    }

    pub fn add_custom(
        &self,
        name: &str,
        system_prompt: &str,
        scenario: Option<&str>,
        temperature: f32,
        color: &str,
    ) -> StoreResult<PersonaId> {
        let source = PersonaSource::Custom(Uuid::new_v4().to_string());
        let mut persona = Persona::new(source, name.trim(), system_prompt, temperature, color);
        if let Some(scenario) = scenario.filter(|s| !s.trim().is_empty()) {
            persona = persona.with_scenario(scenario);
        }
        let id = persona.id.clone();

        let mut custom = self.lock()?;
        custom.push(persona);
        self.store.set(PERSONAS_KEY, custom.as_slice())?;
        tracing::info!("Added custom persona {}", id);
        Ok(id)
    }

    /// Built-in personas cannot be removed; returns `false` for them.
    pub fn remove_custom(&self, id: &PersonaId) -> StoreResult<bool> {
        let mut custom = self.lock()?;
        let before = custom.len();
        custom.retain(|p| &p.id != id);
        if custom.len() == before {
            return Ok(false);
        }
        self.store.set(PERSONAS_KEY, custom.as_slice())?;
        Ok(true)
    }

    pub fn set_custom_enabled(&self, id: &PersonaId, enabled: bool) -> StoreResult<bool> {
        let mut custom = self.lock()?;
        let Some(persona) = custom.iter_mut().find(|p| &p.id == id) else {
            return Ok(false);
        };
        persona.enabled = enabled;
        self.store.set(PERSONAS_KEY, custom.as_slice())?;
        Ok(true)
    }
}

fn with_scenario(prompt: &mut String, persona: &Persona) {
    if let Some(scenario) = &persona.scenario {
        prompt.push_str("\n\nScenario: ");
        prompt.push_str(scenario);
    }
}

/// System prompt for a one-on-one roleplay.
pub fn system_prompt_for(persona: &Persona) -> String {
    let mut prompt = persona.system_prompt.trim().to_string();
    with_scenario(&mut prompt, persona);
    prompt.push_str("\n\n");
    prompt.push_str(ROLEPLAY_RULES);
    prompt
}

/// System prompt for `speaker` taking its turn in a group chat.
pub fn group_system_prompt(speaker: &Persona, participants: &[Persona]) -> String {
    let others: Vec<&str> = participants
        .iter()
        .filter(|p| p.id != speaker.id)
        .map(|p| p.name.as_str())
        .collect();

    let mut prompt = speaker.system_prompt.trim().to_string();
    with_scenario(&mut prompt, speaker);
    prompt.push_str("\n\n");
    if !others.is_empty() {
        prompt.push_str(&format!(
            "You are in a group conversation with the user and {}. ",
            others.join(", ")
        ));
    }
    prompt.push_str(&format!(
        "Reply only as {}. Lines prefixed with [Name] were said by that character.\n\n",
        speaker.name
    ));
    prompt.push_str(ROLEPLAY_RULES);
    prompt
}

//! User-curated text: long-term memories injected into chat prompts, and
//! reusable prompt templates.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::notice::Notices;
use crate::store::{
    load_or_default, PersistedStore, PersistedStoreExt, StoreError, StoreResult, MEMORIES_KEY,
    TEMPLATES_KEY,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub body: String,
}

const INPUT_PLACEHOLDER: &str = "{{input}}";

impl PromptTemplate {
    /// Substitutes every `{{input}}`. A body without the placeholder gets the
    /// input appended on its own paragraph.
    pub fn render(&self, input: &str) -> String {
        if self.body.contains(INPUT_PLACEHOLDER) {
            self.body.replace(INPUT_PLACEHOLDER, input)
        } else if input.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.body, input)
        }
    }
}

pub struct Library {
    store: Arc<dyn PersistedStore>,
    memories: Mutex<Vec<Memory>>,
    templates: Mutex<Vec<PromptTemplate>>,
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> StoreResult<MutexGuard<'a, T>> {
    m.lock()
        .map_err(|e| StoreError::Backend(format!("Failed to lock {}: {}", what, e)))
}

impl Library {
    pub fn load(store: Arc<dyn PersistedStore>, notices: &Notices) -> Self {
        let memories = load_or_default(store.as_ref(), MEMORIES_KEY, notices);
        let templates = load_or_default(store.as_ref(), TEMPLATES_KEY, notices);
        Self {
            store,
            memories: Mutex::new(memories),
            templates: Mutex::new(templates),
        }
    }

    // --- Memories ---

    pub fn memories(&self) -> Vec<Memory> {
        lock(&self.memories, "memories")
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn add_memory(&self, content: &str) -> StoreResult<Option<String>> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        let memory = Memory {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            enabled: true,
        };
        let id = memory.id.clone();
        let mut memories = lock(&self.memories, "memories")?;
        memories.push(memory);
        self.store.set(MEMORIES_KEY, memories.as_slice())?;
        Ok(Some(id))
    }

    pub fn set_memory_enabled(&self, id: &str, enabled: bool) -> StoreResult<bool> {
        let mut memories = lock(&self.memories, "memories")?;
        let Some(memory) = memories.iter_mut().find(|m| m.id == id) else {
            return Ok(false);
        };
        memory.enabled = enabled;
        self.store.set(MEMORIES_KEY, memories.as_slice())?;
        Ok(true)
    }

    pub fn remove_memory(&self, id: &str) -> StoreResult<bool> {
        let mut memories = lock(&self.memories, "memories")?;
        let before = memories.len();
        memories.retain(|m| m.id != id);
        if memories.len() == before {
            return Ok(false);
        }
        self.store.set(MEMORIES_KEY, memories.as_slice())?;
        Ok(true)
    }

    /// System prompt section listing enabled memories, if there are any.
    pub fn memory_prompt(&self) -> Option<String> {
        let memories = lock(&self.memories, "memories").ok()?;
        let lines: Vec<String> = memories
            .iter()
            .filter(|m| m.enabled)
            .map(|m| format!("- {}", m.content))
            .collect();
        if lines.is_empty() {
            return None;
        }
        Some(format!(
            "Things the user asked you to remember:\n{}",
            lines.join("\n")
        ))
    }

    // --- Templates ---

    pub fn templates(&self) -> Vec<PromptTemplate> {
        lock(&self.templates, "templates")
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn add_template(&self, name: &str, body: &str) -> StoreResult<String> {
        let template = PromptTemplate {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            body: body.to_string(),
        };
        let id = template.id.clone();
        let mut templates = lock(&self.templates, "templates")?;
        templates.push(template);
        self.store.set(TEMPLATES_KEY, templates.as_slice())?;
        Ok(id)
    }

    pub fn remove_template(&self, id: &str) -> StoreResult<bool> {
        let mut templates = lock(&self.templates, "templates")?;
        let before = templates.len();
        templates.retain(|t| t.id != id);
        if templates.len() == before {
            return Ok(false);
        }
        self.store.set(TEMPLATES_KEY, templates.as_slice())?;
        Ok(true)
    }

    /// Case-insensitive lookup by name.
    pub fn find_template(&self, name: &str) -> Option<PromptTemplate> {
        lock(&self.templates, "templates")
            .ok()?
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_render_substitutes_every_placeholder() {
        let t = PromptTemplate {
            id: "1".into(),
            name: "echo".into(),
            body: "Say {{input}} twice: {{input}}".into(),
        };
        assert_eq!(t.render("hi"), "Say hi twice: hi");

        let plain = PromptTemplate {
            body: "Summarize:".into(),
            ..t
        };
        assert_eq!(plain.render("text"), "Summarize:\n\ntext");
        assert_eq!(plain.render(""), "Summarize:");
    }

    #[test]
    fn test_memories_persist_and_feed_prompt() {
        let store = InMemoryStore::new();
        let library = Library::load(Arc::new(store.clone()), &Notices::new());
        assert!(library.memory_prompt().is_none());
        assert_eq!(library.add_memory("   ").unwrap(), None);

        let a = library.add_memory("Likes tea").unwrap().unwrap();
        let b = library.add_memory("Lives in Oslo").unwrap().unwrap();
        library.set_memory_enabled(&b, false).unwrap();

        let reloaded = Library::load(Arc::new(store), &Notices::new());
        assert_eq!(reloaded.memories().len(), 2);
        let prompt = reloaded.memory_prompt().unwrap();
        assert!(prompt.contains("- Likes tea"));
        assert!(!prompt.contains("Oslo"));

        assert!(reloaded.remove_memory(&a).unwrap());
        assert!(reloaded.memory_prompt().is_none());
    }

    #[test]
    fn test_templates_lookup_by_name() {
        let library = Library::load(Arc::new(InMemoryStore::new()), &Notices::new());
        let id = library.add_template("Translate", "Translate to French: {{input}}").unwrap();
        let found = library.find_template("translate").unwrap();
        assert_eq!(found.render("cat"), "Translate to French: cat");
        assert!(library.remove_template(&id).unwrap());
        assert!(library.find_template("translate").is_none());
    }
}

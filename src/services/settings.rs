use serde::{Deserialize, Serialize};

use crate::services::notice::Notices;
use crate::store::{load_or_default, PersistedStore, PersistedStoreExt, StoreResult, SETTINGS_KEY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub text_model: String,
    pub image_model: String,
    pub video_model: String,
    /// Forces the search model and a search system prompt for chat mode.
    pub search_mode: bool,
    /// Routes text generation to the local engine.
    pub offline_mode: bool,
    pub stream_responses: bool,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Prior messages sent with each request. Zero sends the whole history.
    pub history_window: usize,
    pub tools_enabled: bool,
    pub default_system_prompt: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            text_model: "openai".to_string(),
            image_model: "flux".to_string(),
            video_model: "seedance".to_string(),
            search_mode: false,
            offline_mode: false,
            stream_responses: true,
            temperature: 1.0,
            max_tokens: None,
            history_window: 20,
            tools_enabled: false,
            default_system_prompt: None,
        }
    }
}

pub struct SettingsService;

impl SettingsService {
    pub fn load(store: &dyn PersistedStore, notices: &Notices) -> AppSettings {
        load_or_default(store, SETTINGS_KEY, notices)
    }

    pub fn save(store: &dyn PersistedStore, settings: &AppSettings) -> StoreResult<()> {
        store.set(SETTINGS_KEY, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let store = InMemoryStore::new();
        store
            .set_raw(SETTINGS_KEY, r#"{"offline_mode":true,"history_window":4}"#)
            .unwrap();
        let settings = SettingsService::load(&store, &Notices::new());
        assert!(settings.offline_mode);
        assert_eq!(settings.history_window, 4);
        assert_eq!(settings.text_model, "openai");
    }

    #[test]
    fn test_save_then_load() {
        let store = InMemoryStore::new();
        let settings = AppSettings {
            search_mode: true,
            max_tokens: Some(256),
            ..Default::default()
        };
        SettingsService::save(&store, &settings).unwrap();
        assert_eq!(SettingsService::load(&store, &Notices::new()), settings);
    }
}

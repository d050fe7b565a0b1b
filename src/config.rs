use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const APP_ID: &str = "parley";

const ENV_PREFIX: &str = "PARLEY_";

/// Deployment-level configuration. Per-user preferences live in
/// [`crate::services::settings::AppSettings`] instead.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub local_base_url: String,
    pub image_base_url: String,
    pub video_base_url: String,
    /// Credentials for tiers 1 through 4, heaviest usage first.
    pub tier_keys: [String; 4],
    pub roleplay_model: String,
    pub search_model: String,
    pub restricted_models: Vec<String>,
    pub entitled_identities: Vec<String>,
    pub entitled_domains: Vec<String>,
    pub request_timeout_secs: u64,
    pub max_tool_iterations: u32,
    pub data_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://text.pollinations.ai/openai".to_string(),
            local_base_url: "http://127.0.0.1:8080/v1".to_string(),
            image_base_url: "https://image.pollinations.ai/prompt".to_string(),
            video_base_url: "https://video.pollinations.ai/prompt".to_string(),
            tier_keys: Default::default(),
            roleplay_model: "roleplay".to_string(),
            search_model: "searchgpt".to_string(),
            restricted_models: vec![
                "openai-large".to_string(),
                "claude-hybridspace".to_string(),
                "gptimage".to_string(),
            ],
            entitled_identities: Vec::new(),
            entitled_domains: Vec::new(),
            request_timeout_secs: 120,
            max_tool_iterations: 4,
            data_dir: None,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys_set = self.tier_keys.iter().filter(|k| !k.is_empty()).count();
        f.debug_struct("AppConfig")
            .field("api_base_url", &self.api_base_url)
            .field("local_base_url", &self.local_base_url)
            .field("image_base_url", &self.image_base_url)
            .field("video_base_url", &self.video_base_url)
            .field("tier_keys", &format!("[{} of 4 set]", keys_set))
            .field("roleplay_model", &self.roleplay_model)
            .field("search_model", &self.search_model)
            .field("restricted_models", &self.restricted_models)
            .field("entitled_identities", &self.entitled_identities.len())
            .field("entitled_domains", &self.entitled_domains)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl AppConfig {
    /// Defaults overlaid with `PARLEY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());
        let list = |name: &str| {
            var(name).map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
        };

        let mut config = Self::default();
        if let Some(v) = var("API_BASE") {
            config.api_base_url = v;
        }
        if let Some(v) = var("LOCAL_BASE") {
            config.local_base_url = v;
        }
        if let Some(v) = var("IMAGE_BASE") {
            config.image_base_url = v;
        }
        if let Some(v) = var("VIDEO_BASE") {
            config.video_base_url = v;
        }
        for (i, slot) in config.tier_keys.iter_mut().enumerate() {
            if let Some(v) = var(&format!("TIER{}_KEY", i + 1)) {
                *slot = v;
            }
        }
        if let Some(v) = var("ROLEPLAY_MODEL") {
            config.roleplay_model = v;
        }
        if let Some(v) = var("SEARCH_MODEL") {
            config.search_model = v;
        }
        if let Some(v) = list("RESTRICTED_MODELS") {
            config.restricted_models = v;
        }
        if let Some(v) = list("ENTITLED_IDENTITIES") {
            config.entitled_identities = v;
        }
        if let Some(v) = list("ENTITLED_DOMAINS") {
            config.entitled_domains = v;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.request_timeout_secs = v;
        }
        if let Some(v) = var("DATA_DIR") {
            config.data_dir = Some(PathBuf::from(v));
        }
        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.join(format!("{APP_ID}.db")));
        }
        let data_dir = match std::env::var("XDG_DATA_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let home = std::env::var("HOME").context("HOME not set")?;
                PathBuf::from(home).join(".local/share")
            }
        };
        Ok(data_dir.join(APP_ID).join(format!("{APP_ID}.db")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PARLEY_TIER2_KEY", "k2"),
            ("PARLEY_RESTRICTED_MODELS", "a, b,,c"),
            ("PARLEY_DATA_DIR", "/tmp/parley"),
            ("PARLEY_API_BASE", ""),
        ]);
        let config = AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.tier_keys[1], "k2");
        assert!(config.tier_keys[0].is_empty());
        assert_eq!(config.restricted_models, vec!["a", "b", "c"]);
        assert_eq!(config.api_base_url, AppConfig::default().api_base_url);
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/parley/parley.db")
        );
    }

    #[test]
    fn test_debug_hides_tier_keys() {
        let config = AppConfig {
            tier_keys: ["sk-one".into(), String::new(), "sk-three".into(), String::new()],
            ..Default::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("sk-one"));
        assert!(printed.contains("[2 of 4 set]"));
    }
}

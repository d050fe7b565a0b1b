//! Persisted key-value store holding whole JSON-serialized collections.
//!
//! Every logical collection (conversations, personas, memories, templates,
//! settings) lives under one key and is rewritten in full on each change.

pub mod memory;
pub mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::services::notice::Notices;

pub use memory::InMemoryStore;
#[cfg(test)]
pub use memory::FailingStore;
pub use sqlite::SqliteStore;

pub const CONVERSATIONS_KEY: &str = "conversations";
pub const PERSONAS_KEY: &str = "personas";
pub const MEMORIES_KEY: &str = "memories";
pub const TEMPLATES_KEY: &str = "templates";
pub const SETTINGS_KEY: &str = "app_settings";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to (de)serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait PersistedStore: Send + Sync {
    fn get_raw(&self, key: &str) -> StoreResult<Option<String>>;
    fn set_raw(&self, key: &str, value: &str) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Typed access on top of any [`PersistedStore`].
pub trait PersistedStoreExt: PersistedStore {
    fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_raw(key)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, &json)
    }
}

impl<S: PersistedStore + ?Sized> PersistedStoreExt for S {}

/// Reads a collection, falling back to the default when it is missing or
/// unreadable. A corrupt entry is cleared and reported through `notices`.
pub fn load_or_default<T>(store: &dyn PersistedStore, key: &str, notices: &Notices) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match store.get_raw(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return T::default(),
        Err(e) => {
            tracing::error!("Failed to read '{}' from store: {}", key, e);
            notices.warn(format!("Could not read saved {key}"));
            return T::default();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Corrupt '{}' entry, resetting: {}", key, e);
            if let Err(e) = store.remove(key) {
                tracing::error!("Failed to clear corrupt '{}' entry: {}", key, e);
            }
            notices.warn(format!("Saved {key} were corrupted and have been reset"));
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notice::NoticeLevel;

    #[test]
    fn test_typed_round_trip() {
        let store = InMemoryStore::new();
        store.set("numbers", &vec![1, 2, 3]).unwrap();
        let loaded: Option<Vec<i32>> = store.get("numbers").unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));
        assert_eq!(store.get::<Vec<i32>>("missing").unwrap(), None);
    }

    #[test]
    fn test_corrupt_entry_is_cleared_with_notice() {
        let store = InMemoryStore::new();
        store.set_raw("memories", "{not json").unwrap();
        let notices = Notices::new();
        let mut rx = notices.subscribe();

        let loaded: Vec<String> = load_or_default(&store, "memories", &notices);

        assert!(loaded.is_empty());
        assert_eq!(store.get_raw("memories").unwrap(), None);
        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.level, NoticeLevel::Warning);
    }
}

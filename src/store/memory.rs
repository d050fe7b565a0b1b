use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{PersistedStore, StoreError, StoreResult};

/// In-memory store. Useful for tests and throwaway sessions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<Mutex<u64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set_raw` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(format!("Failed to lock store: {}", e))
}

impl PersistedStore for InMemoryStore {
    fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        *self.writes.lock().map_err(poisoned)? += 1;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Rejects writes whose value contains the configured needle, like a disk
/// that fills up on particular payloads. Everything else goes to `inner`.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct FailingStore {
    pub inner: InMemoryStore,
    needle: Arc<Mutex<Option<String>>>,
}

#[cfg(test)]
impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty needle rejects every write.
    pub fn reject_containing(&self, needle: &str) {
        *self.needle.lock().unwrap() = Some(needle.to_string());
    }
}

#[cfg(test)]
impl PersistedStore for FailingStore {
    fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get_raw(key)
    }

    fn set_raw(&self, key: &str, value: &str) -> StoreResult<()> {
        let rejected = match self.needle.lock().map_err(poisoned)?.as_deref() {
            Some(needle) => value.contains(needle),
            None => false,
        };
        if rejected {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.set_raw(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.inner.remove(key)
    }
}

use std::sync::Arc;

use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::models::ChatMode;
use crate::store::{PersistedStore, PersistedStoreExt, CONVERSATIONS_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageCounters {
    /// Conversations in any mode except image.
    pub chats: usize,
    /// Messages across those conversations.
    pub messages: usize,
}

/// Just enough of a persisted conversation to count usage.
#[derive(Deserialize)]
struct UsageView {
    mode: ChatMode,
    #[serde(default)]
    messages: Vec<IgnoredAny>,
}

impl UsageCounters {
    fn from_views(views: &[UsageView]) -> Self {
        views
            .iter()
            .filter(|c| c.mode != ChatMode::Image)
            .fold(Self::default(), |acc, c| Self {
                chats: acc.chats + 1,
                messages: acc.messages + c.messages.len(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageTier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl UsageTier {
    /// Heaviest bucket first; every threshold is strictly greater-than.
    pub fn classify(usage: UsageCounters) -> Self {
        let UsageCounters { chats, messages } = usage;
        if chats > 10 || messages > 50 {
            UsageTier::Tier1
        } else if chats > 5 || messages > 20 {
            UsageTier::Tier2
        } else if chats > 1 || messages > 5 {
            UsageTier::Tier3
        } else {
            UsageTier::Tier4
        }
    }

    pub fn index(&self) -> usize {
        match self {
            UsageTier::Tier1 => 0,
            UsageTier::Tier2 => 1,
            UsageTier::Tier3 => 2,
            UsageTier::Tier4 => 3,
        }
    }
}

/// Picks the API credential from persisted usage. Re-reads the store on every
/// call so crossing a threshold takes effect on the very next request.
pub struct KeyPolicy {
    store: Arc<dyn PersistedStore>,
    tier_keys: [String; 4],
}

impl KeyPolicy {
    pub fn new(store: Arc<dyn PersistedStore>, tier_keys: [String; 4]) -> Self {
        Self { store, tier_keys }
    }

    pub fn current_usage(&self) -> UsageCounters {
        match self.store.get::<Vec<UsageView>>(CONVERSATIONS_KEY) {
            Ok(Some(views)) => UsageCounters::from_views(&views),
            Ok(None) => UsageCounters::default(),
            Err(e) => {
                tracing::warn!("Could not read usage, assuming none: {}", e);
                UsageCounters::default()
            }
        }
    }

    pub fn current_tier(&self) -> UsageTier {
        UsageTier::classify(self.current_usage())
    }

    pub fn credential_for_current_usage(&self) -> &str {
        let tier = self.current_tier();
        tracing::debug!("Using {:?} credential", tier);
        &self.tier_keys[tier.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, Message};
    use crate::store::InMemoryStore;

    fn usage(chats: usize, messages: usize) -> UsageCounters {
        UsageCounters { chats, messages }
    }

    #[test]
    fn test_tier_boundaries_are_strict() {
        assert_eq!(UsageTier::classify(usage(10, 50)), UsageTier::Tier2);
        assert_eq!(UsageTier::classify(usage(11, 0)), UsageTier::Tier1);
        assert_eq!(UsageTier::classify(usage(0, 51)), UsageTier::Tier1);
        assert_eq!(UsageTier::classify(usage(5, 20)), UsageTier::Tier3);
        assert_eq!(UsageTier::classify(usage(6, 0)), UsageTier::Tier2);
        assert_eq!(UsageTier::classify(usage(1, 5)), UsageTier::Tier4);
        assert_eq!(UsageTier::classify(usage(2, 0)), UsageTier::Tier3);
        assert_eq!(UsageTier::classify(usage(0, 6)), UsageTier::Tier3);
        assert_eq!(UsageTier::classify(usage(0, 0)), UsageTier::Tier4);
    }

    fn conversation(mode: ChatMode, messages: usize) -> Conversation {
        let mut c = Conversation::new(mode, "t");
        c.messages = (0..messages).map(|_| Message::assistant("m")).collect();
        c
    }

    #[test]
    fn test_image_conversations_do_not_count() {
        let store = InMemoryStore::new();
        store
            .set(
                CONVERSATIONS_KEY,
                &vec![
                    conversation(ChatMode::Chat, 3),
                    conversation(ChatMode::Roleplay, 2),
                    conversation(ChatMode::Video, 1),
                    conversation(ChatMode::Image, 40),
                ],
            )
            .unwrap();
        let policy = KeyPolicy::new(Arc::new(store), Default::default());
        assert_eq!(policy.current_usage(), usage(3, 6));
    }

    #[test]
    fn test_credential_follows_latest_persisted_state() {
        let store = InMemoryStore::new();
        let keys = ["k1".to_string(), "k2".into(), "k3".into(), "k4".into()];
        let policy = KeyPolicy::new(Arc::new(store.clone()), keys);
        assert_eq!(policy.credential_for_current_usage(), "k4");

        store
            .set(CONVERSATIONS_KEY, &vec![conversation(ChatMode::Chat, 6)])
            .unwrap();
        assert_eq!(policy.credential_for_current_usage(), "k3");

        let many: Vec<Conversation> = (0..11).map(|_| conversation(ChatMode::Chat, 0)).collect();
        store.set(CONVERSATIONS_KEY, &many).unwrap();
        assert_eq!(policy.credential_for_current_usage(), "k1");
    }

    #[test]
    fn test_corrupt_usage_reads_as_empty() {
        let store = InMemoryStore::new();
        store.set_raw(CONVERSATIONS_KEY, "garbage").unwrap();
        let policy = KeyPolicy::new(Arc::new(store), Default::default());
        assert_eq!(policy.current_tier(), UsageTier::Tier4);
    }
}

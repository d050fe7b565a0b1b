//! In-memory conversation collection mirrored to the persisted store.
//!
//! Every mutation runs under one lock and rewrites the whole `conversations`
//! entry before returning, so an abrupt exit loses at most the chunk in
//! flight. A failed write leaves the in-memory copy as it was, so memory and
//! store never disagree about what a caller was told succeeded.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::models::{ChatMode, Conversation, Message, PersonaId};
use crate::services::notice::Notices;
use crate::store::{
    load_or_default, PersistedStore, PersistedStoreExt, StoreError, StoreResult, CONVERSATIONS_KEY,
};

const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    Created {
        conversation_id: String,
    },
    MessageAppended {
        conversation_id: String,
        message: Message,
    },
    LastMessageUpdated {
        conversation_id: String,
        content: String,
        is_streaming: bool,
    },
    MessageRemoved {
        conversation_id: String,
        message_id: String,
    },
    Truncated {
        conversation_id: String,
        remaining: usize,
    },
    Updated {
        conversation_id: String,
    },
    Deleted {
        conversation_id: String,
    },
    Cleared {
        mode: ChatMode,
        removed: usize,
    },
}

pub struct ConversationStore {
    conversations: Mutex<Vec<Conversation>>,
    store: Arc<dyn PersistedStore>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationStore {
    /// Load the persisted collection and drop any message that was left
    /// streaming by an earlier, interrupted session.
    pub fn load(store: Arc<dyn PersistedStore>, notices: &Notices) -> StoreResult<Self> {
        let mut conversations: Vec<Conversation> =
            load_or_default(store.as_ref(), CONVERSATIONS_KEY, notices);

        let repaired = repair_dangling_streams(&mut conversations);
        if repaired > 0 {
            tracing::info!("Removed {} interrupted streaming message(s)", repaired);
            notices.info(format!(
                "Discarded {} unfinished message(s) from the last session",
                repaired
            ));
            store.set(CONVERSATIONS_KEY, &conversations)?;
        }

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            conversations: Mutex::new(conversations),
            store,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Vec<Conversation>>> {
        self.conversations
            .lock()
            .map_err(|e| StoreError::Backend(format!("Failed to lock conversations: {}", e)))
    }

    fn persist(&self, conversations: &[Conversation]) -> StoreResult<()> {
        self.store.set(CONVERSATIONS_KEY, conversations).map_err(|e| {
            tracing::error!("Failed to persist conversations: {}", e);
            e
        })
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    /// Apply `f` to a copy of one conversation and swap it in once the whole
    /// collection is persisted. `f` returns `None` when nothing changed, in
    /// which case nothing is written. A failed write leaves memory untouched.
    fn mutate<R>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut Conversation) -> Option<R>,
    ) -> StoreResult<Option<R>> {
        let mut conversations = self.lock()?;
        let Some(index) = conversations.iter().position(|c| c.id == conversation_id) else {
            tracing::debug!("Conversation {} not found", conversation_id);
            return Ok(None);
        };
        let mut updated = conversations[index].clone();
        let Some(result) = f(&mut updated) else {
            return Ok(None);
        };
        let previous = std::mem::replace(&mut conversations[index], updated);
        if let Err(e) = self.persist(&conversations) {
            conversations[index] = previous;
            return Err(e);
        }
        Ok(Some(result))
    }

    fn insert_front(&self, conversation: Conversation) -> StoreResult<String> {
        let id = conversation.id.clone();
        {
            let mut conversations = self.lock()?;
            conversations.insert(0, conversation);
            if let Err(e) = self.persist(&conversations) {
                conversations.remove(0);
                return Err(e);
            }
        }
        self.emit(ConversationEvent::Created {
            conversation_id: id.clone(),
        });
        Ok(id)
    }

    // --- Creation ---

    pub fn create_conversation(&self, mode: ChatMode, initial_title: &str) -> StoreResult<String> {
        self.insert_front(Conversation::new(mode, initial_title))
    }

    /// Roleplay conversation with one persona, or a group chat with several.
    pub fn create_group_conversation(
        &self,
        participants: &[PersonaId],
        title: &str,
    ) -> StoreResult<String> {
        let mut unique: Vec<PersonaId> = Vec::with_capacity(participants.len());
        for id in participants {
            if !unique.contains(id) {
                unique.push(id.clone());
            }
        }
        let mut conversation = Conversation::new(ChatMode::Roleplay, title);
        conversation.is_group_chat = unique.len() > 1;
        conversation.participants = unique;
        self.insert_front(conversation)
    }

    // --- Messages ---

    /// Returns `false` when the conversation does not exist.
    pub fn append_message(&self, conversation_id: &str, message: Message) -> StoreResult<bool> {
        let appended = message.clone();
        let done = self.mutate(conversation_id, |c| {
            c.messages.push(message);
            c.touch();
            Some(())
        })?;
        if done.is_some() {
            self.emit(ConversationEvent::MessageAppended {
                conversation_id: conversation_id.to_string(),
                message: appended,
            });
        }
        Ok(done.is_some())
    }

    /// Replace content and streaming flag of the final message. No-op when the
    /// conversation is empty or missing.
    pub fn update_last_message(
        &self,
        conversation_id: &str,
        content: &str,
        is_streaming: bool,
    ) -> StoreResult<bool> {
        let done = self.mutate(conversation_id, |c| {
            let last = c.messages.last_mut()?;
            last.content.clear();
            last.content.push_str(content);
            last.is_streaming = is_streaming;
            c.touch();
            Some(())
        })?;
        if done.is_some() {
            self.emit(ConversationEvent::LastMessageUpdated {
                conversation_id: conversation_id.to_string(),
                content: content.to_string(),
                is_streaming,
            });
        }
        Ok(done.is_some())
    }

    /// Roll back an optimistic assistant placeholder. The placeholder leaves
    /// memory even when the write fails; the load-time sweep removes whatever
    /// copy the backing store still holds.
    pub fn remove_last_message_if_streaming(&self, conversation_id: &str) -> StoreResult<bool> {
        let (message_id, persisted) = {
            let mut conversations = self.lock()?;
            let Some(conversation) = conversations.iter_mut().find(|c| c.id == conversation_id)
            else {
                return Ok(false);
            };
            if !conversation.messages.last().is_some_and(|m| m.is_streaming) {
                return Ok(false);
            }
            let Some(message) = conversation.messages.pop() else {
                return Ok(false);
            };
            conversation.touch();
            (message.id, self.persist(&conversations))
        };
        self.emit(ConversationEvent::MessageRemoved {
            conversation_id: conversation_id.to_string(),
            message_id,
        });
        persisted.map(|()| true)
    }

    /// Keep messages up to and including `message_id`, drop the rest, and
    /// optionally overwrite the kept message's content.
    pub fn truncate_messages_after(
        &self,
        conversation_id: &str,
        message_id: &str,
        new_content: Option<&str>,
    ) -> StoreResult<bool> {
        let remaining = self.mutate(conversation_id, |c| {
            let idx = c.messages.iter().position(|m| m.id == message_id)?;
            c.messages.truncate(idx + 1);
            if let Some(content) = new_content {
                c.messages[idx].content = content.to_string();
            }
            c.touch();
            Some(c.messages.len())
        })?;
        if let Some(remaining) = remaining {
            self.emit(ConversationEvent::Truncated {
                conversation_id: conversation_id.to_string(),
                remaining,
            });
        }
        Ok(remaining.is_some())
    }

    /// Favoriting does not change `updated_at`, so it never reorders the list.
    /// Returns the new favorite state.
    pub fn toggle_message_favorite(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<Option<bool>> {
        let state = self.mutate(conversation_id, |c| {
            let message = c.messages.iter_mut().find(|m| m.id == message_id)?;
            message.is_favorite = !message.is_favorite;
            Some(message.is_favorite)
        })?;
        if state.is_some() {
            self.emit_updated(conversation_id);
        }
        Ok(state)
    }

    // --- Conversation records ---

    fn emit_updated(&self, conversation_id: &str) {
        self.emit(ConversationEvent::Updated {
            conversation_id: conversation_id.to_string(),
        });
    }

    pub fn set_title(&self, conversation_id: &str, title: &str) -> StoreResult<bool> {
        let done = self.mutate(conversation_id, |c| {
            c.title = title.to_string();
            c.touch();
            Some(())
        })?;
        if done.is_some() {
            self.emit_updated(conversation_id);
        }
        Ok(done.is_some())
    }

    pub fn set_pinned(&self, conversation_id: &str, pinned: bool) -> StoreResult<bool> {
        let done = self.mutate(conversation_id, |c| {
            c.is_pinned = pinned;
            c.touch();
            Some(())
        })?;
        if done.is_some() {
            self.emit_updated(conversation_id);
        }
        Ok(done.is_some())
    }

    /// Tags are trimmed and de-duplicated, keeping first occurrence order.
    pub fn set_tags(&self, conversation_id: &str, tags: &[String]) -> StoreResult<bool> {
        let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if !cleaned.iter().any(|t| t == tag) {
                cleaned.push(tag.to_string());
            }
        }
        let done = self.mutate(conversation_id, |c| {
            c.tags = cleaned;
            c.touch();
            Some(())
        })?;
        if done.is_some() {
            self.emit_updated(conversation_id);
        }
        Ok(done.is_some())
    }

    pub fn delete_conversation(&self, conversation_id: &str) -> StoreResult<bool> {
        {
            let mut conversations = self.lock()?;
            let remaining: Vec<Conversation> = conversations
                .iter()
                .filter(|c| c.id != conversation_id)
                .cloned()
                .collect();
            if remaining.len() == conversations.len() {
                return Ok(false);
            }
            self.persist(&remaining)?;
            *conversations = remaining;
        }
        self.emit(ConversationEvent::Deleted {
            conversation_id: conversation_id.to_string(),
        });
        Ok(true)
    }

    /// Bulk clear of every conversation in one mode.
    pub fn clear_mode(&self, mode: ChatMode) -> StoreResult<usize> {
        let removed = {
            let mut conversations = self.lock()?;
            let remaining: Vec<Conversation> = conversations
                .iter()
                .filter(|c| c.mode != mode)
                .cloned()
                .collect();
            let removed = conversations.len() - remaining.len();
            if removed > 0 {
                self.persist(&remaining)?;
                *conversations = remaining;
            }
            removed
        };
        if removed > 0 {
            self.emit(ConversationEvent::Cleared { mode, removed });
        }
        Ok(removed)
    }

    // --- Reads ---

    pub fn get(&self, conversation_id: &str) -> Option<Conversation> {
        let conversations = self.lock().ok()?;
        conversations.iter().find(|c| c.id == conversation_id).cloned()
    }

    pub fn message_count(&self, conversation_id: &str) -> Option<usize> {
        let conversations = self.lock().ok()?;
        conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .map(|c| c.messages.len())
    }

    /// Store order: newest created first.
    pub fn list(&self) -> Vec<Conversation> {
        self.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Pinned first, then most recently updated.
    pub fn list_sorted(&self) -> Vec<Conversation> {
        let mut conversations = self.list();
        conversations.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        conversations
    }

    pub fn list_by_mode(&self, mode: ChatMode) -> Vec<Conversation> {
        self.list().into_iter().filter(|c| c.mode == mode).collect()
    }

    pub fn filter_by_tag(&self, tag: &str) -> Vec<Conversation> {
        self.list()
            .into_iter()
            .filter(|c| c.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
            .collect()
    }

    /// Case-insensitive match on title or any message content.
    pub fn search(&self, query: &str) -> Vec<Conversation> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return self.list();
        }
        self.list()
            .into_iter()
            .filter(|c| {
                c.title.to_lowercase().contains(&needle)
                    || c.messages
                        .iter()
                        .any(|m| m.content.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Newest conversation of `mode`, the default selection on startup.
    pub fn most_recent(&self, mode: ChatMode) -> Option<Conversation> {
        let conversations = self.lock().ok()?;
        conversations.iter().find(|c| c.mode == mode).cloned()
    }
}

fn repair_dangling_streams(conversations: &mut [Conversation]) -> usize {
    let mut removed = 0;
    for conversation in conversations.iter_mut() {
        let before = conversation.messages.len();
        conversation.messages.retain(|m| !m.is_streaming);
        removed += before - conversation.messages.len();
    }
    removed
}

/// Title from the first user message: the first 50 characters plus `...`
/// when longer, otherwise the text as is.
pub fn truncate_title(text: &str) -> String {
    let mut chars = text.char_indices();
    match chars.nth(TITLE_MAX_CHARS) {
        Some((boundary, _)) => format!("{}...", &text[..boundary]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FailingStore, InMemoryStore};

    fn new_store() -> (ConversationStore, InMemoryStore) {
        let backing = InMemoryStore::new();
        let store = ConversationStore::load(Arc::new(backing.clone()), &Notices::new()).unwrap();
        (store, backing)
    }

    fn persisted(backing: &InMemoryStore) -> Vec<Conversation> {
        backing.get(CONVERSATIONS_KEY).unwrap().unwrap_or_default()
    }

    #[test]
    fn test_create_prepends_newest_first() {
        let (store, backing) = new_store();
        let first = store.create_conversation(ChatMode::Chat, "one").unwrap();
        let second = store.create_conversation(ChatMode::Chat, "two").unwrap();

        let ids: Vec<String> = store.list().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second.clone(), first]);
        assert_eq!(persisted(&backing)[0].id, second);
        assert_eq!(store.most_recent(ChatMode::Chat).unwrap().id, second);
    }

    #[test]
    fn test_streaming_updates_concatenate_in_order() {
        let (store, backing) = new_store();
        let id = store.create_conversation(ChatMode::Chat, "t").unwrap();
        store.append_message(&id, Message::user("hi", Vec::new())).unwrap();
        store.append_message(&id, Message::placeholder()).unwrap();

        let chunks = ["Hel", "lo", ", ", "world"];
        let mut acc = String::new();
        for chunk in chunks {
            acc.push_str(chunk);
            store.update_last_message(&id, &acc, true).unwrap();
            let last = store.get(&id).unwrap().messages.last().cloned().unwrap();
            assert!(last.is_streaming);
            assert_eq!(last.content, acc);
        }
        store.update_last_message(&id, &acc, false).unwrap();

        let last = persisted(&backing)[0].messages.last().cloned().unwrap();
        assert_eq!(last.content, "Hello, world");
        assert!(!last.is_streaming);
    }

    #[test]
    fn test_every_mutation_is_persisted() {
        let (store, backing) = new_store();
        let id = store.create_conversation(ChatMode::Chat, "t").unwrap();
        let writes = backing.write_count();
        store.append_message(&id, Message::placeholder()).unwrap();
        store.update_last_message(&id, "a", true).unwrap();
        store.update_last_message(&id, "ab", true).unwrap();
        assert_eq!(backing.write_count(), writes + 3);
    }

    #[test]
    fn test_missing_conversation_and_empty_messages_are_noops() {
        let (store, _) = new_store();
        assert!(!store.append_message("nope", Message::user("x", Vec::new())).unwrap());
        let id = store.create_conversation(ChatMode::Chat, "t").unwrap();
        assert!(!store.update_last_message(&id, "x", false).unwrap());
        assert!(store.get(&id).unwrap().messages.is_empty());
    }

    #[test]
    fn test_remove_only_streaming_tail() {
        let (store, _) = new_store();
        let id = store.create_conversation(ChatMode::Chat, "t").unwrap();
        store.append_message(&id, Message::user("q", Vec::new())).unwrap();
        assert!(!store.remove_last_message_if_streaming(&id).unwrap());
        store.append_message(&id, Message::placeholder()).unwrap();
        assert!(store.remove_last_message_if_streaming(&id).unwrap());
        assert_eq!(store.message_count(&id), Some(1));
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let backing = FailingStore::new();
        let store = ConversationStore::load(Arc::new(backing.clone()), &Notices::new()).unwrap();
        let id = store.create_conversation(ChatMode::Chat, "t").unwrap();
        store.append_message(&id, Message::user("hi", Vec::new())).unwrap();

        backing.reject_containing("\"isStreaming\":true");
        assert!(store.append_message(&id, Message::placeholder()).is_err());
        assert_eq!(store.message_count(&id), Some(1));

        backing.reject_containing("");
        assert!(store.set_title(&id, "renamed").is_err());
        assert!(store.create_conversation(ChatMode::Image, "x").is_err());
        assert!(store.delete_conversation(&id).is_err());
        let list = store.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "t");
    }

    #[test]
    fn test_rollback_drops_placeholder_even_when_write_fails() {
        let backing = FailingStore::new();
        let store = ConversationStore::load(Arc::new(backing.clone()), &Notices::new()).unwrap();
        let id = store.create_conversation(ChatMode::Chat, "t").unwrap();
        store.append_message(&id, Message::user("hi", Vec::new())).unwrap();
        store.append_message(&id, Message::placeholder()).unwrap();

        backing.reject_containing("");
        assert!(store.remove_last_message_if_streaming(&id).is_err());
        let messages = store.get(&id).unwrap().messages;
        assert_eq!(messages.len(), 1);
        assert!(messages.iter().all(|m| !m.is_streaming));

        // The stale copy on disk is swept on the next load.
        let reloaded = ConversationStore::load(Arc::new(backing.inner.clone()), &Notices::new())
            .unwrap();
        assert_eq!(reloaded.message_count(&id), Some(1));
    }

    #[test]
    fn test_truncate_after_edit() {
        let (store, _) = new_store();
        let id = store.create_conversation(ChatMode::Chat, "t").unwrap();
        let u1 = Message::user("u1", Vec::new());
        let u1_id = u1.id.clone();
        store.append_message(&id, u1).unwrap();
        for text in ["a1", "u2", "a2", "u3"] {
            store.append_message(&id, Message::assistant(text)).unwrap();
        }

        assert!(store
            .truncate_messages_after(&id, &u1_id, Some("u1 edited"))
            .unwrap());
        let messages = store.get(&id).unwrap().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "u1 edited");
        assert!(!store.truncate_messages_after(&id, "missing", None).unwrap());
    }

    #[test]
    fn test_favorite_does_not_bump_updated_at() {
        let (store, _) = new_store();
        let id = store.create_conversation(ChatMode::Chat, "t").unwrap();
        let msg = Message::assistant("nice");
        let msg_id = msg.id.clone();
        store.append_message(&id, msg).unwrap();
        let before = store.get(&id).unwrap().updated_at;

        assert_eq!(store.toggle_message_favorite(&id, &msg_id).unwrap(), Some(true));
        assert_eq!(store.get(&id).unwrap().updated_at, before);
        assert_eq!(store.toggle_message_favorite(&id, &msg_id).unwrap(), Some(false));
        assert_eq!(store.toggle_message_favorite(&id, "nope").unwrap(), None);
    }

    #[test]
    fn test_updated_at_never_decreases() {
        let (store, _) = new_store();
        let id = store.create_conversation(ChatMode::Chat, "t").unwrap();
        let mut last = store.get(&id).unwrap().updated_at;
        for i in 0..5 {
            store.set_title(&id, &format!("t{i}")).unwrap();
            let now = store.get(&id).unwrap().updated_at;
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_tags_pin_and_sorting() {
        let (store, _) = new_store();
        let a = store.create_conversation(ChatMode::Chat, "a").unwrap();
        let b = store.create_conversation(ChatMode::Chat, "b").unwrap();
        store
            .set_tags(&a, &[" work ".into(), "Work".into(), "work".into(), "".into()])
            .unwrap();
        store.set_pinned(&a, true).unwrap();

        assert_eq!(store.get(&a).unwrap().tags, vec!["work", "Work"]);
        assert_eq!(store.list_sorted()[0].id, a);
        assert_eq!(store.filter_by_tag("WORK").len(), 1);
        assert_eq!(store.list()[0].id, b);
    }

    #[test]
    fn test_most_recent_follows_store_order_not_pins() {
        let (store, _) = new_store();
        let older = store.create_conversation(ChatMode::Chat, "older").unwrap();
        let newer = store.create_conversation(ChatMode::Chat, "newer").unwrap();
        store.create_conversation(ChatMode::Image, "picture").unwrap();
        store.set_pinned(&older, true).unwrap();

        assert_eq!(store.list_sorted()[0].id, older);
        assert_eq!(store.most_recent(ChatMode::Chat).unwrap().id, newer);
    }

    #[test]
    fn test_delete_and_clear_mode() {
        let (store, backing) = new_store();
        let chat = store.create_conversation(ChatMode::Chat, "c").unwrap();
        store.create_conversation(ChatMode::Image, "i1").unwrap();
        store.create_conversation(ChatMode::Image, "i2").unwrap();

        assert_eq!(store.clear_mode(ChatMode::Image).unwrap(), 2);
        assert!(store.delete_conversation(&chat).unwrap());
        assert!(!store.delete_conversation(&chat).unwrap());
        assert!(persisted(&backing).is_empty());
    }

    #[test]
    fn test_roleplay_participants_are_unique() {
        let (store, _) = new_store();
        let p1 = crate::models::PersonaSource::Premade(0).persona_id();
        let p2 = crate::models::PersonaSource::Character(1).persona_id();
        let id = store
            .create_group_conversation(&[p1.clone(), p2.clone(), p1.clone()], "g")
            .unwrap();
        let conv = store.get(&id).unwrap();
        assert!(conv.is_group_chat);
        assert_eq!(conv.participants, vec![p1.clone(), p2]);

        let single = store.create_group_conversation(&[p1], "s").unwrap();
        assert!(!store.get(&single).unwrap().is_group_chat);
    }

    #[test]
    fn test_reload_reproduces_collection_and_repairs_streams() {
        let (store, backing) = new_store();
        let a = store.create_conversation(ChatMode::Chat, "a").unwrap();
        store.append_message(&a, Message::user("q", Vec::new())).unwrap();
        store.append_message(&a, Message::assistant("done")).unwrap();
        let b = store.create_conversation(ChatMode::Roleplay, "b").unwrap();
        store.append_message(&b, Message::user("q", Vec::new())).unwrap();
        store.set_tags(&b, &["x".into()]).unwrap();

        let clean = store.list();
        let reloaded = ConversationStore::load(Arc::new(backing.clone()), &Notices::new()).unwrap();
        assert_eq!(reloaded.list(), clean);

        // Simulate a tab closed mid-stream.
        store.append_message(&b, Message::placeholder()).unwrap();
        store.update_last_message(&b, "partial", true).unwrap();
        let reloaded = ConversationStore::load(Arc::new(backing.clone()), &Notices::new()).unwrap();
        let messages = |list: Vec<Conversation>| -> Vec<Vec<Message>> {
            list.into_iter().map(|c| c.messages).collect()
        };
        assert_eq!(messages(reloaded.list()), messages(clean));

        store.append_message(&a, Message::placeholder()).unwrap();
        let notices = Notices::new();
        let mut rx = notices.subscribe();
        ConversationStore::load(Arc::new(backing.clone()), &notices).unwrap();
        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.level, crate::services::notice::NoticeLevel::Info);
        assert!(notice.message.contains("unfinished"));
        assert!(persisted(&backing)
            .iter()
            .all(|c| c.messages.iter().all(|m| !m.is_streaming)));
    }

    #[test]
    fn test_events_follow_mutations() {
        let (store, _) = new_store();
        let mut rx = store.subscribe();
        let id = store.create_conversation(ChatMode::Chat, "t").unwrap();
        store.append_message(&id, Message::placeholder()).unwrap();
        store.update_last_message(&id, "x", true).unwrap();

        assert!(matches!(rx.try_recv().unwrap(), ConversationEvent::Created { .. }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ConversationEvent::MessageAppended { .. }
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            ConversationEvent::LastMessageUpdated {
                conversation_id: id,
                content: "x".to_string(),
                is_streaming: true,
            }
        );
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("short"), "short");
        let exact = "a".repeat(50);
        assert_eq!(truncate_title(&exact), exact);
        let long = format!("{}{}", "b".repeat(50), "tail");
        assert_eq!(truncate_title(&long), format!("{}...", "b".repeat(50)));
        let wide = "é".repeat(60);
        assert_eq!(truncate_title(&wide), format!("{}...", "é".repeat(50)));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;
use super::persona::PersonaId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Chat,
    Image,
    Video,
    Roleplay,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Chat => "chat",
            ChatMode::Image => "image",
            ChatMode::Video => "video",
            ChatMode::Roleplay => "roleplay",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(ChatMode::Chat),
            "image" => Some(ChatMode::Image),
            "video" => Some(ChatMode::Video),
            "roleplay" => Some(ChatMode::Roleplay),
            _ => None,
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, ChatMode::Image | ChatMode::Video)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub mode: ChatMode,
    #[serde(default)]
    pub is_group_chat: bool,
    #[serde(default)]
    pub participants: Vec<PersonaId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Conversation {
    pub fn new(mode: ChatMode, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
            mode,
            is_group_chat: false,
            participants: Vec::new(),
            created_at: now,
            updated_at: now,
            is_pinned: false,
            tags: Vec::new(),
        }
    }

    /// Bumps `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_streaming)
    }
}

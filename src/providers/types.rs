use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unexpected media type: expected {expected}, got {actual}")]
    UnexpectedMediaType { expected: String, actual: String },
}

impl ProviderError {
    /// Map a non-success HTTP status onto an error category.
    pub fn from_status(
        status: reqwest::StatusCode,
        retry_after_secs: Option<u64>,
        detail: String,
    ) -> Self {
        match status.as_u16() {
            400 | 422 => ProviderError::BadRequest(detail),
            401 | 403 => ProviderError::AuthError(detail),
            429 => ProviderError::RateLimited { retry_after_secs },
            500..=599 => ProviderError::Unavailable(detail),
            _ => ProviderError::RequestFailed(detail),
        }
    }

    /// Short text suitable for a transient notification.
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::BadRequest(_) => "The request was rejected by the service".to_string(),
            ProviderError::AuthError(_) => "Authentication with the service failed".to_string(),
            ProviderError::RateLimited { .. } => {
                "Too many requests, please wait a moment and try again".to_string()
            }
            ProviderError::Unavailable(_) => {
                "The service is temporarily unavailable, please try again".to_string()
            }
            ProviderError::NetworkError(_) => {
                "Network error, check your connection and try again".to_string()
            }
            other => other.to_string(),
        }
    }
}

// --- Tool types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
            ToolChoice::Required => "required",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

// --- Chat types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<crate::models::Role> for ChatRole {
    fn from(role: crate::models::Role) -> Self {
        match role {
            crate::models::Role::User => ChatRole::User,
            crate::models::Role::Assistant => ChatRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Plain text unless mixed media has to be sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(_) => None,
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl ChatMessage {
    pub fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct ChatRequest {
    pub api_key: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
}

impl std::fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRequest")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("messages", &self.messages)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("tools", &format!("[{} tools]", self.tools.len()))
            .field("tool_choice", &self.tool_choice)
            .finish()
    }
}

impl ChatRequest {
    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == ChatRole::System)
    }
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Token(String),
    ToolCallComplete {
        call: ToolCall,
    },
    Done {
        tokens_in: Option<i64>,
        tokens_out: Option<i64>,
        stop_reason: Option<StopReason>,
    },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

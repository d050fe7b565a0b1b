use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AttachmentContent {
    /// Base64 encoded binary payload.
    Inline { data_base64: String },
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub content: AttachmentContent,
}

impl FileAttachment {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: data.len() as u64,
            content: AttachmentContent::Inline {
                data_base64: base64::engine::general_purpose::STANDARD.encode(data),
            },
        }
    }

    pub fn from_text(name: impl Into<String>, mime_type: impl Into<String>, text: String) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: text.len() as u64,
            content: AttachmentContent::Text { text },
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Plain text and JSON files are inlined into the prompt.
    pub fn is_textual(&self) -> bool {
        self.mime_type.starts_with("text/") || self.mime_type == "application/json"
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            AttachmentContent::Text { text } => Some(text),
            AttachmentContent::Inline { .. } => None,
        }
    }

    pub fn data_url(&self) -> Option<String> {
        match &self.content {
            AttachmentContent::Inline { data_base64 } => {
                Some(format!("data:{};base64,{}", self.mime_type, data_base64))
            }
            AttachmentContent::Text { .. } => None,
        }
    }
}

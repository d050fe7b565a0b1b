use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of an image or video assistant message, stored as JSON in `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub url: String,
    pub prompt: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

impl MediaDescriptor {
    pub fn parse(content: &str) -> Option<Self> {
        serde_json::from_str(content).ok()
    }
}

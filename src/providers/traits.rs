use async_trait::async_trait;
use tokio::sync::mpsc;

use super::media::{MediaBlob, MediaRequest};
use super::types::{ChatRequest, ChatResponse, ModelInfo, ProviderError, StreamEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendId {
    Remote,
    /// Local inference engine used in offline mode.
    Local,
}

impl BackendId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Remote => "remote",
            BackendId::Local => "local",
        }
    }
}

#[async_trait]
pub trait TextBackend: Send + Sync {
    fn backend_id(&self) -> BackendId;

    async fn list_models(&self, api_key: &str) -> Result<Vec<ModelInfo>, ProviderError>;

    async fn send_chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Streams events into `tx`. Transport failures before the first byte are
    /// returned as `Err`; failures mid-stream arrive as [`StreamEvent::Error`].
    async fn stream_chat(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn generate(&self, request: MediaRequest) -> Result<MediaBlob, ProviderError>;
}

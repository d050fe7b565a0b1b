use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::traits::{BackendId, TextBackend};
use super::types::{ChatRequest, ChatResponse, ModelInfo, ProviderError, StreamEvent};

#[derive(Default)]
pub struct ProviderRouter {
    backends: HashMap<BackendId, Arc<dyn TextBackend>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    pub fn register(&mut self, backend: Arc<dyn TextBackend>) {
        self.backends.insert(backend.backend_id(), backend);
    }

    pub fn resolve(&self, offline: bool) -> BackendId {
        if offline {
            BackendId::Local
        } else {
            BackendId::Remote
        }
    }

    fn backend(&self, id: &BackendId) -> Result<&Arc<dyn TextBackend>, ProviderError> {
        self.backends.get(id).ok_or_else(|| {
            ProviderError::RequestFailed(format!("No backend registered for {}", id.as_str()))
        })
    }

    pub async fn list_models(
        &self,
        id: &BackendId,
        api_key: &str,
    ) -> Result<Vec<ModelInfo>, ProviderError> {
        self.backend(id)?.list_models(api_key).await
    }

    pub async fn send_chat(
        &self,
        id: &BackendId,
        request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        self.backend(id)?.send_chat(request).await
    }

    pub async fn stream_chat(
        &self,
        id: &BackendId,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        self.backend(id)?.stream_chat(request, tx).await
    }
}

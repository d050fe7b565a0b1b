pub mod media;
pub mod openai;
pub mod router;
pub mod traits;
pub mod types;
pub mod util;

pub use media::{MediaBlob, MediaKind, MediaOptions, MediaRequest, PollinationsMediaBackend};
pub use openai::OpenAiCompatibleBackend;
pub use router::ProviderRouter;
pub use traits::{BackendId, MediaBackend, TextBackend};
pub use types::{
    ChatMessage, ChatRequest, ChatRole, ContentPart, ImageUrl, MessageContent, ProviderError,
    StreamEvent,
};

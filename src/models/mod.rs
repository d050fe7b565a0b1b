pub mod attachment;
pub mod conversation;
pub mod media;
pub mod message;
pub mod persona;

pub use attachment::{AttachmentContent, FileAttachment};
pub use conversation::{ChatMode, Conversation};
pub use media::MediaDescriptor;
pub use message::{Message, Role};
pub use persona::{Persona, PersonaId, PersonaSource};

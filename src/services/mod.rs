pub mod conversation;
pub mod entitlement;
pub mod export;
pub mod key_policy;
pub mod library;
pub mod notice;
pub mod orchestrator;
pub mod personas;
pub mod settings;

pub use conversation::{ConversationEvent, ConversationStore};
pub use entitlement::{AllowListEntitlements, EntitlementProvider, Identity, ModelGate};
pub use key_policy::{KeyPolicy, UsageCounters, UsageTier};
pub use library::Library;
pub use notice::{Notice, NoticeLevel, Notices};
pub use orchestrator::{ChatError, GenerationOrchestrator, OrchestratorParams, SendOutcome};
pub use personas::PersonaCatalog;
pub use settings::{AppSettings, SettingsService};

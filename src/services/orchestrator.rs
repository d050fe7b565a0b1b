//! One send, end to end: request building, backend selection, and the
//! placeholder lifecycle of the assistant reply.
//!
//! At most one generation runs at a time across the whole client. The flag is
//! taken before the first await and released when the call returns, on every
//! path, after all store writes of that call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::models::{
    ChatMode, Conversation, FileAttachment, MediaDescriptor, Message, Persona, PersonaId, Role,
};
use crate::providers::media::{MediaKind, MediaOptions, MediaRequest};
use crate::providers::types::{
    ChatMessage, ChatRequest, ChatRole, ContentPart, ImageUrl, MessageContent, ModelInfo,
    ProviderError, StreamEvent, ToolCall, ToolChoice, ToolResult,
};
use crate::providers::{BackendId, MediaBackend, ProviderRouter};
use crate::services::conversation::{truncate_title, ConversationStore};
use crate::services::entitlement::{Identity, ModelGate};
use crate::services::key_policy::KeyPolicy;
use crate::services::library::Library;
use crate::services::notice::Notices;
use crate::services::personas::{group_system_prompt, system_prompt_for, PersonaCatalog};
use crate::services::settings::{AppSettings, SettingsService};
use crate::store::{PersistedStore, StoreError};
use crate::tools::ToolRegistry;

const NEW_CHAT_TITLE: &str = "New Chat";

const SEARCH_SYSTEM_PROMPT: &str = "You can search the web. Use current search results to \
answer, cite the sources you relied on, and say so when results are inconclusive.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("A response is already being generated")]
    AlreadyGenerating,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Persona not found: {0}")]
    PersonaNotFound(String),

    #[error("This conversation has no enabled participants")]
    NoParticipants,

    #[error("Model '{0}' is not available on your plan")]
    RestrictedModel(String),

    #[error("Not possible in a {0} conversation")]
    WrongMode(&'static str),

    #[error("Nothing to send")]
    EmptyInput,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Provider(e) => e.user_message(),
            ChatError::Store(_) => "Could not save the conversation".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub conversation_id: String,
    /// A conversation was created for this send because none was current.
    pub created: bool,
    /// Final text of each assistant message appended, in order.
    pub replies: Vec<String>,
}

/// Everything the orchestrator talks to. Built once at startup.
pub struct OrchestratorParams {
    pub config: AppConfig,
    pub store: Arc<dyn PersistedStore>,
    pub conversations: Arc<ConversationStore>,
    pub router: Arc<ProviderRouter>,
    pub media: Arc<dyn MediaBackend>,
    pub personas: Arc<PersonaCatalog>,
    pub library: Arc<Library>,
    pub tools: Arc<ToolRegistry>,
    pub key_policy: KeyPolicy,
    pub gate: ModelGate,
    pub notices: Notices,
    pub settings: AppSettings,
}

/// Resolved parameters of one chat or roleplay turn.
struct TextTurn {
    model: String,
    backend: BackendId,
    speakers: Vec<Persona>,
    group: bool,
}

struct Generating<'a>(&'a AtomicBool);

impl Drop for Generating<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct GenerationOrchestrator {
    config: AppConfig,
    store: Arc<dyn PersistedStore>,
    conversations: Arc<ConversationStore>,
    router: Arc<ProviderRouter>,
    media: Arc<dyn MediaBackend>,
    personas: Arc<PersonaCatalog>,
    library: Arc<Library>,
    tools: Arc<ToolRegistry>,
    key_policy: KeyPolicy,
    gate: ModelGate,
    notices: Notices,
    settings: Mutex<AppSettings>,
    identity: Mutex<Identity>,
    current: Mutex<Option<String>>,
    is_generating: AtomicBool,
}

fn relock<T>(e: PoisonError<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    e.into_inner()
}

impl GenerationOrchestrator {
    pub fn new(params: OrchestratorParams) -> Self {
        Self {
            config: params.config,
            store: params.store,
            conversations: params.conversations,
            router: params.router,
            media: params.media,
            personas: params.personas,
            library: params.library,
            tools: params.tools,
            key_policy: params.key_policy,
            gate: params.gate,
            notices: params.notices,
            settings: Mutex::new(params.settings),
            identity: Mutex::new(Identity::anonymous()),
            current: Mutex::new(None),
            is_generating: AtomicBool::new(false),
        }
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn personas(&self) -> &Arc<PersonaCatalog> {
        &self.personas
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating.load(Ordering::Acquire)
    }

    // --- Session state ---

    pub fn settings(&self) -> AppSettings {
        self.settings.lock().unwrap_or_else(relock).clone()
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut AppSettings)) -> Result<(), ChatError> {
        let mut settings = self.settings.lock().unwrap_or_else(relock);
        f(&mut settings);
        SettingsService::save(self.store.as_ref(), &settings)?;
        Ok(())
    }

    pub fn set_identity(&self, identity: Identity) {
        *self.identity.lock().unwrap_or_else(relock) = identity;
    }

    pub fn identity(&self) -> Identity {
        self.identity.lock().unwrap_or_else(relock).clone()
    }

    fn set_current(&self, conversation_id: Option<String>) {
        *self.current.lock().unwrap_or_else(relock) = conversation_id;
    }

    pub fn current_conversation(&self) -> Option<Conversation> {
        let id = self.current.lock().unwrap_or_else(relock).clone()?;
        self.conversations.get(&id)
    }

    pub fn select_conversation(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
        let conversation = self
            .conversations
            .get(conversation_id)
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
        self.set_current(Some(conversation.id.clone()));
        Ok(conversation)
    }

    pub fn start_new_chat(&self, mode: ChatMode) -> Result<String, ChatError> {
        let id = self.conversations.create_conversation(mode, NEW_CHAT_TITLE)?;
        self.set_current(Some(id.clone()));
        tracing::info!("Started {} conversation {}", mode.as_str(), id);
        Ok(id)
    }

    pub fn start_persona_chat(&self, persona_id: &PersonaId) -> Result<String, ChatError> {
        let persona = self
            .personas
            .resolve(persona_id)
            .ok_or_else(|| ChatError::PersonaNotFound(persona_id.to_string()))?;
        let id = self
            .conversations
            .create_group_conversation(&[persona.id.clone()], &persona.name)?;
        self.set_current(Some(id.clone()));
        Ok(id)
    }

    pub fn start_group_chat(&self, persona_ids: &[PersonaId]) -> Result<String, ChatError> {
        if persona_ids.is_empty() {
            return Err(ChatError::NoParticipants);
        }
        let mut names = Vec::with_capacity(persona_ids.len());
        for id in persona_ids {
            let persona = self
                .personas
                .resolve(id)
                .ok_or_else(|| ChatError::PersonaNotFound(id.to_string()))?;
            if !names.contains(&persona.name) {
                names.push(persona.name);
            }
        }
        let title = format!("Group: {}", names.join(", "));
        let id = self
            .conversations
            .create_group_conversation(persona_ids, &title)?;
        self.set_current(Some(id.clone()));
        Ok(id)
    }

    /// Text models of the active backend that this identity may use.
    pub async fn available_text_models(&self) -> Result<Vec<ModelInfo>, ChatError> {
        let settings = self.settings();
        let backend = self.router.resolve(settings.offline_mode);
        let api_key = self.api_key_for(backend);
        let models = self.router.list_models(&backend, &api_key).await?;
        let identity = self.identity();
        let ids: Vec<String> = models.iter().map(|m| m.id.clone()).collect();
        let allowed = self.gate.available_models(&ids, &identity);
        Ok(models
            .into_iter()
            .filter(|m| allowed.contains(&m.id.as_str()))
            .collect())
    }

    // --- Entry points ---

    pub async fn send_message(
        &self,
        conversation_id: Option<&str>,
        text: &str,
        attachments: Vec<FileAttachment>,
    ) -> Result<SendOutcome, ChatError> {
        if text.trim().is_empty() && attachments.is_empty() {
            return self.report(Err(ChatError::EmptyInput));
        }
        let Some(_generating) = self.begin_generation() else {
            return self.report(Err(ChatError::AlreadyGenerating));
        };
        let result = self.send_inner(conversation_id, text, attachments).await;
        self.report(result)
    }

    /// Sends `user_text` again as a fresh user message.
    pub async fn regenerate(
        &self,
        conversation_id: &str,
        user_text: &str,
    ) -> Result<SendOutcome, ChatError> {
        self.send_message(Some(conversation_id), user_text, Vec::new())
            .await
    }

    /// Rewrites a user message, drops everything after it and generates a new
    /// reply for the retained history.
    pub async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<SendOutcome, ChatError> {
        if new_text.trim().is_empty() {
            return self.report(Err(ChatError::EmptyInput));
        }
        let Some(_generating) = self.begin_generation() else {
            return self.report(Err(ChatError::AlreadyGenerating));
        };
        let result = self.edit_inner(conversation_id, message_id, new_text).await;
        self.report(result)
    }

    fn begin_generation(&self) -> Option<Generating<'_>> {
        self.is_generating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Generating(&self.is_generating))
    }

    fn report<T>(&self, result: Result<T, ChatError>) -> Result<T, ChatError> {
        if let Err(e) = &result {
            tracing::warn!("Generation failed: {}", e);
            match e {
                ChatError::AlreadyGenerating | ChatError::EmptyInput => {
                    self.notices.warn(e.user_message())
                }
                _ => self.notices.error(e.user_message()),
            }
        }
        result
    }

    async fn send_inner(
        &self,
        conversation_id: Option<&str>,
        text: &str,
        attachments: Vec<FileAttachment>,
    ) -> Result<SendOutcome, ChatError> {
        let (conversation, created) = match conversation_id {
            Some(id) => (self.select_conversation(id)?, false),
            None => match self.current_conversation() {
                Some(current) => (current, false),
                None => {
                    let id = self.start_new_chat(ChatMode::Chat)?;
                    let conversation = self
                        .conversations
                        .get(&id)
                        .ok_or_else(|| ChatError::ConversationNotFound(id.clone()))?;
                    (conversation, true)
                }
            },
        };
        let settings = self.settings();

        let replies = match conversation.mode {
            ChatMode::Image | ChatMode::Video => {
                let reply = self
                    .generate_media(&conversation, text, Some(attachments), &settings)
                    .await?;
                vec![reply]
            }
            ChatMode::Chat | ChatMode::Roleplay => {
                let turn = self.plan_text_turn(&conversation, &settings)?;
                self.append_user_message(&conversation, text, attachments)?;
                self.run_text_turn(&conversation.id, &turn, &settings).await?
            }
        };

        Ok(SendOutcome {
            conversation_id: conversation.id,
            created,
            replies,
        })
    }

    async fn edit_inner(
        &self,
        conversation_id: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<SendOutcome, ChatError> {
        let conversation = self.select_conversation(conversation_id)?;
        let edited = conversation
            .messages
            .iter()
            .find(|m| m.id == message_id && m.role == Role::User)
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
        let settings = self.settings();
        let turn = match conversation.mode {
            ChatMode::Chat | ChatMode::Roleplay => Some(self.plan_text_turn(&conversation, &settings)?),
            ChatMode::Image | ChatMode::Video => None,
        };
        let edited_id = edited.id.clone();

        self.conversations
            .truncate_messages_after(conversation_id, &edited_id, Some(new_text))?;
        tracing::debug!("Truncated {} after edited message {}", conversation_id, edited_id);

        let replies = match turn {
            Some(turn) => self.run_text_turn(conversation_id, &turn, &settings).await?,
            None => vec![
                self.generate_media(&conversation, new_text, None, &settings)
                    .await?,
            ],
        };

        Ok(SendOutcome {
            conversation_id: conversation_id.to_string(),
            created: false,
            replies,
        })
    }

    fn append_user_message(
        &self,
        conversation: &Conversation,
        text: &str,
        attachments: Vec<FileAttachment>,
    ) -> Result<(), ChatError> {
        let title_source = match attachments.first() {
            Some(first) if text.trim().is_empty() => first.name.clone(),
            _ => text.trim().to_string(),
        };
        let appended = self
            .conversations
            .append_message(&conversation.id, Message::user(text, attachments))?;
        if !appended {
            return Err(ChatError::ConversationNotFound(conversation.id.clone()));
        }
        if conversation.messages.is_empty() {
            self.conversations
                .set_title(&conversation.id, &truncate_title(&title_source))?;
        }
        Ok(())
    }

    fn api_key_for(&self, backend: BackendId) -> String {
        match backend {
            BackendId::Remote => self.key_policy.credential_for_current_usage().to_string(),
            BackendId::Local => String::new(),
        }
    }

    // --- Chat and roleplay ---

    fn plan_text_turn(
        &self,
        conversation: &Conversation,
        settings: &AppSettings,
    ) -> Result<TextTurn, ChatError> {
        let model = match conversation.mode {
            ChatMode::Roleplay => self.config.roleplay_model.clone(),
            _ if settings.search_mode => self.config.search_model.clone(),
            _ => settings.text_model.clone(),
        };
        self.gate.ensure_allowed(&model, &self.identity())?;

        let mut speakers = Vec::new();
        if conversation.mode == ChatMode::Roleplay {
            for id in &conversation.participants {
                match self.personas.resolve(id) {
                    Some(persona) if persona.enabled || !conversation.is_group_chat => {
                        speakers.push(persona)
                    }
                    Some(_) => tracing::debug!("Skipping disabled participant {}", id),
                    None if conversation.is_group_chat => {
                        tracing::warn!("Group participant {} no longer exists", id)
                    }
                    None => return Err(ChatError::PersonaNotFound(id.to_string())),
                }
            }
            if speakers.is_empty() {
                return Err(ChatError::NoParticipants);
            }
        }

        Ok(TextTurn {
            model,
            backend: self.router.resolve(settings.offline_mode),
            speakers,
            group: conversation.is_group_chat,
        })
    }

    async fn run_text_turn(
        &self,
        conversation_id: &str,
        turn: &TextTurn,
        settings: &AppSettings,
    ) -> Result<Vec<String>, ChatError> {
        if !turn.group {
            let (system, temperature) = match turn.speakers.first() {
                Some(persona) => (Some(system_prompt_for(persona)), persona.temperature),
                None => (self.chat_system_prompt(settings), settings.temperature),
            };
            let speaker = turn.speakers.first().map(|p| p.id.clone());
            let reply = self
                .generate_reply(conversation_id, turn, settings, system, temperature, speaker)
                .await?;
            return Ok(vec![reply]);
        }

        let mut replies = Vec::with_capacity(turn.speakers.len());
        for speaker in &turn.speakers {
            let system = group_system_prompt(speaker, &turn.speakers);
            tracing::debug!("Group turn for {}", speaker.id);
            let reply = self
                .generate_reply(
                    conversation_id,
                    turn,
                    settings,
                    Some(system),
                    speaker.temperature,
                    Some(speaker.id.clone()),
                )
                .await?;
            replies.push(reply);
        }
        Ok(replies)
    }

    fn chat_system_prompt(&self, settings: &AppSettings) -> Option<String> {
        let parts: Vec<String> = settings
            .default_system_prompt
            .iter()
            .filter(|p| !p.trim().is_empty())
            .cloned()
            .chain(self.library.memory_prompt())
            .collect();
        if !parts.is_empty() {
            return Some(parts.join("\n\n"));
        }
        settings
            .search_mode
            .then(|| SEARCH_SYSTEM_PROMPT.to_string())
    }

    /// Wire history: optional system prompt, then the trailing window of
    /// stored messages. The newest message is always kept.
    fn build_history(
        &self,
        conversation: &Conversation,
        system: Option<String>,
        history_window: usize,
        group: &[Persona],
    ) -> Vec<ChatMessage> {
        let names: HashMap<&PersonaId, &str> =
            group.iter().map(|p| (&p.id, p.name.as_str())).collect();
        let messages: Vec<&Message> = conversation
            .messages
            .iter()
            .filter(|m| !m.is_streaming)
            .collect();
        let start = match history_window {
            0 => 0,
            n => messages.len().saturating_sub(n + 1),
        };

        let mut history = Vec::with_capacity(messages.len() - start + 1);
        if let Some(system) = system {
            history.push(ChatMessage::text(ChatRole::System, system));
        }
        for message in &messages[start..] {
            let content = match message.role {
                Role::User => user_content(&message.content, &message.attachments),
                Role::Assistant => {
                    let speaker = message.speaker.as_ref().and_then(|s| names.get(s));
                    match speaker {
                        Some(name) => MessageContent::Text(format!("[{}]: {}", name, message.content)),
                        None => MessageContent::Text(message.content.clone()),
                    }
                }
            };
            history.push(ChatMessage {
                role: message.role.into(),
                content,
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
            });
        }
        history
    }

    /// Placeholder in, reply streamed into it, then finalized or rolled back.
    async fn generate_reply(
        &self,
        conversation_id: &str,
        turn: &TextTurn,
        settings: &AppSettings,
        system: Option<String>,
        temperature: f32,
        speaker: Option<PersonaId>,
    ) -> Result<String, ChatError> {
        let conversation = self
            .conversations
            .get(conversation_id)
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
        let group = if turn.group { turn.speakers.as_slice() } else { &[] };
        let messages = self.build_history(&conversation, system, settings.history_window, group);

        let use_tools = settings.tools_enabled
            && conversation.mode == ChatMode::Chat
            && !self.tools.is_empty();
        let mut request = ChatRequest {
            api_key: self.api_key_for(turn.backend),
            model: turn.model.clone(),
            messages,
            temperature: Some(temperature),
            max_tokens: settings.max_tokens,
            tools: if use_tools { self.tools.definitions() } else { Vec::new() },
            tool_choice: use_tools.then_some(ToolChoice::Auto),
        };

        let mut placeholder = Message::placeholder();
        if let Some(speaker) = speaker {
            placeholder = placeholder.with_speaker(speaker);
        }
        if !self.conversations.append_message(conversation_id, placeholder)? {
            return Err(ChatError::ConversationNotFound(conversation_id.to_string()));
        }

        tracing::info!(
            "Generating with {} on {} backend",
            request.model,
            turn.backend.as_str()
        );
        let finished = self
            .run_rounds(conversation_id, &mut request, turn.backend, settings.stream_responses)
            .await
            .and_then(|reply| {
                self.conversations
                    .update_last_message(conversation_id, &reply, false)?;
                Ok(reply)
            });
        match finished {
            Ok(reply) => {
                tracing::debug!("Generation finished ({} chars)", reply.len());
                Ok(reply)
            }
            Err(e) => {
                if let Err(rollback) = self
                    .conversations
                    .remove_last_message_if_streaming(conversation_id)
                {
                    tracing::error!("Failed to roll back placeholder: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Backend rounds, executing requested tools in between. Text from every
    /// round lands in the same placeholder, separated by a blank line.
    async fn run_rounds(
        &self,
        conversation_id: &str,
        request: &mut ChatRequest,
        backend: BackendId,
        stream: bool,
    ) -> Result<String, ChatError> {
        let mut reply = String::new();
        let max_rounds = self.config.max_tool_iterations.max(1);

        for round in 1..=max_rounds {
            let (round_text, calls) = if stream {
                self.stream_round(conversation_id, request, backend, &mut reply)
                    .await?
            } else {
                let response = self.router.send_chat(&backend, request.clone()).await?;
                if !response.content.is_empty() {
                    push_round_text(&mut reply, true, &response.content);
                    self.conversations
                        .update_last_message(conversation_id, &reply, true)?;
                }
                (response.content, response.tool_calls)
            };

            if calls.is_empty() || request.tools.is_empty() {
                break;
            }
            if round == max_rounds {
                tracing::warn!("Stopping after {} tool rounds", max_rounds);
                break;
            }

            let mut results: Vec<ToolResult> = Vec::with_capacity(calls.len());
            for call in &calls {
                let result = self.tools.execute(call).await;
                tracing::debug!("Tool {} returned error={}", call.name, result.is_error);
                results.push(result);
            }
            request.messages.push(ChatMessage {
                role: ChatRole::Assistant,
                content: MessageContent::Text(round_text),
                tool_calls: calls,
                tool_results: Vec::new(),
            });
            request.messages.push(ChatMessage {
                role: ChatRole::User,
                content: MessageContent::Text(String::new()),
                tool_calls: Vec::new(),
                tool_results: results,
            });
        }

        // Matches the backends' non-streaming contract: a reply with no text
        // is a failed reply, not an empty message.
        if reply.is_empty() {
            return Err(ChatError::Provider(ProviderError::InvalidResponse(
                "No content in response".to_string(),
            )));
        }
        Ok(reply)
    }

    /// One streamed round. Tokens are appended to `reply` and written through
    /// to the placeholder in arrival order.
    async fn stream_round(
        &self,
        conversation_id: &str,
        request: &ChatRequest,
        backend: BackendId,
        reply: &mut String,
    ) -> Result<(String, Vec<ToolCall>), ChatError> {
        let (tx, rx) = mpsc::channel::<StreamEvent>(64);
        let producer = self.router.stream_chat(&backend, request.clone(), tx);

        // Owns `rx` so that bailing out closes the channel and stops the producer.
        let consumer = async {
            let mut rx = rx;
            let mut round_text = String::new();
            let mut calls = Vec::new();
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Token(token) => {
                        push_round_text(reply, round_text.is_empty(), &token);
                        round_text.push_str(&token);
                        self.conversations
                            .update_last_message(conversation_id, reply, true)?;
                    }
                    StreamEvent::ToolCallComplete { call } => calls.push(call),
                    StreamEvent::Done { tokens_in, tokens_out, .. } => {
                        tracing::debug!("Stream done: in={:?} out={:?}", tokens_in, tokens_out);
                    }
                    StreamEvent::Error(message) => {
                        return Err(ChatError::Provider(ProviderError::NetworkError(message)));
                    }
                }
            }
            Ok((round_text, calls))
        };

        let (produced, consumed) = tokio::join!(producer, consumer);
        produced?;
        consumed
    }

    // --- Image and video ---

    /// Nothing is written unless generation succeeds. `attachments` is `None`
    /// when the prompt message is already stored (edit).
    async fn generate_media(
        &self,
        conversation: &Conversation,
        prompt: &str,
        attachments: Option<Vec<FileAttachment>>,
        settings: &AppSettings,
    ) -> Result<String, ChatError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ChatError::EmptyInput);
        }
        let (kind, model) = match conversation.mode {
            ChatMode::Image => (MediaKind::Image, settings.image_model.clone()),
            ChatMode::Video => (MediaKind::Video, settings.video_model.clone()),
            other => return Err(ChatError::WrongMode(other.as_str())),
        };
        self.gate.ensure_allowed(&model, &self.identity())?;

        let mut options = default_media_options(kind);
        if let Some(reference) = attachments
            .iter()
            .flatten()
            .find(|a| a.is_image())
            .and_then(|a| a.data_url())
        {
            options = options.set("image", reference);
        }

        let request = MediaRequest {
            kind,
            prompt: prompt.to_string(),
            model: model.clone(),
            options,
            api_key: self.key_policy.credential_for_current_usage().to_string(),
        };
        tracing::info!("Generating {:?} with {}", kind, model);
        let blob = self.media.generate(request).await?;

        let descriptor = MediaDescriptor {
            url: blob.url,
            prompt: prompt.to_string(),
            model,
            timestamp: Utc::now(),
        };
        let content = serde_json::to_string(&descriptor).map_err(StoreError::from)?;

        if let Some(attachments) = attachments {
            self.append_user_message(conversation, prompt, attachments)?;
        }
        if !self
            .conversations
            .append_message(&conversation.id, Message::assistant(content.clone()))?
        {
            return Err(ChatError::ConversationNotFound(conversation.id.clone()));
        }
        Ok(content)
    }
}

fn push_round_text(reply: &mut String, first_of_round: bool, text: &str) {
    if first_of_round && !reply.is_empty() {
        reply.push_str("\n\n");
    }
    reply.push_str(text);
}

fn default_media_options(kind: MediaKind) -> MediaOptions {
    match kind {
        MediaKind::Image => MediaOptions::new()
            .set("width", 1024)
            .set("height", 1024)
            .set("nologo", true),
        MediaKind::Video => MediaOptions::new()
            .set("duration", 5)
            .set("aspectRatio", "16:9")
            .set("audio", false),
    }
}

/// Plain text unless an image is attached. Text and JSON files are inlined;
/// other files are mentioned by name only.
pub fn user_content(text: &str, attachments: &[FileAttachment]) -> MessageContent {
    let mut body = text.to_string();
    for attachment in attachments.iter().filter(|a| !a.is_image()) {
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        match attachment.text().filter(|_| attachment.is_textual()) {
            Some(contents) => {
                body.push_str(&format!("--- {} ---\n{}", attachment.name, contents));
            }
            None => body.push_str(&format!(
                "[Attached file: {} ({}, {} bytes)]",
                attachment.name, attachment.mime_type, attachment.size
            )),
        }
    }

    if !attachments.iter().any(FileAttachment::is_image) {
        return MessageContent::Text(body);
    }

    let mut parts = Vec::with_capacity(attachments.len() + 1);
    if !body.is_empty() {
        parts.push(ContentPart::Text { text: body });
    }
    for url in attachments
        .iter()
        .filter(|a| a.is_image())
        .filter_map(FileAttachment::data_url)
    {
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url,
                detail: "auto".to_string(),
            },
        });
    }
    MessageContent::Parts(parts)
}

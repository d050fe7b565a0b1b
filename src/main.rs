use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use parley::config::AppConfig;
use parley::models::{ChatMode, PersonaId, PersonaSource, Role};
use parley::providers::{BackendId, OpenAiCompatibleBackend, PollinationsMediaBackend, ProviderRouter};
use parley::services::export::export_to_markdown;
use parley::services::{
    AllowListEntitlements, ConversationEvent, ConversationStore, GenerationOrchestrator, Identity,
    KeyPolicy, Library, ModelGate, Notice, NoticeLevel, Notices, OrchestratorParams, PersonaCatalog,
    SettingsService,
};
use parley::store::{PersistedStore, SqliteStore};
use parley::tools::{builtin, ToolRegistry};

const HELP: &str = "\
Commands:
  /new [chat|image|video]     start a conversation
  /persona <id>               roleplay with one persona
  /personas                   list personas
  /group <id,id,...>          group roleplay
  /list                       list conversations
  /use <id|#>                 switch conversation
  /messages                   show messages with ids
  /edit <msg-id> <text>       edit a message and regenerate
  /pin                        toggle pin on current conversation
  /fav [msg-id]               toggle favorite (last message by default)
  /tag <a,b,...>              set tags
  /find <text>                search conversations
  /delete                     delete current conversation
  /clear <mode>               delete every conversation of a mode
  /remember <text>            add a memory
  /offline on|off             use the local engine
  /searchmode on|off          force the search model
  /tools on|off               let the model call tools
  /models                     list available text models
  /login <email>              set identity
  /export                     print current conversation as markdown
  /quit";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env();
    let db_path = config.database_path()?;
    let store: Arc<dyn PersistedStore> = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open store at {}", db_path.display()))?,
    );
    tracing::info!("Using store at {}", db_path.display());

    let notices = Notices::new();
    tokio::spawn(follow_notices(notices.subscribe()));
    let conversations = Arc::new(
        ConversationStore::load(store.clone(), &notices).context("Failed to load conversations")?,
    );
    let personas = Arc::new(PersonaCatalog::load(store.clone(), &notices));
    let library = Arc::new(Library::load(store.clone(), &notices));
    let settings = SettingsService::load(store.as_ref(), &notices);

    let mut router = ProviderRouter::new();
    router.register(Arc::new(OpenAiCompatibleBackend::new(
        BackendId::Remote,
        config.api_base_url.clone(),
        config.request_timeout(),
    )));
    router.register(Arc::new(OpenAiCompatibleBackend::new(
        BackendId::Local,
        config.local_base_url.clone(),
        config.request_timeout(),
    )));
    let media = Arc::new(PollinationsMediaBackend::new(
        config.image_base_url.clone(),
        config.video_base_url.clone(),
        config.request_timeout(),
    ));

    let mut tools = ToolRegistry::new();
    builtin::register_all(&mut tools);

    let entitlements =
        AllowListEntitlements::new(&config.entitled_identities, &config.entitled_domains);
    let orchestrator = GenerationOrchestrator::new(OrchestratorParams {
        key_policy: KeyPolicy::new(store.clone(), config.tier_keys.clone()),
        gate: ModelGate::new(config.restricted_models.clone(), Arc::new(entitlements)),
        config,
        store,
        conversations: conversations.clone(),
        router: Arc::new(router),
        media,
        personas: personas.clone(),
        library,
        tools: Arc::new(tools),
        notices,
        settings,
    });

    if let Some(recent) = conversations.most_recent(ChatMode::Chat) {
        orchestrator.select_conversation(&recent.id)?;
        orchestrator
            .notices()
            .info(format!("Resumed \"{}\"", recent.title));
    }

    tokio::spawn(follow_conversations(conversations.clone(), personas.clone()));

    println!("parley ready. Type /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/quit" {
            break;
        }
        if let Err(e) = handle_line(&orchestrator, input).await {
            eprintln!("! {}", e);
        }
    }

    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}

fn on_off(arg: &str) -> Result<bool> {
    match arg {
        "on" => Ok(true),
        "off" => Ok(false),
        other => anyhow::bail!("Expected on or off, got '{}'", other),
    }
}

fn current_id(orchestrator: &GenerationOrchestrator) -> Result<String> {
    orchestrator
        .current_conversation()
        .map(|c| c.id)
        .context("No conversation selected")
}

async fn handle_line(orchestrator: &GenerationOrchestrator, input: &str) -> Result<()> {
    let conversations = orchestrator.conversations();

    let Some(command) = input.strip_prefix('/') else {
        // Errors were already published as notices.
        let _ = orchestrator.send_message(None, input, Vec::new()).await;
        return Ok(());
    };
    let (name, arg) = command
        .split_once(' ')
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));

    match name {
        "help" => println!("{}", HELP),
        "new" => {
            let mode = match arg {
                "" => ChatMode::Chat,
                other => ChatMode::from_str(other)
                    .filter(|m| *m != ChatMode::Roleplay)
                    .with_context(|| format!("Unknown mode '{}'", other))?,
            };
            orchestrator.start_new_chat(mode)?;
            println!("Started a new {} conversation", mode.as_str());
        }
        "persona" => {
            let id = PersonaSource::parse(arg).persona_id();
            orchestrator.start_persona_chat(&id)?;
            println!("Roleplaying with {}", arg);
        }
        "personas" => {
            for persona in orchestrator.personas().all() {
                let state = if persona.enabled { "" } else { " (disabled)" };
                println!("{:<40} {}{}", persona.id.as_str(), persona.name, state);
            }
        }
        "group" => {
            let ids: Vec<PersonaId> = arg
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| PersonaSource::parse(s).persona_id())
                .collect();
            orchestrator.start_group_chat(&ids)?;
            println!("Group chat with {} participants", ids.len());
        }
        "list" => {
            let current = orchestrator.current_conversation().map(|c| c.id);
            for (idx, c) in conversations.list_sorted().iter().enumerate() {
                let marker = if current.as_deref() == Some(c.id.as_str()) { "*" } else { " " };
                let pin = if c.is_pinned { " [pinned]" } else { "" };
                println!(
                    "{}{:>3} {:<8} {}{}  ({})",
                    marker,
                    idx + 1,
                    c.mode.as_str(),
                    c.title,
                    pin,
                    c.id
                );
            }
        }
        "use" => {
            let id = match arg.trim_start_matches('#').parse::<usize>() {
                Ok(n) if n > 0 => conversations
                    .list_sorted()
                    .get(n - 1)
                    .map(|c| c.id.clone())
                    .with_context(|| format!("No conversation #{}", n))?,
                _ => arg.to_string(),
            };
            let conversation = orchestrator.select_conversation(&id)?;
            println!("Switched to \"{}\"", conversation.title);
        }
        "messages" => {
            let conversation = orchestrator
                .current_conversation()
                .context("No conversation selected")?;
            for m in &conversation.messages {
                let who = match m.role {
                    Role::User => "you",
                    Role::Assistant => "ai",
                };
                let fav = if m.is_favorite { "*" } else { " " };
                println!("{} {} {:<3} {}", m.id, fav, who, m.content);
            }
        }
        "edit" => {
            let (message_id, text) = arg
                .split_once(' ')
                .context("Usage: /edit <msg-id> <text>")?;
            let id = current_id(orchestrator)?;
            let _ = orchestrator.edit_message(&id, message_id, text.trim()).await;
        }
        "pin" => {
            let conversation = orchestrator
                .current_conversation()
                .context("No conversation selected")?;
            conversations.set_pinned(&conversation.id, !conversation.is_pinned)?;
        }
        "fav" => {
            let conversation = orchestrator
                .current_conversation()
                .context("No conversation selected")?;
            let message_id = match arg {
                "" => conversation
                    .messages
                    .last()
                    .map(|m| m.id.clone())
                    .context("Conversation is empty")?,
                id => id.to_string(),
            };
            match conversations.toggle_message_favorite(&conversation.id, &message_id)? {
                Some(true) => println!("Marked as favorite"),
                Some(false) => println!("Removed from favorites"),
                None => println!("No such message"),
            }
        }
        "tag" => {
            let id = current_id(orchestrator)?;
            let tags: Vec<String> = arg.split(',').map(str::to_string).collect();
            conversations.set_tags(&id, &tags)?;
        }
        "find" => {
            for c in conversations.search(arg) {
                println!("{:<8} {}  ({})", c.mode.as_str(), c.title, c.id);
            }
        }
        "delete" => {
            let id = current_id(orchestrator)?;
            conversations.delete_conversation(&id)?;
            println!("Deleted");
        }
        "clear" => {
            let mode = ChatMode::from_str(arg).with_context(|| format!("Unknown mode '{}'", arg))?;
            let removed = conversations.clear_mode(mode)?;
            println!("Removed {} {} conversations", removed, mode.as_str());
        }
        "remember" => match orchestrator.library().add_memory(arg)? {
            Some(_) => println!("Remembered"),
            None => println!("Nothing to remember"),
        },
        "offline" => {
            let on = on_off(arg)?;
            orchestrator.update_settings(|s| s.offline_mode = on)?;
        }
        "searchmode" => {
            let on = on_off(arg)?;
            orchestrator.update_settings(|s| s.search_mode = on)?;
        }
        "tools" => {
            let on = on_off(arg)?;
            orchestrator.update_settings(|s| s.tools_enabled = on)?;
        }
        "models" => {
            for model in orchestrator.available_text_models().await? {
                println!("{:<24} {}", model.id, model.name);
            }
        }
        "login" => {
            orchestrator.set_identity(Identity::with_email(arg));
            println!("Signed in as {}", arg);
        }
        "export" => {
            let conversation = orchestrator
                .current_conversation()
                .context("No conversation selected")?;
            println!("{}", export_to_markdown(&conversation));
        }
        other => anyhow::bail!("Unknown command /{} (try /help)", other),
    }

    Ok(())
}

/// Prints assistant text as it streams in.
async fn follow_conversations(conversations: Arc<ConversationStore>, personas: Arc<PersonaCatalog>) {
    let mut events = conversations.subscribe();
    let mut printed = 0usize;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Display lagged by {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        match event {
            ConversationEvent::MessageAppended { message, .. } if message.role == Role::Assistant => {
                let label = message
                    .speaker
                    .as_ref()
                    .and_then(|id| personas.resolve(id))
                    .map(|p| p.name)
                    .unwrap_or_else(|| "assistant".to_string());
                print!("{}: {}", label, message.content);
                printed = message.content.len();
                if !message.is_streaming {
                    println!();
                }
            }
            ConversationEvent::LastMessageUpdated {
                content,
                is_streaming,
                ..
            } => {
                if let Some(delta) = content.get(printed..) {
                    print!("{}", delta);
                }
                printed = content.len();
                if !is_streaming {
                    println!();
                }
            }
            ConversationEvent::MessageRemoved { .. } => {
                println!();
                printed = 0;
            }
            _ => {}
        }
        let _ = std::io::stdout().flush();
    }
}

async fn follow_notices(mut rx: broadcast::Receiver<Notice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => {
                let prefix = match notice.level {
                    NoticeLevel::Info => "i",
                    NoticeLevel::Warning => "!",
                    NoticeLevel::Error => "x",
                };
                eprintln!("{} {}", prefix, notice.message);
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        }
    }
}

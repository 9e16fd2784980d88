//! # Conversation handling
//!
//! Transport-agnostic routing of inbound messages: commands, per-user search
//! mode, and the classify → embed → store pipeline. The Telegram loop and the
//! local `chat` REPL both feed [`Inbound`] values into a shared
//! [`ConversationHandler`] and send back the plain-text reply it renders.
//!
//! ## Routing
//! - `/start`, `/stats`, `/search`, `/help` (or the matching button callback)
//!   run the command.
//! - Otherwise, if the user armed search mode with `/search`, the text is the
//!   search query and search mode is cleared.
//! - Otherwise the text is classified, embedded and stored.
//!
//! ## Degraded mode
//! Dependencies are optional. When the classifier, embedder or store is
//! missing, processing and search answer with a "services unavailable"
//! message; `/stats` only needs the store; `/start` and `/help` always work.

use chrono::{Local, TimeZone};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::classifier::TopicClassifier;
use crate::embedding::{Embedder, embed_blocking};
use crate::topic::Topic;
use crate::vector_store::{MessageMatch, MessageStore};

const PREVIEW_CHARS: usize = 100;
const ALTERNATIVE_TAGS: usize = 3;

/// A recognized command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stats,
    Search,
    Help,
}

impl Command {
    /// Parse `/name` or `/name@botname` at the start of a message.
    pub fn parse(text: &str) -> Option<Command> {
        let first = text.split_whitespace().next()?;
        let name = first.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        Self::from_name(name)
    }

    /// Button callback payloads.
    pub fn from_callback(data: &str) -> Option<Command> {
        match data.trim() {
            "menu" => Some(Command::Start),
            other => Self::from_name(other),
        }
    }

    fn from_name(name: &str) -> Option<Command> {
        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Command::Start),
            "stats" => Some(Command::Stats),
            "search" => Some(Command::Search),
            "help" => Some(Command::Help),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Text(String),
    /// Payload of a pressed button.
    Callback(String),
    /// Stickers, photos, voice notes...
    NonText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub user_id: i64,
    pub input: Input,
}

impl Inbound {
    pub fn text(user_id: i64, text: impl Into<String>) -> Self {
        Self {
            user_id,
            input: Input::Text(text.into()),
        }
    }
}

/// Optional collaborators; `None` means the component failed to start.
#[derive(Clone, Default)]
pub struct Dependencies {
    pub classifier: Option<Arc<TopicClassifier>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub store: Option<Arc<dyn MessageStore>>,
}

impl Dependencies {
    pub fn is_complete(&self) -> bool {
        self.classifier.is_some() && self.embedder.is_some() && self.store.is_some()
    }
}

struct Services<'a> {
    classifier: &'a TopicClassifier,
    embedder: &'a Arc<dyn Embedder>,
    store: &'a Arc<dyn MessageStore>,
}

pub struct ConversationHandler {
    deps: Dependencies,
    search_limit: usize,
    awaiting_query: Mutex<HashSet<i64>>,
}

impl ConversationHandler {
    pub fn new(deps: Dependencies, search_limit: usize) -> Self {
        if !deps.is_complete() {
            warn!("Some services are unavailable; running with limited functionality");
        }
        Self {
            deps,
            search_limit,
            awaiting_query: Mutex::new(HashSet::new()),
        }
    }

    fn services(&self) -> Option<Services<'_>> {
        Some(Services {
            classifier: self.deps.classifier.as_deref()?,
            embedder: self.deps.embedder.as_ref()?,
            store: self.deps.store.as_ref()?,
        })
    }

    fn arm_search(&self, user_id: i64) {
        self.awaiting_query
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id);
    }

    fn is_searching(&self, user_id: i64) -> bool {
        self.awaiting_query
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&user_id)
    }

    fn disarm_search(&self, user_id: i64) -> bool {
        self.awaiting_query
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id)
    }

    /// Route one inbound message and render the reply.
    pub async fn handle(&self, inbound: Inbound) -> String {
        let user_id = inbound.user_id;
        match inbound.input {
            Input::Callback(data) => match Command::from_callback(&data) {
                Some(command) => self.run_command(command, user_id).await,
                None => {
                    debug!("Ignoring unknown callback {data:?} from user {user_id}");
                    "❓ Unknown action.".to_string()
                }
            },
            Input::NonText if self.is_searching(user_id) => {
                "❌ Please send a text message to search for.".to_string()
            }
            Input::NonText => "❌ I only work with text messages.".to_string(),
            Input::Text(text) => {
                if let Some(command) = Command::parse(&text) {
                    self.run_command(command, user_id).await
                } else if self.disarm_search(user_id) {
                    self.search(&text).await
                } else {
                    self.process_message(&text, user_id).await
                }
            }
        }
    }

    async fn run_command(&self, command: Command, user_id: i64) -> String {
        debug!("User {user_id} ran {command:?}");
        match command {
            Command::Start => render_menu(),
            Command::Help => render_help(),
            Command::Stats => self.stats(user_id).await,
            Command::Search => {
                if self.services().is_none() {
                    return "❌ Services unavailable.".to_string();
                }
                self.arm_search(user_id);
                "🔍 Send a message to search for similar records:".to_string()
            }
        }
    }

    async fn stats(&self, user_id: i64) -> String {
        let Some(store) = &self.deps.store else {
            return "❌ Database unavailable.".to_string();
        };
        let total = store.count_messages().await;
        format!(
            "📊 Database statistics\n\n📝 Total messages: {total}\n👤 Your ID: {user_id}\n🕐 Requested at: {}",
            Local::now().format("%H:%M:%S")
        )
    }

    async fn search(&self, query: &str) -> String {
        let Some(services) = self.services() else {
            return "❌ Services unavailable.".to_string();
        };

        let vector = embed_blocking(Arc::clone(services.embedder), query.to_string()).await;
        let matches = services.store.search_similar(&vector, self.search_limit).await;
        render_matches(&matches)
    }

    async fn process_message(&self, text: &str, user_id: i64) -> String {
        let Some(services) = self.services() else {
            return "❌ Services unavailable. Try again later.".to_string();
        };

        let tag = services.classifier.classify(text);
        let vector = embed_blocking(Arc::clone(services.embedder), text.to_string()).await;

        if !services.store.insert(text, &vector, tag.label(), user_id).await {
            return "❌ Failed to save the message to the database.".to_string();
        }
        info!("Stored message from user {user_id} tagged {}", tag.key());

        let alternatives = services.classifier.ranked_labels(text, ALTERNATIVE_TAGS);
        render_processed(text, tag, &alternatives)
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

fn format_timestamp(ts: i64) -> String {
    Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%d.%m.%Y %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn render_processed(text: &str, tag: Topic, alternatives: &[(Topic, f64)]) -> String {
    let mut out = format!(
        "✅ Message processed and saved!\n\n📝 Text: {}\n\n🏷️ Assigned tag: {tag}\n\n📊 Other possible tags:\n",
        preview(text)
    );
    for (i, (topic, p)) in alternatives.iter().enumerate() {
        out.push_str(&format!("{}. {topic} ({:.1}%)\n", i + 1, p * 100.0));
    }
    out.push_str("\n💾 Status: saved to the database");
    out
}

pub fn render_matches(matches: &[MessageMatch]) -> String {
    if matches.is_empty() {
        return "🔍 No similar messages found.".to_string();
    }
    let mut out = String::from("🔍 Similar messages:\n\n");
    for (i, m) in matches.iter().enumerate() {
        out.push_str(&format!(
            "{}. {}\n   🏷️ Tag: {}\n   📊 Similarity: {:.1}%\n   📅 Date: {}\n\n",
            i + 1,
            preview(&m.text),
            m.tag,
            m.similarity_percent(),
            format_timestamp(m.created_time)
        ));
    }
    out.truncate(out.trim_end().len());
    out
}

fn render_menu() -> String {
    "🤖 Welcome to the message tagging bot!\n\n\
     I can:\n\
     • 📝 classify your messages by topic\n\
     • 🏷️ tag them automatically\n\
     • 💾 store them in a vector database\n\
     • 🔍 find similar messages\n\n\
     Just send me any message and I will process it.\n\n\
     Commands:\n\
     /start - show this menu\n\
     /stats - database statistics\n\
     /search - search similar messages\n\
     /help - help"
        .to_string()
}

fn render_help() -> String {
    let mut out = String::from(
        "🆘 Help\n\n\
         Send any text message and I will:\n\
         1. detect its topic\n\
         2. build a vector representation\n\
         3. store it in the database\n\n\
         Topics:\n",
    );
    for topic in Topic::CATEGORIES {
        out.push_str(&format!("• {} ({})\n", topic.label(), topic.key()));
    }
    out.push_str(&format!(
        "Messages the classifier is unsure about are tagged {}.\n\n\
         Use /search, then send a text to find similar messages.",
        Topic::Other.label()
    ));
    out
}

//! Assistant engine - routes commands, free text and button presses into
//! the preference store, response cache and follow-up resolver.
//!
//! Events are handled independently and concurrently. "Last query" is
//! therefore best-effort: a `/pronunciation` racing a new word may resolve
//! against either one. Two concurrent misses for the same fingerprint both
//! call the model; the cache upsert keeps the last answer.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use teloxide::utils::command::BotCommands;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::assistant::commands::Command;
use crate::assistant::database::{DEFAULT_SPEECH_SPEED, Database, StoreError};
use crate::assistant::keyboard::{self, Callback, SpeechSpeed};
use crate::assistant::prompts::PromptBook;
use crate::assistant::query::{Fingerprint, HelpMode};
use crate::assistant::resolver::{self, NO_SELECTION, Resolution};
use crate::assistant::telegram::Transport;
use crate::openai::{self, LanguageModel};

const THINKING: &str = "Thinking...";
const CHOOSE_LANGUAGE: &str = "Please choose a language you want help learning:";
const CHOOSE_SPEED: &str = "Please choose a speech speed:";
const CHOOSE_EXAMPLE: &str = "Please choose an example:";

/// Max chars of the spoken text used as the voice caption.
const MAX_CAPTION_LENGTH: usize = 200;

/// Assistant configuration.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Mode assigned to users on their first query.
    pub default_help_mode: HelpMode,
    /// Users allowed to talk to the bot. Empty allows everyone.
    pub allowed_user_ids: HashSet<i64>,
    pub prompts: PromptBook,
    /// Cached responses older than this are evicted.
    pub cache_ttl: chrono::Duration,
    pub eviction_interval: Duration,
    /// Upper bound on handling a single event.
    pub request_timeout: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            default_help_mode: HelpMode::Examples,
            allowed_user_ids: HashSet::new(),
            prompts: PromptBook::builtin(),
            cache_ttl: chrono::Duration::hours(24),
            eviction_interval: Duration::from_secs(60 * 60),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// An inbound event, already stripped of transport details.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command { user_id: i64, chat_id: i64, command: Command },
    Text { user_id: i64, chat_id: i64, text: String },
    Callback { user_id: i64, chat_id: i64, message_id: i64, data: String },
}

impl Event {
    /// Classify a text message. Unknown commands and blank text give `None`.
    /// Free text is kept verbatim since it becomes the cache fingerprint.
    pub fn from_message(user_id: i64, chat_id: i64, text: &str, bot_username: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            return match Command::parse(trimmed, bot_username) {
                Ok(command) => Some(Event::Command { user_id, chat_id, command }),
                Err(e) => {
                    debug!("Ignoring command {:?} from {}: {}", trimmed, user_id, e);
                    None
                }
            };
        }
        Some(Event::Text { user_id, chat_id, text: text.to_string() })
    }

    pub fn user_id(&self) -> i64 {
        match self {
            Event::Command { user_id, .. }
            | Event::Text { user_id, .. }
            | Event::Callback { user_id, .. } => *user_id,
        }
    }
}

/// Why a free-text query got no answer.
#[derive(Debug)]
pub enum AnswerError {
    EmptyText,
    Store(StoreError),
    Model(openai::Error),
}

impl fmt::Display for AnswerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyText => write!(f, "message is empty"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Model(e) => write!(f, "model call failed: {e}"),
        }
    }
}

impl std::error::Error for AnswerError {}

impl From<StoreError> for AnswerError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// The assistant engine.
pub struct Assistant {
    config: AssistantConfig,
    database: Arc<Database>,
    telegram: Arc<dyn Transport>,
    model: Arc<dyn LanguageModel>,
}

impl Assistant {
    pub fn new(
        config: AssistantConfig,
        database: Arc<Database>,
        telegram: Arc<dyn Transport>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self { config, database, telegram, model }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Start the background cache eviction sweep.
    pub fn start_eviction_sweep(&self) -> JoinHandle<()> {
        spawn_eviction_sweep(
            self.database.clone(),
            self.config.cache_ttl,
            self.config.eviction_interval,
        )
    }

    /// Handle `event` in its own task under the request timeout. A panic
    /// inside the handler is logged here and goes no further.
    pub async fn dispatch(self: &Arc<Self>, event: Event) {
        let assistant = Arc::clone(self);
        let timeout = self.config.request_timeout;
        let user_id = event.user_id();

        let task = tokio::spawn(async move {
            if tokio::time::timeout(timeout, assistant.handle(event)).await.is_err() {
                warn!("Event from user {} timed out after {:?}", user_id, timeout);
            }
        });

        if let Err(e) = task.await {
            if e.is_panic() {
                error!("Event handler for user {} panicked: {}", user_id, e);
            } else {
                warn!("Event handler for user {} was cancelled", user_id);
            }
        }
    }

    /// Handle one inbound event.
    pub async fn handle(&self, event: Event) {
        let user_id = event.user_id();
        if !self.config.allowed_user_ids.is_empty() && !self.config.allowed_user_ids.contains(&user_id) {
            info!("User {} is not allowed to use the bot", user_id);
            return;
        }

        match event {
            Event::Command { user_id, chat_id, command } => {
                self.handle_command(user_id, chat_id, command).await
            }
            Event::Text { user_id, chat_id, text } => self.handle_text(user_id, chat_id, &text).await,
            Event::Callback { user_id, chat_id, message_id, data } => {
                self.handle_callback(user_id, chat_id, message_id, &data).await
            }
        }
    }

    async fn handle_command(&self, user_id: i64, chat_id: i64, command: Command) {
        info!("{} /{:?}", user_id, command);

        if let Some(mode) = command.help_mode() {
            if let Err(e) = self.database.set_help_mode(user_id, mode) {
                error!("Failed to update help mode for {}: {}", user_id, e);
                return;
            }
            let _ = self.telegram.send_text(chat_id, mode.confirmation()).await;
            return;
        }

        match command {
            Command::Start => {
                let _ = self
                    .telegram
                    .send_keyboard(chat_id, CHOOSE_LANGUAGE, keyboard::language_chooser())
                    .await;
            }
            Command::SpeechSpeed => {
                let _ = self
                    .telegram
                    .send_keyboard(chat_id, CHOOSE_SPEED, keyboard::speech_speed_chooser())
                    .await;
            }
            Command::Healthz => {
                let _ = self.telegram.send_text(chat_id, "OK").await;
            }
            Command::Pronunciation => self.handle_pronunciation_command(user_id, chat_id).await,
            Command::Examples | Command::Translation | Command::Inflection => {}
        }
    }

    async fn handle_pronunciation_command(&self, user_id: i64, chat_id: i64) {
        match resolver::resolve(&self.database, user_id, NO_SELECTION) {
            Ok(Resolution::NeedsSelection { count }) => {
                debug!("Offering {} examples to {}", count, user_id);
                let _ = self
                    .telegram
                    .send_keyboard(chat_id, CHOOSE_EXAMPLE, keyboard::example_chooser(count))
                    .await;
            }
            Ok(Resolution::Item(text)) => self.send_pronunciation(user_id, chat_id, &text).await,
            Err(e) => {
                info!("Cannot pronounce last query of {}: {}", user_id, e);
                let _ = self.telegram.send_text(chat_id, &e.user_notice()).await;
            }
        }
    }

    async fn handle_text(&self, user_id: i64, chat_id: i64, text: &str) {
        let preview: String = text.chars().take(50).collect();
        info!("📨 {}: \"{}\"", user_id, preview);

        let language = match self.database.get_language(user_id) {
            Ok(language) => language,
            Err(e) if e.is_not_found() => {
                info!("User {} has not picked a language yet, dropping message", user_id);
                return;
            }
            Err(e) => {
                error!("Failed to read language for {}: {}", user_id, e);
                return;
            }
        };

        let mode = match self.database.help_mode_or_init(user_id, self.config.default_help_mode) {
            Ok(mode) => mode,
            Err(e) => {
                error!("Failed to read help mode for {}: {}", user_id, e);
                return;
            }
        };

        let Ok(thinking_id) = self.telegram.send_text(chat_id, THINKING).await else {
            return;
        };

        let answer = self.answer_query(user_id, mode, &language, text).await;

        if let Err(e) = self.telegram.delete_message(chat_id, thinking_id).await {
            debug!("Thinking message left behind: {}", e);
        }

        match answer {
            Ok(response) => {
                let _ = self.telegram.send_text(chat_id, &response).await;
            }
            Err(e) => error!("Failed to answer {} for {}: {}", preview, user_id, e),
        }
    }

    /// Return the cached answer for `(language, mode, text)`, generating and
    /// caching it on a miss. Every answered query is logged.
    pub async fn answer_query(
        &self,
        user_id: i64,
        mode: HelpMode,
        language: &str,
        text: &str,
    ) -> Result<String, AnswerError> {
        if text.trim().is_empty() {
            return Err(AnswerError::EmptyText);
        }

        let fingerprint = Fingerprint::new(language, mode, text);
        if let Some(cached) = self.database.lookup_response(&fingerprint)? {
            info!("Cache hit for {}", fingerprint);
            self.database.record_query_best_effort(user_id, mode, language, text);
            return Ok(cached);
        }

        info!("Cache miss for {}, asking the model", fingerprint);
        let messages = self.config.prompts.messages(mode, language, text);
        let response = self.model.complete(&messages).await.map_err(AnswerError::Model)?;

        let query_id = self.database.record_query_best_effort(user_id, mode, language, text);
        if let Err(e) = self.database.store_response(query_id, &fingerprint, &response) {
            warn!("Failed to cache response for {}: {}", fingerprint, e);
        }
        Ok(response)
    }

    async fn handle_callback(&self, user_id: i64, chat_id: i64, message_id: i64, data: &str) {
        let Some(callback) = Callback::decode(data) else {
            debug!("Ignoring callback {:?} from {}", data, user_id);
            return;
        };
        info!("{} pressed {:?}", user_id, callback);

        match callback {
            Callback::Language(language) => {
                if let Err(e) = self.database.set_language(user_id, &language) {
                    error!("Failed to update language for {}: {}", user_id, e);
                    return;
                }
                let _ = self
                    .telegram
                    .edit_text(chat_id, message_id, &language_confirmation(&language))
                    .await;
            }
            Callback::Pronunciation(selection) => {
                match resolver::resolve(&self.database, user_id, selection) {
                    Ok(Resolution::Item(text)) => {
                        let notice = format!(
                            "You picked number {selection}. The pronunciation will be sent to you shortly. \
                             If it does not pop up in a few seconds, please choose /pronunciation from the menu and try again!"
                        );
                        let _ = self.telegram.edit_text(chat_id, message_id, &notice).await;
                        self.send_pronunciation(user_id, chat_id, &text).await;
                    }
                    Ok(Resolution::NeedsSelection { .. }) => {
                        let _ = self
                            .telegram
                            .edit_text(chat_id, message_id, "Please pick one of the numbered examples.")
                            .await;
                    }
                    Err(e) => {
                        info!("Cannot resolve selection {} for {}: {}", selection, user_id, e);
                        let _ = self.telegram.edit_text(chat_id, message_id, &e.user_notice()).await;
                    }
                }
            }
            Callback::SpeechSpeed(speed) => {
                if let Err(e) = self.database.set_speech_speed(user_id, speed.value()) {
                    error!("Failed to update speech speed for {}: {}", user_id, e);
                    return;
                }
                let _ = self
                    .telegram
                    .edit_text(chat_id, message_id, &speed_confirmation(speed))
                    .await;
            }
        }
    }

    async fn send_pronunciation(&self, user_id: i64, chat_id: i64, text: &str) {
        let speed = self.database.get_speech_speed(user_id).unwrap_or_else(|e| {
            if !e.is_not_found() {
                warn!("Failed to read speech speed for {}: {}", user_id, e);
            }
            DEFAULT_SPEECH_SPEED
        });

        let audio = match self.model.speak(text, speed).await {
            Ok(audio) => audio,
            Err(e) => {
                error!("Speech synthesis failed for {}: {}", user_id, e);
                return;
            }
        };

        let caption: String = text.chars().take(MAX_CAPTION_LENGTH).collect();
        let _ = self.telegram.send_voice(chat_id, audio, Some(&caption)).await;
    }
}

fn language_confirmation(language: &str) -> String {
    format!(
        "Great, you picked {language}. If you start typing words or phrases, I will send you a few examples \
         with that word or a phrase. If you type a whole sentence, then that sentence will be translated to {language}. \
         You can also pick translation, where I will translate supplied phrase either from English to the language \
         you picked, or the other way around. Enjoy!"
    )
}

fn speed_confirmation(speed: SpeechSpeed) -> String {
    format!(
        "You picked {} speech speed. The speech speed will be applied to the next pronunciation.",
        speed.label()
    )
}

/// Delete expired cached responses every `every`. Failures are logged and
/// the next tick runs as usual.
pub fn spawn_eviction_sweep(
    database: Arc<Database>,
    retention: chrono::Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let db = database.clone();
            match tokio::task::spawn_blocking(move || db.evict_responses_older_than(retention)).await {
                Ok(Ok(0)) => debug!("Eviction sweep: nothing expired"),
                Ok(Ok(removed)) => info!("Eviction sweep removed {} cached response(s)", removed),
                Ok(Err(e)) => warn!("Eviction sweep failed: {}", e),
                Err(e) => warn!("Eviction sweep task failed: {}", e),
            }
        }
    })
}

/// Command menu shown by Telegram clients.
pub fn command_menu() -> Vec<teloxide::types::BotCommand> {
    Command::bot_commands()
}

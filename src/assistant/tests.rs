//! Scenario tests for the assistant engine, driven through fake
//! transport and model implementations.
//!
//! Run with: cargo test assistant

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::database::{Database, DEFAULT_SPEECH_SPEED};
use super::engine::{Assistant, AssistantConfig, Event, spawn_eviction_sweep};
use super::keyboard::Keyboard;
use super::query::{Fingerprint, HelpMode};
use super::telegram::Transport;
use super::Command;
use crate::openai::{self, LanguageModel, Message};

// =============================================================================
// FAKES
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text { chat_id: i64, text: String },
    Keyboard { chat_id: i64, text: String, keyboard: Keyboard },
    Edit { chat_id: i64, message_id: i64, text: String },
    Voice { chat_id: i64, audio: Vec<u8>, caption: Option<String> },
    Delete { chat_id: i64, message_id: i64 },
}

#[derive(Default)]
struct FakeTelegram {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI64,
}

impl FakeTelegram {
    fn push(&self, sent: Sent) -> i64 {
        self.sent.lock().unwrap().push(sent);
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Plain texts sent, "Thinking..." placeholders excluded.
    fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } if text != "Thinking..." => Some(text),
                _ => None,
            })
            .collect()
    }

    fn keyboards(&self) -> Vec<Keyboard> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Keyboard { keyboard, .. } => Some(keyboard),
                _ => None,
            })
            .collect()
    }

    fn edits(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn voices(&self) -> usize {
        self.sent().iter().filter(|s| matches!(s, Sent::Voice { .. })).count()
    }
}

#[async_trait]
impl Transport for FakeTelegram {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, String> {
        Ok(self.push(Sent::Text { chat_id, text: text.to_string() }))
    }

    async fn send_keyboard(&self, chat_id: i64, text: &str, keyboard: Keyboard) -> Result<i64, String> {
        Ok(self.push(Sent::Keyboard { chat_id, text: text.to_string(), keyboard }))
    }

    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), String> {
        self.push(Sent::Edit { chat_id, message_id, text: text.to_string() });
        Ok(())
    }

    async fn send_voice(&self, chat_id: i64, audio: Vec<u8>, caption: Option<&str>) -> Result<i64, String> {
        Ok(self.push(Sent::Voice { chat_id, audio, caption: caption.map(str::to_string) }))
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), String> {
        self.push(Sent::Delete { chat_id, message_id });
        Ok(())
    }
}

struct FakeModel {
    reply: String,
    completions: AtomicUsize,
    prompts: Mutex<Vec<Vec<Message>>>,
    spoken: Mutex<Vec<(String, f64)>>,
    fail: AtomicBool,
    panic: AtomicBool,
}

impl FakeModel {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            completions: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            spoken: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            panic: AtomicBool::new(false),
        }
    }

    fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    fn spoken(&self) -> Vec<(String, f64)> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn complete(&self, messages: &[Message]) -> Result<String, openai::Error> {
        if self.panic.load(Ordering::SeqCst) {
            panic!("model exploded");
        }
        self.completions.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(openai::Error::Api("503: overloaded".to_string()));
        }
        Ok(self.reply.clone())
    }

    async fn speak(&self, text: &str, speed: f64) -> Result<Vec<u8>, openai::Error> {
        self.spoken.lock().unwrap().push((text.to_string(), speed));
        Ok(b"OggS".to_vec())
    }
}

const USER: i64 = 42;
const CHAT: i64 = 42;
const BOT: &str = "wordcoach_bot";

struct Harness {
    assistant: Arc<Assistant>,
    telegram: Arc<FakeTelegram>,
    model: Arc<FakeModel>,
}

impl Harness {
    fn new(reply: &str) -> Self {
        Self::with_config(reply, AssistantConfig::default())
    }

    fn with_config(reply: &str, config: AssistantConfig) -> Self {
        let database = Arc::new(Database::open_in_memory().unwrap());
        let telegram = Arc::new(FakeTelegram::default());
        let model = Arc::new(FakeModel::new(reply));
        let assistant = Arc::new(Assistant::new(config, database, telegram.clone(), model.clone()));
        Self { assistant, telegram, model }
    }

    fn db(&self) -> &Database {
        self.assistant.database()
    }

    async fn say(&self, text: &str) {
        let event = Event::from_message(USER, CHAT, text, BOT).expect("not an event");
        self.assistant.handle(event).await;
    }

    async fn press(&self, data: &str) {
        self.assistant
            .handle(Event::Callback { user_id: USER, chat_id: CHAT, message_id: 900, data: data.to_string() })
            .await;
    }
}

// =============================================================================
// EVENT CLASSIFICATION
// =============================================================================

mod event_classification {
    use super::*;

    #[test]
    fn test_text_and_commands() {
        assert_eq!(
            Event::from_message(1, 2, "pomme", BOT),
            Some(Event::Text { user_id: 1, chat_id: 2, text: "pomme".to_string() })
        );
        assert_eq!(
            Event::from_message(1, 2, "/examples", BOT),
            Some(Event::Command { user_id: 1, chat_id: 2, command: Command::Examples })
        );
    }

    #[test]
    fn test_unknown_command_and_blank_text_are_dropped() {
        assert_eq!(Event::from_message(1, 2, "/levitate", BOT), None);
        assert_eq!(Event::from_message(1, 2, "   ", BOT), None);
    }

    #[test]
    fn test_free_text_is_kept_verbatim() {
        assert_eq!(
            Event::from_message(1, 2, "  pomme \n", BOT),
            Some(Event::Text { user_id: 1, chat_id: 2, text: "  pomme \n".to_string() })
        );
        assert_eq!(
            Event::from_message(1, 2, " /healthz ", BOT),
            Some(Event::Command { user_id: 1, chat_id: 2, command: Command::Healthz })
        );
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

mod commands {
    use super::*;

    #[tokio::test]
    async fn test_start_offers_languages() {
        let h = Harness::new("");
        h.say("/start").await;

        let keyboards = h.telegram.keyboards();
        assert_eq!(keyboards.len(), 1);
        assert_eq!(keyboards[0].len(), 2);
        assert_eq!(keyboards[0][0][0].data, "language:Dutch");
    }

    #[tokio::test]
    async fn test_mode_commands_store_mode_and_confirm() {
        let h = Harness::new("");
        h.say("/translation").await;
        assert_eq!(h.telegram.texts(), vec![HelpMode::Translation.confirmation()]);
        assert_eq!(h.db().help_mode_or_init(USER, HelpMode::Examples).unwrap(), HelpMode::Translation);

        h.say("/inflection").await;
        assert_eq!(h.db().help_mode_or_init(USER, HelpMode::Examples).unwrap(), HelpMode::Inflection);
    }

    #[tokio::test]
    async fn test_healthz_and_speed_chooser() {
        let h = Harness::new("");
        h.say("/healthz").await;
        assert_eq!(h.telegram.texts(), vec!["OK"]);

        h.say("/speech_speed").await;
        let keyboards = h.telegram.keyboards();
        assert_eq!(keyboards[0][0].len(), 3);
    }
}

// =============================================================================
// FREE TEXT & CACHE
// =============================================================================

mod free_text {
    use super::*;

    #[tokio::test]
    async fn test_dropped_without_language() {
        let h = Harness::new("1. Une pomme");
        h.say("pomme").await;

        assert!(h.telegram.sent().is_empty());
        assert_eq!(h.model.completions(), 0);
        assert_eq!(h.db().query_count(), 0);
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let reply = "1. Je mange une pomme.\n2. Une pomme rouge.";
        let h = Harness::new(reply);
        h.press("language:French").await;
        assert!(h.telegram.edits()[0].starts_with("Great, you picked French."));

        h.say("pomme").await;
        assert_eq!(h.model.completions(), 1);
        assert_eq!(h.telegram.texts(), vec![reply]);
        assert_eq!(
            h.db().lookup_response(&Fingerprint::new("French", HelpMode::Examples, "pomme")).unwrap().as_deref(),
            Some(reply)
        );
        assert_eq!(h.db().query_count(), 1);

        h.telegram.clear();
        h.say("pomme").await;
        assert_eq!(h.model.completions(), 1);
        assert_eq!(h.telegram.texts(), vec![reply]);
        assert_eq!(h.db().query_count(), 2);
        assert_eq!(h.db().cached_response_count(), 1);
    }

    #[tokio::test]
    async fn test_thinking_placeholder_is_deleted() {
        let h = Harness::new("Apple");
        h.db().set_language(USER, "French").unwrap();
        h.say("pomme").await;

        let sent = h.telegram.sent();
        assert_eq!(sent[0], Sent::Text { chat_id: CHAT, text: "Thinking...".to_string() });
        assert_eq!(sent[1], Sent::Delete { chat_id: CHAT, message_id: 1 });
        assert_eq!(sent[2], Sent::Text { chat_id: CHAT, text: "Apple".to_string() });
    }

    #[tokio::test]
    async fn test_first_query_persists_default_mode() {
        let config = AssistantConfig { default_help_mode: HelpMode::Translation, ..Default::default() };
        let h = Harness::with_config("Apple", config);
        h.db().set_language(USER, "French").unwrap();
        h.say("pomme").await;

        assert_eq!(h.db().last_query(USER).unwrap().mode, HelpMode::Translation);
        assert_eq!(h.db().help_mode_or_init(USER, HelpMode::Examples).unwrap(), HelpMode::Translation);
    }

    #[tokio::test]
    async fn test_prompt_mentions_language_and_word() {
        let h = Harness::new("x");
        h.db().set_language(USER, "German").unwrap();
        h.say("Apfel").await;

        let prompts = h.model.prompts.lock().unwrap().clone();
        let prompt = &prompts[0].last().unwrap().content;
        assert!(prompt.contains("German"));
        assert!(prompt.contains("Apfel"));
    }

    #[tokio::test]
    async fn test_modes_are_cached_separately() {
        let h = Harness::new("answer");
        h.db().set_language(USER, "French").unwrap();
        h.say("pomme").await;
        h.say("/translation").await;
        h.say("pomme").await;

        assert_eq!(h.model.completions(), 2);
        assert_eq!(h.db().cached_response_count(), 2);
    }

    #[tokio::test]
    async fn test_fingerprint_uses_literal_text() {
        let h = Harness::new("answer");
        h.db().set_language(USER, "French").unwrap();
        h.say("pomme").await;
        h.say("pomme ").await;

        assert_eq!(h.model.completions(), 2);
        assert_eq!(h.db().last_query(USER).unwrap().word, "pomme ");
        assert_eq!(h.db().cached_response_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_is_shared_between_users() {
        let h = Harness::new("answer");
        h.db().set_language(USER, "French").unwrap();
        h.db().set_language(7, "French").unwrap();
        h.say("pomme").await;
        h.assistant
            .handle(Event::Text { user_id: 7, chat_id: 7, text: "pomme".to_string() })
            .await;

        assert_eq!(h.model.completions(), 1);
        assert_eq!(h.db().last_query(7).unwrap().word, "pomme");
    }

    #[tokio::test]
    async fn test_model_failure_sends_no_answer() {
        let h = Harness::new("unused");
        h.model.fail.store(true, Ordering::SeqCst);
        h.db().set_language(USER, "French").unwrap();
        h.say("pomme").await;

        assert!(h.telegram.texts().is_empty());
        assert_eq!(h.db().cached_response_count(), 0);
        assert_eq!(h.db().query_count(), 0);
    }
}

// =============================================================================
// PRONUNCIATION FOLLOW-UPS
// =============================================================================

mod pronunciation {
    use super::*;

    fn seed(h: &Harness, mode: HelpMode, word: &str, cached: &str) {
        let id = h.db().record_query(USER, mode, "French", word).unwrap();
        h.db().store_response(id, &Fingerprint::new("French", mode, word), cached).unwrap();
    }

    #[tokio::test]
    async fn test_examples_chooser_then_selection() {
        let h = Harness::new("");
        seed(&h, HelpMode::Examples, "pomme", "1. Manger une pomme\n2. Une pomme rouge");

        h.say("/pronunciation").await;
        let keyboards = h.telegram.keyboards();
        assert_eq!(keyboards.len(), 1);
        assert_eq!(keyboards[0].len(), 1);
        assert_eq!(keyboards[0][0].len(), 2);
        assert_eq!(keyboards[0][0][1].data, "pronunciation:2");
        assert!(h.model.spoken().is_empty());

        h.press("pronunciation:2").await;
        assert_eq!(h.model.spoken(), vec![("Une pomme rouge".to_string(), DEFAULT_SPEECH_SPEED)]);
        assert!(h.telegram.edits()[0].starts_with("You picked number 2."));
        assert_eq!(h.telegram.voices(), 1);
    }

    #[tokio::test]
    async fn test_translation_speaks_first_line() {
        let h = Harness::new("");
        seed(&h, HelpMode::Translation, "apple", "Apple\nNote: can also mean...");

        h.say("/pronunciation").await;
        assert!(h.telegram.keyboards().is_empty());
        assert_eq!(h.model.spoken()[0].0, "Apple");
        assert_eq!(h.telegram.voices(), 1);
    }

    #[tokio::test]
    async fn test_free_form_examples_spoken_whole() {
        let h = Harness::new("");
        seed(&h, HelpMode::Examples, "pomme", "Une pomme par jour.");

        h.say("/pronunciation").await;
        assert_eq!(h.model.spoken()[0].0, "Une pomme par jour.");
    }

    #[tokio::test]
    async fn test_selected_speed_is_used() {
        let h = Harness::new("");
        seed(&h, HelpMode::Translation, "apple", "Pomme");

        h.press("speech_speed:0.5").await;
        assert!(h.telegram.edits()[0].starts_with("You picked Slow speech speed."));

        h.say("/pronunciation").await;
        assert_eq!(h.model.spoken(), vec![("Pomme".to_string(), 0.5)]);
    }

    #[tokio::test]
    async fn test_without_history() {
        let h = Harness::new("");
        h.say("/pronunciation").await;

        assert_eq!(h.telegram.texts().len(), 1);
        assert!(h.telegram.texts()[0].contains("first"));
        assert!(h.model.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_after_eviction() {
        let h = Harness::new("");
        h.db().record_query(USER, HelpMode::Examples, "French", "pomme").unwrap();

        h.press("pronunciation:1").await;
        assert!(h.telegram.edits()[0].contains("send it again"));
        assert_eq!(h.telegram.voices(), 0);
    }

    #[tokio::test]
    async fn test_inflection_is_unsupported() {
        let h = Harness::new("");
        seed(&h, HelpMode::Inflection, "manger", "je mange, tu manges");

        h.say("/pronunciation").await;
        assert!(h.model.spoken().is_empty());
        assert!(h.telegram.texts()[0].contains("not available"));
    }

    #[tokio::test]
    async fn test_selection_out_of_range() {
        let h = Harness::new("");
        seed(&h, HelpMode::Examples, "pomme", "1. A\n2. B");

        h.press("pronunciation:5").await;
        assert!(h.model.spoken().is_empty());
        assert!(h.telegram.edits()[0].contains("between 1 and 2"));
    }

    #[tokio::test]
    async fn test_selection_zero_from_button_asks_to_pick() {
        let h = Harness::new("");
        seed(&h, HelpMode::Examples, "pomme", "1. A\n2. B");

        h.press("pronunciation:0").await;
        assert!(h.model.spoken().is_empty());
        assert_eq!(h.telegram.edits().len(), 1);
    }

    #[tokio::test]
    async fn test_follows_latest_query() {
        let h = Harness::new("Pomme\nfeminine noun");
        h.db().set_language(USER, "French").unwrap();
        seed(&h, HelpMode::Examples, "pomme", "1. A\n2. B");
        h.say("/translation").await;
        h.say("apple").await;

        h.say("/pronunciation").await;
        assert!(h.telegram.keyboards().is_empty());
        assert_eq!(h.model.spoken()[0].0, "Pomme");
    }
}

// =============================================================================
// CALLBACKS
// =============================================================================

mod callbacks {
    use super::*;

    #[tokio::test]
    async fn test_unknown_prefix_is_ignored() {
        let h = Harness::new("");
        h.press("theme:dark").await;
        h.press("garbage").await;
        assert!(h.telegram.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unlisted_speed_is_ignored() {
        let h = Harness::new("");
        h.press("speech_speed:2.5").await;
        assert!(h.telegram.sent().is_empty());
        assert!(h.db().get_speech_speed(USER).is_err());
    }

    #[tokio::test]
    async fn test_language_edits_original_message() {
        let h = Harness::new("");
        h.press("language:Estonian").await;

        assert_eq!(h.db().get_language(USER).unwrap(), "Estonian");
        match &h.telegram.sent()[0] {
            Sent::Edit { chat_id, message_id, text } => {
                assert_eq!(*chat_id, CHAT);
                assert_eq!(*message_id, 900);
                assert!(text.contains("Estonian"));
            }
            other => panic!("expected edit, got {other:?}"),
        }
    }
}

// =============================================================================
// ISOLATION & BACKGROUND WORK
// =============================================================================

mod isolation {
    use super::*;

    #[tokio::test]
    async fn test_disallowed_user_is_dropped() {
        let config = AssistantConfig {
            allowed_user_ids: HashSet::from([1]),
            ..Default::default()
        };
        let h = Harness::with_config("", config);
        h.say("/healthz").await;
        assert!(h.telegram.sent().is_empty());

        h.assistant
            .handle(Event::Command { user_id: 1, chat_id: 1, command: Command::Healthz })
            .await;
        assert_eq!(h.telegram.texts(), vec!["OK"]);
    }

    #[tokio::test]
    async fn test_panic_is_contained_per_event() {
        let h = Harness::new("Apple");
        h.db().set_language(USER, "French").unwrap();

        h.model.panic.store(true, Ordering::SeqCst);
        h.assistant
            .dispatch(Event::Text { user_id: USER, chat_id: CHAT, text: "pomme".to_string() })
            .await;

        h.model.panic.store(false, Ordering::SeqCst);
        h.telegram.clear();
        h.assistant
            .dispatch(Event::Text { user_id: USER, chat_id: CHAT, text: "pomme".to_string() })
            .await;
        assert_eq!(h.telegram.texts(), vec!["Apple"]);
    }

    #[tokio::test]
    async fn test_eviction_sweep_runs_in_background() {
        let database = Arc::new(Database::open_in_memory().unwrap());
        let old = Fingerprint::new("French", HelpMode::Examples, "pomme");
        let fresh = Fingerprint::new("French", HelpMode::Examples, "poire");
        database.store_response_at(1, &old, "old", 0).unwrap();
        database.store_response(2, &fresh, "fresh").unwrap();

        let sweep = spawn_eviction_sweep(database.clone(), chrono::Duration::hours(24), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweep.abort();

        assert_eq!(database.lookup_response(&old).unwrap(), None);
        assert_eq!(database.lookup_response(&fresh).unwrap().as_deref(), Some("fresh"));
    }
}

//! Telegram delivery using teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId};
use tracing::{info, warn};

use crate::assistant::keyboard::Keyboard;

/// Outbound side of the chat transport. Errors are already logged by the
/// implementation; callers only decide whether to continue.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message, returning its message id.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, String>;

    /// Send a text message with an inline keyboard.
    async fn send_keyboard(&self, chat_id: i64, text: &str, keyboard: Keyboard) -> Result<i64, String>;

    /// Replace the text of a message, dropping any inline keyboard on it.
    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), String>;

    /// Send an OGG/Opus voice message.
    async fn send_voice(&self, chat_id: i64, audio: Vec<u8>, caption: Option<&str>) -> Result<i64, String>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), String>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn to_markup(keyboard: Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.into_iter().map(|row| {
        row.into_iter()
            .map(|button| InlineKeyboardButton::callback(button.label, button.data))
            .collect::<Vec<_>>()
    }))
}

fn logged(context: &str) -> impl FnOnce(teloxide::RequestError) -> String + '_ {
    move |e| {
        let msg = format!("Failed to {context}: {e}");
        warn!("{}", msg);
        msg
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, String> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(logged("send"))
    }

    async fn send_keyboard(&self, chat_id: i64, text: &str, keyboard: Keyboard) -> Result<i64, String> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(to_markup(keyboard))
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(logged("send keyboard"))
    }

    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), String> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text)
            .await
            .map(|_| ())
            .map_err(logged("edit message"))
    }

    async fn send_voice(&self, chat_id: i64, audio: Vec<u8>, caption: Option<&str>) -> Result<i64, String> {
        info!("🔊 Sending voice to chat {} ({} bytes)", chat_id, audio.len());

        let input_file = InputFile::memory(audio).file_name("pronunciation.ogg");
        let mut request = self.bot.send_voice(ChatId(chat_id), input_file);
        if let Some(cap) = caption {
            request = request.caption(cap);
        }

        request
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(logged("send voice"))
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), String> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id as i32))
            .await
            .map(|_| ())
            .map_err(logged("delete message"))
    }
}

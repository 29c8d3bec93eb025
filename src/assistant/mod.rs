//! Assistant module - answers word/phrase queries from cache or the model
//! and resolves follow-up pronunciation requests.

pub mod commands;
pub mod database;
pub mod engine;
pub mod extract;
pub mod keyboard;
pub mod prompts;
pub mod query;
pub mod resolver;
pub mod telegram;

#[cfg(test)]
mod tests;

pub use commands::Command;
pub use database::{Database, StoreError};
pub use engine::{Assistant, AssistantConfig, Event};
pub use prompts::PromptBook;
pub use query::{Fingerprint, HelpMode};
pub use telegram::{TelegramClient, Transport};

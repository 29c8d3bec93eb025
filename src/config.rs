use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assistant::prompts::PromptError;
use crate::assistant::{AssistantConfig, HelpMode, PromptBook};
use crate::openai;

const DEFAULT_CACHE_TTL_HOURS: i64 = 24;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Prompt template could not be loaded.
    Template(PromptError),
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Template(e) => write!(f, "invalid prompt template: {}", e),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Template(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    #[serde(default)]
    openai_api_key: String,
    openai_base_url: Option<String>,
    chat_model: Option<String>,
    speech_model: Option<String>,
    voice: Option<String>,
    /// Users allowed to talk to the bot (empty = everyone)
    #[serde(default)]
    allowed_user_ids: Vec<i64>,
    /// Directory for state files (logs, database). Defaults to current directory.
    data_dir: Option<String>,
    database_path: Option<String>,
    /// Directory with `<mode>.txt` prompts and `<mode>/<Language>.txt` tunings.
    templates_dir: Option<String>,
    default_help_mode: Option<String>,
    /// Kept loose so that a bad value falls back to the default instead of
    /// failing the whole file.
    #[serde(default)]
    cache_ttl_hours: serde_json::Value,
    #[serde(default = "default_eviction_interval_minutes")]
    eviction_interval_minutes: u64,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
}

fn default_eviction_interval_minutes() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    120
}

pub struct Config {
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub speech_model: String,
    pub voice: String,
    pub allowed_user_ids: HashSet<i64>,
    /// Directory for state files (logs, database).
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub default_help_mode: HelpMode,
    pub prompts: PromptBook,
    pub cache_ttl_hours: i64,
    pub eviction_interval: Duration,
    pub request_timeout: Duration,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        // Validate required fields
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.openai_api_key.trim().is_empty() {
            return Err(ConfigError::Validation("openai_api_key is required".into()));
        }
        if file.eviction_interval_minutes == 0 {
            return Err(ConfigError::Validation("eviction_interval_minutes must be positive".into()));
        }
        let eviction_interval_secs = file
            .eviction_interval_minutes
            .checked_mul(60)
            .ok_or_else(|| ConfigError::Validation("eviction_interval_minutes is too large".into()))?;
        if file.request_timeout_secs == 0 {
            return Err(ConfigError::Validation("request_timeout_secs must be positive".into()));
        }

        let default_help_mode = match file.default_help_mode.as_deref() {
            None => HelpMode::Examples,
            Some(s) => HelpMode::parse(s).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "default_help_mode must be one of examples, translation, inflection (got '{s}')"
                ))
            })?,
        };

        let prompts = match file.templates_dir {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                if !dir.is_dir() {
                    return Err(ConfigError::Validation(format!(
                        "templates_dir '{}' is not a directory",
                        dir.display()
                    )));
                }
                PromptBook::load(&dir).map_err(ConfigError::Template)?
            }
            None => PromptBook::builtin(),
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let database_path = file
            .database_path
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("wordcoach.db"));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            openai_api_key: file.openai_api_key,
            openai_base_url: file.openai_base_url.unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string()),
            chat_model: file.chat_model.unwrap_or_else(|| openai::DEFAULT_CHAT_MODEL.to_string()),
            speech_model: file.speech_model.unwrap_or_else(|| openai::DEFAULT_SPEECH_MODEL.to_string()),
            voice: file.voice.unwrap_or_else(|| openai::DEFAULT_VOICE.to_string()),
            allowed_user_ids: file.allowed_user_ids.into_iter().collect(),
            data_dir,
            database_path,
            default_help_mode,
            prompts,
            cache_ttl_hours: cache_ttl_hours(&file.cache_ttl_hours),
            eviction_interval: Duration::from_secs(eviction_interval_secs),
            request_timeout: Duration::from_secs(file.request_timeout_secs),
        })
    }

    pub fn assistant_config(&self) -> AssistantConfig {
        AssistantConfig {
            default_help_mode: self.default_help_mode,
            allowed_user_ids: self.allowed_user_ids.clone(),
            prompts: self.prompts.clone(),
            cache_ttl: chrono::Duration::try_hours(self.cache_ttl_hours)
                .unwrap_or_else(|| chrono::Duration::hours(DEFAULT_CACHE_TTL_HOURS)),
            eviction_interval: self.eviction_interval,
            request_timeout: self.request_timeout,
        }
    }

    pub fn openai_config(&self) -> openai::ClientConfig {
        openai::ClientConfig {
            api_key: self.openai_api_key.clone(),
            base_url: self.openai_base_url.clone(),
            chat_model: self.chat_model.clone(),
            speech_model: self.speech_model.clone(),
            voice: self.voice.clone(),
            timeout: self.request_timeout,
        }
    }
}

/// Hours-to-live for cached responses: a positive integer (number or numeric
/// string) that fits a `chrono::Duration`, otherwise 24.
fn cache_ttl_hours(value: &serde_json::Value) -> i64 {
    let hours = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match hours {
        Some(h) if h > 0 && chrono::Duration::try_hours(h).is_some() => h,
        _ => DEFAULT_CACHE_TTL_HOURS,
    }
}

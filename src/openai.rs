//! OpenAI client: chat completions for answers, speech synthesis for pronunciation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SPEECH_MODEL: &str = "tts-1";
pub const DEFAULT_VOICE: &str = "alloy";

/// What the assistant needs from a language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a reply to `messages`.
    async fn complete(&self, messages: &[Message]) -> Result<String, Error>;

    /// Synthesize `text` as OGG/Opus audio at `speed` (1.0 = normal).
    async fn speak(&self, text: &str, speed: f64) -> Result<Vec<u8>, Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub speech_model: String,
    pub voice: String,
    pub timeout: Duration,
}

pub struct Client {
    config: ClientConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f64,
    response_format: &'static str,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response, Error> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for Client {
    async fn complete(&self, messages: &[Message]) -> Result<String, Error> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        };

        let response: ChatResponse = self
            .post("chat/completions", &request)
            .await?
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(Error::Empty)?;

        debug!("Completion: {} chars", text.len());
        Ok(text)
    }

    async fn speak(&self, text: &str, speed: f64) -> Result<Vec<u8>, Error> {
        let preview: String = text.chars().take(50).collect();
        info!("TTS ({speed}x): \"{preview}\"");

        let request = SpeechRequest {
            model: &self.config.speech_model,
            input: text,
            voice: &self.config.voice,
            speed,
            response_format: "opus",
        };

        let audio = self
            .post("audio/speech", &request)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if audio.is_empty() {
            return Err(Error::Empty);
        }
        debug!("Got {} bytes of voice audio", audio.len());
        Ok(audio.to_vec())
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

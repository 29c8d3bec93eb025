//! Prompt templates, loaded once at startup.
//!
//! Layout of a templates directory (every file optional):
//!
//! ```text
//! templates/examples.txt          overrides the built-in examples prompt
//! templates/translation.txt
//! templates/inflection.txt
//! templates/examples/French.txt   "role: content" lines sent before the prompt
//! ```
//!
//! Prompts use `{language}` and `{text}` placeholders.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::assistant::query::HelpMode;
use crate::openai::{Message, Role};

const EXAMPLES_PROMPT: &str = "Give 3-4 short example sentences in {language} that use \"{text}\". \
Write each example on its own line formatted as \"N. sentence\" with no other text on that line, \
then add a brief English explanation of the meaning below the list.";

const TRANSLATION_PROMPT: &str = "Translate \"{text}\" from English to {language}, or from {language} \
to English if it is already in {language}. Put only the translation on the first line. \
Any notes on meaning or usage go on the following lines.";

const INFLECTION_PROMPT: &str = "Give the inflection of the {language} word \"{text}\": \
conjugation for verbs, declension or plural forms for nouns and adjectives. \
If the word does not inflect, say so briefly.";

#[derive(Debug)]
pub enum PromptError {
    Read { path: PathBuf, source: std::io::Error },
    MissingPlaceholder { path: PathBuf },
    InvalidRole { path: PathBuf, role: String },
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read template '{}': {}", path.display(), source)
            }
            Self::MissingPlaceholder { path } => {
                write!(f, "template '{}' has no {{text}} placeholder", path.display())
            }
            Self::InvalidRole { path, role } => {
                write!(f, "template '{}' uses unknown role '{}'", path.display(), role)
            }
        }
    }
}

impl std::error::Error for PromptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Immutable set of prompts for every help mode.
#[derive(Debug, Clone)]
pub struct PromptBook {
    prompts: HashMap<HelpMode, String>,
    /// (language, mode) -> messages sent ahead of the prompt.
    tunings: HashMap<(String, HelpMode), Vec<Message>>,
}

impl Default for PromptBook {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptBook {
    pub fn builtin() -> Self {
        let prompts = HelpMode::ALL
            .into_iter()
            .map(|mode| {
                let prompt = match mode {
                    HelpMode::Examples => EXAMPLES_PROMPT,
                    HelpMode::Translation => TRANSLATION_PROMPT,
                    HelpMode::Inflection => INFLECTION_PROMPT,
                };
                (mode, prompt.to_string())
            })
            .collect();
        Self { prompts, tunings: HashMap::new() }
    }

    /// Built-in prompts overridden by whatever `dir` provides.
    pub fn load(dir: &Path) -> Result<Self, PromptError> {
        let mut book = Self::builtin();

        for mode in HelpMode::ALL {
            let path = dir.join(format!("{}.txt", mode.as_str()));
            if path.is_file() {
                let template = read(&path)?;
                if !template.contains("{text}") {
                    return Err(PromptError::MissingPlaceholder { path });
                }
                debug!("Loaded {} prompt from {:?}", mode, path);
                book.prompts.insert(mode, template.trim().to_string());
            }

            let mode_dir = dir.join(mode.as_str());
            if !mode_dir.is_dir() {
                continue;
            }
            let entries = std::fs::read_dir(&mode_dir)
                .map_err(|e| PromptError::Read { path: mode_dir.clone(), source: e })?;
            for entry in entries {
                let path = entry
                    .map_err(|e| PromptError::Read { path: mode_dir.clone(), source: e })?
                    .path();
                if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                    continue;
                }
                let Some(language) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                    continue;
                };
                let messages = parse_tuning(&path, &read(&path)?)?;
                book.tunings.insert((language, mode), messages);
            }
        }

        info!(
            "Loaded prompt templates from {:?} ({} language tunings)",
            dir,
            book.tunings.len()
        );
        Ok(book)
    }

    /// Chat messages for one request: tunings for the language and mode,
    /// then the rendered prompt as the user turn.
    pub fn messages(&self, mode: HelpMode, language: &str, text: &str) -> Vec<Message> {
        let mut messages = self
            .tunings
            .get(&(language.to_string(), mode))
            .cloned()
            .unwrap_or_default();
        messages.push(Message {
            role: Role::User,
            content: self.render(mode, language, text),
        });
        messages
    }

    pub fn render(&self, mode: HelpMode, language: &str, text: &str) -> String {
        self.prompts
            .get(&mode)
            .map(String::as_str)
            .unwrap_or_default()
            .replace("{language}", language)
            .replace("{text}", text)
    }
}

fn read(path: &Path) -> Result<String, PromptError> {
    std::fs::read_to_string(path).map_err(|e| PromptError::Read { path: path.to_path_buf(), source: e })
}

/// Parse `role: content` lines. Blank lines and lines without a colon are skipped.
fn parse_tuning(path: &Path, content: &str) -> Result<Vec<Message>, PromptError> {
    let mut messages = Vec::new();
    for line in content.lines() {
        let Some((role, text)) = line.split_once(':') else {
            continue;
        };
        let role = match role.trim() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(PromptError::InvalidRole {
                    path: path.to_path_buf(),
                    role: other.to_string(),
                });
            }
        };
        messages.push(Message {
            role,
            content: text.trim().replace("\\n", "\n"),
        });
    }
    Ok(messages)
}

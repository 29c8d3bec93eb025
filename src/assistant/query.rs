//! Help modes, cache fingerprints and logged queries.

use std::fmt;

/// The kind of help a user currently wants for the words they send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelpMode {
    Examples,
    Translation,
    Inflection,
}

impl HelpMode {
    pub const ALL: [HelpMode; 3] = [HelpMode::Examples, HelpMode::Translation, HelpMode::Inflection];

    pub fn as_str(&self) -> &'static str {
        match self {
            HelpMode::Examples => "examples",
            HelpMode::Translation => "translation",
            HelpMode::Inflection => "inflection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "examples" => Some(HelpMode::Examples),
            "translation" => Some(HelpMode::Translation),
            "inflection" => Some(HelpMode::Inflection),
            _ => None,
        }
    }

    /// Reply sent after a user switches to this mode.
    pub fn confirmation(&self) -> &'static str {
        match self {
            HelpMode::Examples => "I will respond with examples of the word or phrase usage.",
            HelpMode::Translation => "I will respond with translations.",
            HelpMode::Inflection => {
                "I will respond with inflection (if applicable) for the provided word."
            }
        }
    }
}

impl fmt::Display for HelpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key: the same word asked in the same mode and language always
/// maps to the same cached response, whoever asked it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub language: String,
    pub mode: HelpMode,
    pub word: String,
}

impl Fingerprint {
    pub fn new(language: impl Into<String>, mode: HelpMode, word: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            mode,
            word: word.into(),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {:?})", self.language, self.mode, self.word)
    }
}

/// One row of the query log.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub id: i64,
    pub user_id: i64,
    pub mode: HelpMode,
    pub language: String,
    pub word: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl QueryRecord {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.language.clone(), self.mode, self.word.clone())
    }
}

//! Follow-up resolution: turns "my last query" plus an optional numeric
//! selection into the exact text to speak.
//!
//! Each help mode's response has its own shape. This module is the only
//! place that knows those shapes, so audio synthesis never parses raw model
//! output itself.

use std::fmt;

use crate::assistant::database::{Database, StoreError};
use crate::assistant::extract::extract_numbered_items;
use crate::assistant::query::HelpMode;

/// Selection value meaning "nothing picked yet".
pub const NO_SELECTION: usize = 0;

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Text to speak.
    Item(String),
    /// The response holds `count` numbered items and none was picked.
    NeedsSelection { count: usize },
}

#[derive(Debug)]
pub enum ResolveError {
    /// The user never sent a query.
    NoHistory,
    /// The last query's cached response was evicted.
    NoCachedResponse,
    /// The last query's mode has no speakable target.
    Unsupported(HelpMode),
    /// `selection` is not in `1..=count`.
    SelectionOutOfRange { selection: usize, count: usize },
    /// The cached response has no non-empty line.
    EmptyResponse,
    Store(StoreError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHistory => write!(f, "no query history"),
            Self::NoCachedResponse => write!(f, "cached response no longer available"),
            Self::Unsupported(mode) => write!(f, "{mode} responses cannot be pronounced"),
            Self::SelectionOutOfRange { selection, count } => {
                write!(f, "selection {selection} out of range 1..={count}")
            }
            Self::EmptyResponse => write!(f, "cached response is empty"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl ResolveError {
    /// Explanation shown to the user.
    pub fn user_notice(&self) -> String {
        match self {
            Self::NoHistory => {
                "Send me a word or a phrase first, then ask for its pronunciation.".to_string()
            }
            Self::NoCachedResponse => {
                "I no longer have the answer to your last word. Please send it again.".to_string()
            }
            Self::Unsupported(mode) => format!(
                "Pronunciation is not available for {mode} answers. \
                 Switch to /examples or /translation and send the word again."
            ),
            Self::SelectionOutOfRange { count, .. } => {
                format!("Please pick an example between 1 and {count} with /pronunciation.")
            }
            Self::EmptyResponse => "There is nothing to pronounce in my last answer.".to_string(),
            Self::Store(_) => {
                "Something went wrong. Please choose /pronunciation from the menu and try again!"
                    .to_string()
            }
        }
    }
}

/// Resolve against the user's most recent query and its cached response.
pub fn resolve(db: &Database, user_id: i64, selection: usize) -> Result<Resolution, ResolveError> {
    let last = db.last_query(user_id).map_err(|e| match e {
        StoreError::NotFound(_) => ResolveError::NoHistory,
        e => ResolveError::Store(e),
    })?;

    let cached = db
        .lookup_response(&last.fingerprint())
        .map_err(ResolveError::Store)?
        .ok_or(ResolveError::NoCachedResponse)?;

    resolve_cached(last.mode, &cached, selection)
}

/// Resolve a cached response of the given mode.
pub fn resolve_cached(mode: HelpMode, cached: &str, selection: usize) -> Result<Resolution, ResolveError> {
    match mode {
        HelpMode::Examples => {
            let mut items = extract_numbered_items(cached);
            let count = items.len();
            if count == 0 {
                // Free-form answer: the whole text is the only item.
                return Ok(Resolution::Item(cached.to_string()));
            }
            if selection == NO_SELECTION {
                return Ok(Resolution::NeedsSelection { count });
            }
            if selection > count {
                return Err(ResolveError::SelectionOutOfRange { selection, count });
            }
            Ok(Resolution::Item(items.swap_remove(selection - 1)))
        }
        HelpMode::Translation => cached
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|line| Resolution::Item(line.to_string()))
            .ok_or(ResolveError::EmptyResponse),
        HelpMode::Inflection => Err(ResolveError::Unsupported(mode)),
    }
}

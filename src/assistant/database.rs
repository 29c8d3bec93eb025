//! Persistent SQLite store: user preferences, query log and response cache.

use rusqlite::{Connection, OptionalExtension, params};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::assistant::query::{Fingerprint, HelpMode, QueryRecord};

/// Speech speed used when a user never picked one.
pub const DEFAULT_SPEECH_SPEED: f64 = 1.0;

/// Query id recorded when a best-effort log write failed.
pub const UNLOGGED_QUERY_ID: i64 = 0;

/// Errors from the store.
#[derive(Debug)]
pub enum StoreError {
    /// Expected miss: the named value has never been written.
    NotFound(&'static str),
    /// SQLite failure.
    Sqlite(rusqlite::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "{what} not found"),
            Self::Sqlite(e) => write!(f, "database error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotFound(_) => None,
            Self::Sqlite(e) => Some(e),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Current wall clock in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SQLite database shared by every event task.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;

        let (users, queries, cached) = db.counts()?;
        info!(
            "Loaded database from {:?} ({} users, {} queries, {} cached responses)",
            path, users, queries, cached
        );
        Ok(db)
    }

    // A panic while holding the lock must not take the store down for
    // every other event, so poisoning is ignored.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                language TEXT,
                help_type TEXT,
                speech_speed REAL NOT NULL DEFAULT 1.0
            );

            CREATE TABLE IF NOT EXISTS queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                help_type TEXT NOT NULL,
                language TEXT NOT NULL,
                word TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cached_responses (
                query_id INTEGER NOT NULL,
                language TEXT NOT NULL,
                help_type TEXT NOT NULL,
                word TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (language, help_type, word)
            );

            CREATE INDEX IF NOT EXISTS idx_queries_user_id ON queries(user_id, id);
            CREATE INDEX IF NOT EXISTS idx_cached_responses_created_at ON cached_responses(created_at);
        "#)?;
        Ok(())
    }

    fn counts(&self) -> Result<(i64, i64, i64), StoreError> {
        let conn = self.conn();
        let count = |table: &str| -> Result<i64, rusqlite::Error> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };
        Ok((count("users")?, count("queries")?, count("cached_responses")?))
    }

    // ==================== PREFERENCES ====================

    /// Upsert the user's target language. Other preferences are untouched.
    pub fn set_language(&self, user_id: i64, language: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO users (id, language) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET language = excluded.language",
            params![user_id, language],
        )?;
        debug!("User {} language set to {}", user_id, language);
        Ok(())
    }

    /// The user's target language, or `NotFound` if setup never happened.
    pub fn get_language(&self, user_id: i64) -> Result<String, StoreError> {
        let language: Option<String> = self
            .conn()
            .query_row(
                "SELECT language FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();

        match language {
            Some(language) if !language.is_empty() => Ok(language),
            _ => Err(StoreError::NotFound("language")),
        }
    }

    /// Upsert the user's help mode.
    pub fn set_help_mode(&self, user_id: i64, mode: HelpMode) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO users (id, help_type) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET help_type = excluded.help_type",
            params![user_id, mode.as_str()],
        )?;
        debug!("User {} help mode set to {}", user_id, mode);
        Ok(())
    }

    /// Read the user's help mode, persisting `default` first if none is set.
    ///
    /// A single upsert does both the initialization and the read, so two
    /// concurrent first reads agree on the stored value.
    pub fn help_mode_or_init(&self, user_id: i64, default: HelpMode) -> Result<HelpMode, StoreError> {
        let stored: String = self.conn().query_row(
            "INSERT INTO users (id, help_type) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                help_type = COALESCE(NULLIF(users.help_type, ''), excluded.help_type)
             RETURNING help_type",
            params![user_id, default.as_str()],
            |row| row.get(0),
        )?;

        match HelpMode::parse(&stored) {
            Some(mode) => Ok(mode),
            None => {
                warn!("User {} has unknown help mode {:?}, resetting to {}", user_id, stored, default);
                self.set_help_mode(user_id, default)?;
                Ok(default)
            }
        }
    }

    /// Upsert the user's speech speed.
    pub fn set_speech_speed(&self, user_id: i64, speed: f64) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO users (id, speech_speed) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET speech_speed = excluded.speech_speed",
            params![user_id, speed],
        )?;
        Ok(())
    }

    /// The user's speech speed. Callers fall back to [`DEFAULT_SPEECH_SPEED`].
    pub fn get_speech_speed(&self, user_id: i64) -> Result<f64, StoreError> {
        self.conn()
            .query_row(
                "SELECT speech_speed FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound("speech speed"))
    }

    // ==================== QUERY LOG ====================

    /// Append a query and return its id.
    pub fn record_query(
        &self,
        user_id: i64,
        mode: HelpMode,
        language: &str,
        word: &str,
    ) -> Result<i64, StoreError> {
        self.record_query_at(user_id, mode, language, word, now_millis())
    }

    pub fn record_query_at(
        &self,
        user_id: i64,
        mode: HelpMode,
        language: &str,
        word: &str,
        timestamp: i64,
    ) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO queries (user_id, help_type, language, word, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, mode.as_str(), language, word, timestamp],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Fire-and-forget variant of [`Self::record_query`]: a failed write is
    /// logged and [`UNLOGGED_QUERY_ID`] is returned so the reply still goes out.
    pub fn record_query_best_effort(
        &self,
        user_id: i64,
        mode: HelpMode,
        language: &str,
        word: &str,
    ) -> i64 {
        match self.record_query(user_id, mode, language, word) {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to log query for user {}: {}", user_id, e);
                UNLOGGED_QUERY_ID
            }
        }
    }

    /// The user's most recent query, or `NotFound` if they never asked anything.
    pub fn last_query(&self, user_id: i64) -> Result<QueryRecord, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, user_id, help_type, language, word, timestamp
                 FROM queries WHERE user_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, user_id, help_type, language, word, created_at)) = row else {
            return Err(StoreError::NotFound("query history"));
        };
        let Some(mode) = HelpMode::parse(&help_type) else {
            warn!("Query #{} has unknown help mode {:?}", id, help_type);
            return Err(StoreError::NotFound("query history"));
        };

        Ok(QueryRecord { id, user_id, mode, language, word, created_at })
    }

    /// Number of logged queries.
    #[cfg(test)]
    pub fn query_count(&self) -> usize {
        self.conn()
            .query_row("SELECT COUNT(*) FROM queries", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as usize
    }

    // ==================== RESPONSE CACHE ====================

    /// Exact, case-sensitive lookup by fingerprint. `Ok(None)` is a miss.
    pub fn lookup_response(&self, fingerprint: &Fingerprint) -> Result<Option<String>, StoreError> {
        let response = self
            .conn()
            .query_row(
                "SELECT response FROM cached_responses
                 WHERE language = ?1 AND help_type = ?2 AND word = ?3",
                params![fingerprint.language, fingerprint.mode.as_str(), fingerprint.word],
                |row| row.get(0),
            )
            .optional()?;
        Ok(response)
    }

    /// Cache `response` under `fingerprint`. A second store for the same
    /// fingerprint replaces the first, so at most one row per fingerprint exists.
    pub fn store_response(
        &self,
        query_id: i64,
        fingerprint: &Fingerprint,
        response: &str,
    ) -> Result<(), StoreError> {
        self.store_response_at(query_id, fingerprint, response, now_millis())
    }

    pub fn store_response_at(
        &self,
        query_id: i64,
        fingerprint: &Fingerprint,
        response: &str,
        created_at: i64,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO cached_responses (query_id, language, help_type, word, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(language, help_type, word) DO UPDATE SET
                query_id = excluded.query_id,
                response = excluded.response,
                created_at = excluded.created_at",
            params![
                query_id,
                fingerprint.language,
                fingerprint.mode.as_str(),
                fingerprint.word,
                response,
                created_at
            ],
        )?;
        Ok(())
    }

    /// Delete every cached response inserted more than `retention` ago.
    pub fn evict_responses_older_than(&self, retention: chrono::Duration) -> Result<usize, StoreError> {
        self.evict_responses_older_than_at(retention, now_millis())
    }

    pub fn evict_responses_older_than_at(
        &self,
        retention: chrono::Duration,
        now: i64,
    ) -> Result<usize, StoreError> {
        let cutoff = now - retention.num_milliseconds();
        let removed = self.conn().execute(
            "DELETE FROM cached_responses WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    /// Number of cached responses.
    #[cfg(test)]
    pub fn cached_response_count(&self) -> usize {
        self.conn()
            .query_row("SELECT COUNT(*) FROM cached_responses", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as usize
    }
}

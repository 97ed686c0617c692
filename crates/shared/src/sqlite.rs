use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

use crate::error::{NewsletterError, Result};
use crate::models::{Feedback, SendRecord, UserPreference};
use crate::store::{
    validate_email, FeedbackSink, PreferenceRow, PreferenceStore, StyleStore, PREFERENCES_TABLE,
    STYLE_TABLE,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user_preference (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    topics TEXT NOT NULL DEFAULT '[]',
    twitter_handles TEXT NOT NULL DEFAULT '[]',
    twitter_hashtags TEXT NOT NULL DEFAULT '[]'
);
CREATE TABLE IF NOT EXISTS user_style_samples (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    samples TEXT NOT NULL DEFAULT '[]'
);
CREATE TABLE IF NOT EXISTS newsletter_feedback (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL,
    rating TEXT NOT NULL CHECK (rating IN ('up', 'down')),
    notes TEXT NOT NULL,
    subject TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS newsletter_sends (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL,
    subject TEXT NOT NULL,
    categories TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

/// Local SQLite-backed stores, same tables as the hosted database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            NewsletterError::Configuration(format!(
                "Failed to open database {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| NewsletterError::Store("database lock poisoned".to_string()))?;
        f(&conn)
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| NewsletterError::Store(e.to_string()))
}

fn from_json(table: &'static str, column: &str, text: &str) -> Result<Vec<String>> {
    serde_json::from_str(text).map_err(|e| NewsletterError::InvalidRecord {
        table,
        reason: format!("{} is not a JSON list: {}", column, e),
    })
}

fn read_preference(
    email: String,
    topics: String,
    handles: String,
    hashtags: String,
) -> Result<UserPreference> {
    let row = PreferenceRow {
        email: Some(email),
        topics: Some(from_json(PREFERENCES_TABLE, "topics", &topics)?),
        twitter_handles: Some(from_json(PREFERENCES_TABLE, "twitter_handles", &handles)?),
        twitter_hashtags: Some(from_json(PREFERENCES_TABLE, "twitter_hashtags", &hashtags)?),
    };
    UserPreference::try_from(row)
}

type RawPreference = (String, String, String, String);

#[async_trait]
impl PreferenceStore for SqliteStore {
    async fn list(&self) -> Result<Vec<UserPreference>> {
        let raw: Vec<RawPreference> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT email, topics, twitter_handles, twitter_hashtags
                 FROM user_preference ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        Ok(raw
            .into_iter()
            .filter_map(|(email, topics, handles, hashtags)| {
                match read_preference(email, topics, handles, hashtags) {
                    Ok(pref) => Some(pref),
                    Err(e) => {
                        warn!(error = %e, "Ignoring invalid preference row");
                        None
                    }
                }
            })
            .collect())
    }

    async fn get(&self, email: &str) -> Result<Option<UserPreference>> {
        let email = validate_email(email)?;
        let raw: Option<RawPreference> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT email, topics, twitter_handles, twitter_hashtags
                     FROM user_preference WHERE email = ?1",
                    params![email],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
                )
                .optional()?)
        })?;

        raw.map(|(email, topics, handles, hashtags)| read_preference(email, topics, handles, hashtags))
            .transpose()
    }

    async fn upsert_topics(&self, email: &str, topics: &[String]) -> Result<()> {
        let email = validate_email(email)?;
        let topics = to_json(topics)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_preference (email, topics) VALUES (?1, ?2)
                 ON CONFLICT(email) DO UPDATE SET topics = excluded.topics",
                params![email, topics],
            )?;
            Ok(())
        })
    }

    async fn upsert_twitter(
        &self,
        email: &str,
        handles: &BTreeSet<String>,
        hashtags: &BTreeSet<String>,
    ) -> Result<()> {
        let email = validate_email(email)?;
        let handles = to_json(handles)?;
        let hashtags = to_json(hashtags)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_preference (email, topics, twitter_handles, twitter_hashtags)
                 VALUES (?1, '[]', ?2, ?3)
                 ON CONFLICT(email) DO UPDATE SET
                    twitter_handles = excluded.twitter_handles,
                    twitter_hashtags = excluded.twitter_hashtags",
                params![email, handles, hashtags],
            )?;
            Ok(())
        })
    }
}

#[async_trait]
impl StyleStore for SqliteStore {
    async fn get_samples(&self, email: &str) -> Result<Vec<String>> {
        let email = validate_email(email)?;
        let raw: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT samples FROM user_style_samples WHERE email = ?1",
                    params![email],
                    |r| r.get(0),
                )
                .optional()?)
        })?;

        match raw {
            Some(text) => from_json(STYLE_TABLE, "samples", &text),
            None => Ok(Vec::new()),
        }
    }

    async fn upsert_samples(&self, email: &str, samples: &[String]) -> Result<()> {
        let email = validate_email(email)?;
        let samples = to_json(samples)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_style_samples (email, samples) VALUES (?1, ?2)
                 ON CONFLICT(email) DO UPDATE SET samples = excluded.samples",
                params![email, samples],
            )?;
            Ok(())
        })
    }
}

#[async_trait]
impl FeedbackSink for SqliteStore {
    async fn record_feedback(&self, feedback: &Feedback) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO newsletter_feedback (email, rating, notes, subject, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    feedback.email,
                    feedback.rating.as_str(),
                    feedback.notes,
                    feedback.subject,
                    now
                ],
            )?;
            Ok(())
        })
    }

    async fn record_send(&self, record: &SendRecord) -> Result<()> {
        let categories = to_json(&record.categories)?;
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO newsletter_sends (email, subject, categories, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![record.email, record.subject, categories, now],
            )?;
            Ok(())
        })
    }
}

impl SqliteStore {
    /// Number of sends logged for an email
    pub fn send_count(&self, email: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM newsletter_sends WHERE email = ?1",
                params![email],
                |r| r.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Feedback ratings left by an email, oldest first
    pub fn feedback_for(&self, email: &str) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT rating, subject FROM newsletter_feedback WHERE email = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![email], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

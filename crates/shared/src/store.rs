use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::error::{NewsletterError, Result};
use crate::models::{Feedback, SendRecord, UserPreference};

pub const PREFERENCES_TABLE: &str = "user_preference";
pub const STYLE_TABLE: &str = "user_style_samples";
pub const FEEDBACK_TABLE: &str = "newsletter_feedback";
pub const SENDS_TABLE: &str = "newsletter_sends";

/// Per-user topic and social preferences, keyed by email
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Every stored subscriber. Rows that fail validation are left out.
    async fn list(&self) -> Result<Vec<UserPreference>>;

    async fn get(&self, email: &str) -> Result<Option<UserPreference>>;

    async fn upsert_topics(&self, email: &str, topics: &[String]) -> Result<()>;

    /// Inserting a new subscriber this way leaves their topics empty
    async fn upsert_twitter(
        &self,
        email: &str,
        handles: &BTreeSet<String>,
        hashtags: &BTreeSet<String>,
    ) -> Result<()>;
}

/// Writing samples used to condition the draft's tone
#[async_trait]
pub trait StyleStore: Send + Sync {
    /// Empty when the user has none
    async fn get_samples(&self, email: &str) -> Result<Vec<String>>;

    async fn upsert_samples(&self, email: &str, samples: &[String]) -> Result<()>;
}

/// Analytics about drafts and sends
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn record_feedback(&self, feedback: &Feedback) -> Result<()>;

    async fn record_send(&self, record: &SendRecord) -> Result<()>;
}

/// A `user_preference` row as stored; optional everywhere until validated
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferenceRow {
    pub email: Option<String>,
    pub topics: Option<Vec<String>>,
    pub twitter_handles: Option<Vec<String>>,
    pub twitter_hashtags: Option<Vec<String>>,
}

impl TryFrom<PreferenceRow> for UserPreference {
    type Error = NewsletterError;

    fn try_from(row: PreferenceRow) -> Result<Self> {
        let email = row
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| NewsletterError::InvalidRecord {
                table: PREFERENCES_TABLE,
                reason: "row has no email".to_string(),
            })?;

        Ok(UserPreference {
            email,
            topics: row
                .topics
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            twitter_handles: row.twitter_handles.unwrap_or_default().into_iter().collect(),
            twitter_hashtags: row.twitter_hashtags.unwrap_or_default().into_iter().collect(),
        })
    }
}

/// Reject obviously bad keys before they reach a store
pub fn validate_email(email: &str) -> Result<&str> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(NewsletterError::InvalidArgument(format!(
            "'{}' is not an email address",
            email
        )));
    }
    Ok(email)
}

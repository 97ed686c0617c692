use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::NewsletterError;

/// One piece of content pulled from a source for a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub source: String,
    pub content: String,
    pub title: Option<String>,
    pub link: Option<Url>,
    pub published: Option<DateTime<Utc>>,
}

impl Article {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            title: None,
            link: None,
            published: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_link(mut self, link: Url) -> Self {
        self.link = Some(link);
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }
}

/// A trending item surfaced alongside the curated draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendItem {
    pub topic: String,
    pub title: String,
    pub link: Url,
    pub why: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    pub email: String,
    pub topics: Vec<String>,
    pub twitter_handles: BTreeSet<String>,
    pub twitter_hashtags: BTreeSet<String>,
}

impl UserPreference {
    pub fn new(email: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            email: email.into(),
            topics,
            ..Default::default()
        }
    }

    /// The category a newsletter is built around
    pub fn primary_topic(&self) -> Option<&str> {
        self.topics
            .iter()
            .map(|t| t.trim())
            .find(|t| !t.is_empty())
    }

    pub fn has_social_signals(&self) -> bool {
        !self.twitter_handles.is_empty() || !self.twitter_hashtags.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Up,
    Down,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Up => "up",
            Rating::Down => "down",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rating {
    type Err = NewsletterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(Rating::Up),
            "down" => Ok(Rating::Down),
            other => Err(NewsletterError::InvalidArgument(format!(
                "rating must be 'up' or 'down', got '{}'",
                other
            ))),
        }
    }
}

/// Inline feedback left on a generated draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub email: String,
    pub rating: Rating,
    pub notes: String,
    pub subject: String,
}

/// Analytics record written after a newsletter goes out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRecord {
    pub email: String,
    pub subject: String,
    pub categories: Vec<String>,
}

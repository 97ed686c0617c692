use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};
use url::Url;

use crate::error::{NewsletterError, Result};

const DEFAULT_X_API: &str = "https://api.twitter.com/2";
const MAX_RESULTS: u32 = 25;

/// A recent post matched by one of a user's handles or hashtags
#[derive(Debug, Clone, PartialEq)]
pub struct SocialPost {
    /// `@handle` or `#hashtag` the post was found under
    pub term: String,
    pub author: Option<String>,
    pub text: String,
    pub link: Url,
}

/// Auxiliary trend signal, e.g. social-media mentions
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn recent_posts(
        &self,
        handles: &BTreeSet<String>,
        hashtags: &BTreeSet<String>,
    ) -> Result<Vec<SocialPost>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Option<Includes>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    author_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<XUser>,
}

#[derive(Debug, Deserialize)]
struct XUser {
    id: String,
    username: String,
}

/// X (Twitter) v2 recent-search client
pub struct XRecentSearch {
    client: Client,
    bearer_token: String,
    base_url: String,
}

impl XRecentSearch {
    pub fn new(bearer_token: String, client: Client) -> Self {
        Self {
            client,
            bearer_token,
            base_url: DEFAULT_X_API.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn search(&self, term: &str, query: &str) -> Result<Vec<SocialPost>> {
        let url = format!(
            "{}/tweets/search/recent?query={}&max_results={}&expansions=author_id&user.fields=username",
            self.base_url,
            urlencoding::encode(query),
            MAX_RESULTS
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| NewsletterError::unavailable("X", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(NewsletterError::unavailable(
                "X",
                format!("{} - {}", status, error_text),
            ));
        }

        let body = response
            .json::<SearchResponse>()
            .await
            .map_err(|e| NewsletterError::unavailable("X", format!("bad response: {}", e)))?;

        let usernames: HashMap<String, String> = body
            .includes
            .map(|i| i.users.into_iter().map(|u| (u.id, u.username)).collect())
            .unwrap_or_default();

        let posts = body
            .data
            .into_iter()
            .filter_map(|tweet| {
                let author = tweet
                    .author_id
                    .as_ref()
                    .and_then(|id| usernames.get(id))
                    .cloned();
                let link = match &author {
                    Some(name) => format!("https://x.com/{}/status/{}", name, tweet.id),
                    None => format!("https://x.com/i/web/status/{}", tweet.id),
                };
                Some(SocialPost {
                    term: term.to_string(),
                    author,
                    text: tweet.text,
                    link: Url::parse(&link).ok()?,
                })
            })
            .collect();

        Ok(posts)
    }
}

#[async_trait]
impl SignalSource for XRecentSearch {
    async fn recent_posts(
        &self,
        handles: &BTreeSet<String>,
        hashtags: &BTreeSet<String>,
    ) -> Result<Vec<SocialPost>> {
        let queries = handles
            .iter()
            .map(|h| h.trim().trim_start_matches('@'))
            .filter(|h| !h.is_empty())
            .map(|h| (format!("@{}", h), format!("from:{}", h)))
            .chain(
                hashtags
                    .iter()
                    .map(|t| t.trim().trim_start_matches('#'))
                    .filter(|t| !t.is_empty())
                    .map(|t| (format!("#{}", t), format!("#{}", t))),
            );

        let mut posts = Vec::new();
        for (term, query) in queries {
            match self.search(&term, &query).await {
                Ok(found) => {
                    debug!(%term, count = found.len(), "Fetched social posts");
                    posts.extend(found);
                }
                Err(e) => warn!(%term, error = %e, "Skipping social query"),
            }
        }
        Ok(posts)
    }
}

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::{NewsletterError, Result};
use crate::models::{Feedback, SendRecord, UserPreference};
use crate::store::{
    validate_email, FeedbackSink, PreferenceRow, PreferenceStore, StyleStore, FEEDBACK_TABLE,
    PREFERENCES_TABLE, SENDS_TABLE, STYLE_TABLE,
};

const PREFERENCE_COLUMNS: &str = "email,topics,twitter_handles,twitter_hashtags";

#[derive(Debug, Deserialize)]
struct StyleRow {
    samples: Option<Vec<String>>,
}

/// Supabase (PostgREST) backed stores
pub struct SupabaseStore {
    client: Client,
    rest_url: String,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(url: &str, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                NewsletterError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn table_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/{}", self.rest_url, table)
        } else {
            format!("{}/{}?{}", self.rest_url, table, query)
        }
    }

    async fn check(response: std::result::Result<Response, reqwest::Error>, what: &str) -> Result<Response> {
        let response = response
            .map_err(|e| NewsletterError::Store(format!("Failed to {}: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(NewsletterError::Store(format!(
                "Failed to {}: {} - {}",
                what, status, error_text
            )));
        }
        Ok(response)
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>> {
        let what = format!("read {}", table);
        let response = self
            .authorized(self.client.get(self.table_url(table, query)))
            .send()
            .await;
        let response = Self::check(response, &what).await?;

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| NewsletterError::Store(format!("Failed to parse {} rows: {}", table, e)))
    }

    async fn exists(&self, table: &str, email: &str) -> Result<bool> {
        let rows: Vec<Value> = self
            .select(table, &format!("select=email&email=eq.{}", urlencoding::encode(email)))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn insert(&self, table: &str, body: &Value) -> Result<()> {
        let response = self
            .authorized(self.client.post(self.table_url(table, "")))
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await;
        Self::check(response, &format!("insert into {}", table)).await?;
        Ok(())
    }

    async fn update(&self, table: &str, email: &str, body: &Value) -> Result<()> {
        let query = format!("email=eq.{}", urlencoding::encode(email));
        let response = self
            .authorized(self.client.patch(self.table_url(table, &query)))
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await;
        Self::check(response, &format!("update {}", table)).await?;
        Ok(())
    }

    /// Update the row for `email` if there is one, otherwise insert
    /// `insert_body`
    async fn upsert_by_email(
        &self,
        table: &str,
        email: &str,
        update_body: Value,
        insert_body: Value,
    ) -> Result<()> {
        if self.exists(table, email).await? {
            debug!(table, email, "Updating existing row");
            self.update(table, email, &update_body).await
        } else {
            debug!(table, email, "Inserting new row");
            self.insert(table, &insert_body).await
        }
    }
}

#[async_trait]
impl PreferenceStore for SupabaseStore {
    async fn list(&self) -> Result<Vec<UserPreference>> {
        let rows: Vec<PreferenceRow> = self
            .select(PREFERENCES_TABLE, &format!("select={}", PREFERENCE_COLUMNS))
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match UserPreference::try_from(row) {
                Ok(pref) => Some(pref),
                Err(e) => {
                    warn!(error = %e, "Ignoring invalid preference row");
                    None
                }
            })
            .collect())
    }

    async fn get(&self, email: &str) -> Result<Option<UserPreference>> {
        let email = validate_email(email)?;
        let rows: Vec<PreferenceRow> = self
            .select(
                PREFERENCES_TABLE,
                &format!(
                    "select={}&email=eq.{}",
                    PREFERENCE_COLUMNS,
                    urlencoding::encode(email)
                ),
            )
            .await?;

        rows.into_iter().next().map(UserPreference::try_from).transpose()
    }

    async fn upsert_topics(&self, email: &str, topics: &[String]) -> Result<()> {
        let email = validate_email(email)?;
        self.upsert_by_email(
            PREFERENCES_TABLE,
            email,
            json!({ "topics": topics }),
            json!({ "email": email, "topics": topics }),
        )
        .await
    }

    async fn upsert_twitter(
        &self,
        email: &str,
        handles: &BTreeSet<String>,
        hashtags: &BTreeSet<String>,
    ) -> Result<()> {
        let email = validate_email(email)?;
        self.upsert_by_email(
            PREFERENCES_TABLE,
            email,
            json!({ "twitter_handles": handles, "twitter_hashtags": hashtags }),
            json!({
                "email": email,
                "topics": [],
                "twitter_handles": handles,
                "twitter_hashtags": hashtags,
            }),
        )
        .await
    }
}

#[async_trait]
impl StyleStore for SupabaseStore {
    async fn get_samples(&self, email: &str) -> Result<Vec<String>> {
        let email = validate_email(email)?;
        let rows: Vec<StyleRow> = self
            .select(
                STYLE_TABLE,
                &format!("select=samples&email=eq.{}", urlencoding::encode(email)),
            )
            .await?;

        Ok(rows
            .into_iter()
            .next()
            .and_then(|r| r.samples)
            .unwrap_or_default())
    }

    async fn upsert_samples(&self, email: &str, samples: &[String]) -> Result<()> {
        let email = validate_email(email)?;
        self.upsert_by_email(
            STYLE_TABLE,
            email,
            json!({ "samples": samples }),
            json!({ "email": email, "samples": samples }),
        )
        .await
    }
}

#[async_trait]
impl FeedbackSink for SupabaseStore {
    async fn record_feedback(&self, feedback: &Feedback) -> Result<()> {
        self.insert(
            FEEDBACK_TABLE,
            &json!({
                "email": feedback.email,
                "rating": feedback.rating.as_str(),
                "notes": feedback.notes,
                "subject": feedback.subject,
            }),
        )
        .await
    }

    async fn record_send(&self, record: &SendRecord) -> Result<()> {
        self.insert(
            SENDS_TABLE,
            &json!({
                "email": record.email,
                "subject": record.subject,
                "categories": record.categories,
            }),
        )
        .await
    }
}

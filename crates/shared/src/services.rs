use reqwest::Client;
use tracing::info;

use crate::config::{Config, StoreConfig};
use crate::curator::Curator;
use crate::dispatch::Dispatcher;
use crate::error::{NewsletterError, Result};
use crate::llm::GroqClient;
use crate::mailer::MailSender;
use crate::social::{SignalSource, XRecentSearch};
use crate::sources::{SourceAggregator, SourcesConfig};
use crate::sqlite::SqliteStore;
use crate::store::{FeedbackSink, PreferenceStore, StyleStore};
use crate::supabase::SupabaseStore;
use crate::trends::TrendDetector;

/// Shared client for source fetching and social search
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent("Mozilla/5.0 (compatible; NewsletterCurator/1.0)")
        .build()
        .map_err(|e| NewsletterError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// The configured persistence backend
pub enum Store {
    Supabase(SupabaseStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        match config {
            StoreConfig::Supabase { url, key } => {
                info!(url = %url, "Using Supabase store");
                Ok(Store::Supabase(SupabaseStore::new(url, key.clone())?))
            }
            StoreConfig::Sqlite { path } => {
                info!(path = %path.display(), "Using SQLite store");
                Ok(Store::Sqlite(SqliteStore::open(path)?))
            }
        }
    }

    pub fn preferences(&self) -> &dyn PreferenceStore {
        match self {
            Store::Supabase(s) => s,
            Store::Sqlite(s) => s,
        }
    }

    pub fn styles(&self) -> &dyn StyleStore {
        match self {
            Store::Supabase(s) => s,
            Store::Sqlite(s) => s,
        }
    }

    pub fn analytics(&self) -> &dyn FeedbackSink {
        match self {
            Store::Supabase(s) => s,
            Store::Sqlite(s) => s,
        }
    }
}

/// Every long-lived collaborator, built once from configuration
pub struct Services {
    pub store: Store,
    pub aggregator: SourceAggregator,
    pub detector: TrendDetector,
    pub signals: Option<XRecentSearch>,
    pub curator: Curator,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http_client()?;

        let sources = match &config.sources_file {
            Some(path) => SourcesConfig::load(path)?,
            None => SourcesConfig::default(),
        };
        let aggregator = SourceAggregator::from_config(&sources, &client, config.max_articles)?;

        let signals = config
            .twitter_bearer_token
            .clone()
            .map(|token| XRecentSearch::new(token, client.clone()));
        if signals.is_none() {
            info!("TWITTER_BEARER_TOKEN not set; social trend signals disabled");
        }

        let model = GroqClient::new(config.groq_api_key.clone())?
            .with_base_url(config.groq_base_url.clone());

        Ok(Self {
            store: Store::open(&config.store)?,
            aggregator,
            detector: TrendDetector::new(config.max_trends),
            signals,
            curator: Curator::new(Box::new(model), config.model.clone()),
        })
    }

    pub fn dispatcher<'a>(&'a self, mailer: &'a dyn MailSender) -> Dispatcher<'a> {
        Dispatcher {
            preferences: self.store.preferences(),
            styles: self.store.styles(),
            analytics: self.store.analytics(),
            aggregator: &self.aggregator,
            detector: &self.detector,
            signals: self.signals.as_ref().map(|s| s as &dyn SignalSource),
            curator: &self.curator,
            mailer,
        }
    }
}

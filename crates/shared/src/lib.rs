// Public modules
pub mod config;
pub mod curator;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod llm;
pub mod mailer;
pub mod models;
pub mod services;
pub mod social;
pub mod sources;
pub mod sqlite;
pub mod store;
pub mod supabase;
pub mod trends;

// Re-export commonly used types
pub use config::{Config, SmtpConfig, StoreConfig};
pub use curator::{Curator, Draft, Section};
pub use dispatch::{BatchReport, Dispatcher, Newsletter, Outcome, SkipReason, UserOutcome};
pub use error::{NewsletterError, Result};
pub use extractor::ContentExtractor;
pub use llm::{GroqClient, LanguageModel};
pub use mailer::{DryRunMailer, MailSender, SmtpMailer};
pub use models::{Article, Feedback, Rating, SendRecord, TrendItem, UserPreference};
pub use services::{Services, Store};
pub use social::{SignalSource, SocialPost, XRecentSearch};
pub use sources::{ContentSource, SourceAggregator, SourcesConfig};
pub use sqlite::SqliteStore;
pub use store::{FeedbackSink, PreferenceStore, StyleStore};
pub use supabase::SupabaseStore;
pub use trends::TrendDetector;

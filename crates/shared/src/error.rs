/// Errors raised by the curation pipeline and its collaborators.
///
/// Only `Configuration` is fatal to a batch run. Everything else is scoped to
/// one source or one user and is handled where it happens.
#[derive(Debug, thiserror::Error)]
pub enum NewsletterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid record in {table}: {reason}")]
    InvalidRecord { table: &'static str, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl NewsletterError {
    pub fn unavailable(name: &str, reason: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            source_name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<rusqlite::Error> for NewsletterError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NewsletterError>;

use std::env;
use std::path::PathBuf;

use crate::error::{NewsletterError, Result};

pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-20b";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_MAX_TRENDS: usize = 3;
const DEFAULT_MAX_ARTICLES: usize = 20;

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Supabase { url: String, key: String },
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub groq_api_key: String,
    pub groq_base_url: String,
    pub model: String,
    pub store: StoreConfig,
    pub smtp: Option<SmtpConfig>,
    pub twitter_bearer_token: Option<String>,
    pub sources_file: Option<PathBuf>,
    pub max_trends: usize,
    pub max_articles: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; empty values count as missing
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let groq_api_key = get("GROQ_API_KEY").ok_or_else(|| {
            NewsletterError::Configuration(
                "GROQ_API_KEY not found.\n\n\
                To fix this, create ~/.config/newsletter-curator/.env with:\n  \
                GROQ_API_KEY=your_key_here\n  \
                SUPABASE_URL=https://your-project.supabase.co\n  \
                SUPABASE_KEY=your_service_key"
                    .to_string(),
            )
        })?;

        let store = match (get("SUPABASE_URL"), get("SUPABASE_KEY"), get("NEWSLETTER_DB")) {
            (Some(url), Some(key), _) => StoreConfig::Supabase { url, key },
            (None, None, Some(path)) => StoreConfig::Sqlite {
                path: PathBuf::from(path),
            },
            (Some(_), None, _) => {
                return Err(NewsletterError::Configuration(
                    "SUPABASE_URL is set but SUPABASE_KEY is missing".to_string(),
                ))
            }
            (None, Some(_), _) => {
                return Err(NewsletterError::Configuration(
                    "SUPABASE_KEY is set but SUPABASE_URL is missing".to_string(),
                ))
            }
            (None, None, None) => {
                return Err(NewsletterError::Configuration(
                    "No preference store configured. Set SUPABASE_URL and SUPABASE_KEY, \
                    or NEWSLETTER_DB to a local SQLite file"
                        .to_string(),
                ))
            }
        };

        let smtp = match get("SMTP_HOST") {
            Some(host) => {
                let require = |key: &str| {
                    get(key).ok_or_else(|| {
                        NewsletterError::Configuration(format!(
                            "SMTP_HOST is set but {} is missing",
                            key
                        ))
                    })
                };
                let port = match get("SMTP_PORT") {
                    Some(p) => p.trim().parse::<u16>().map_err(|_| {
                        NewsletterError::Configuration(format!("SMTP_PORT is not a port: {}", p))
                    })?,
                    None => DEFAULT_SMTP_PORT,
                };
                Some(SmtpConfig {
                    host,
                    port,
                    username: require("SMTP_USERNAME")?,
                    password: require("SMTP_PASSWORD")?,
                    from: require("SMTP_FROM")?,
                })
            }
            None => None,
        };

        Ok(Self {
            groq_api_key,
            groq_base_url: get("GROQ_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GROQ_BASE_URL.to_string()),
            model: get("GROQ_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            store,
            smtp,
            twitter_bearer_token: get("TWITTER_BEARER_TOKEN"),
            sources_file: get("SOURCES_FILE").map(PathBuf::from),
            max_trends: parse_count(get("MAX_TRENDS"), "MAX_TRENDS", DEFAULT_MAX_TRENDS)?,
            max_articles: parse_count(get("MAX_ARTICLES"), "MAX_ARTICLES", DEFAULT_MAX_ARTICLES)?,
        })
    }

    /// SMTP settings, required by anything that actually sends mail
    pub fn require_smtp(&self) -> Result<&SmtpConfig> {
        self.smtp.as_ref().ok_or_else(|| {
            NewsletterError::Configuration(
                "SMTP_HOST not found. Set SMTP_HOST, SMTP_USERNAME, SMTP_PASSWORD and SMTP_FROM"
                    .to_string(),
            )
        })
    }

    fn try_load_dotenv() {
        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/newsletter-curator/.env
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("newsletter-curator").join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }
    }
}

fn parse_count(value: Option<String>, key: &str, default: usize) -> Result<usize> {
    match value {
        Some(v) => v.trim().parse::<usize>().map_err(|_| {
            NewsletterError::Configuration(format!("{} must be a positive integer, got {}", key, v))
        }),
        None => Ok(default),
    }
}

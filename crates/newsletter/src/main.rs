use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::{
    Config, DryRunMailer, Feedback, FeedbackSink, PreferenceStore, Rating, Section, Services,
    Store, StyleStore, UserPreference,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "newsletter")]
#[command(about = "Manage subscribers, style samples and drafts for the newsletter curator")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Topic preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
    /// X (Twitter) handles and hashtags used as trend signals
    Twitter {
        #[command(subcommand)]
        action: TwitterAction,
    },
    /// Writing samples that shape the draft's tone
    Style {
        #[command(subcommand)]
        action: StyleAction,
    },
    /// Rate a newsletter draft
    Feedback {
        #[arg(short, long)]
        email: String,

        /// up or down
        #[arg(short, long)]
        rating: Rating,

        /// Subject line of the rated draft
        #[arg(short, long)]
        subject: String,

        #[arg(short, long, default_value = "")]
        notes: String,
    },
    /// Curate a newsletter and print it without sending
    Draft {
        #[arg(short, long)]
        email: String,

        /// Category to curate (defaults to the subscriber's first topic)
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Rewrite one section (SUMMARY, LEARNING or ACTION)
    Regenerate {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        section: Section,

        #[arg(short, long)]
        category: Option<String>,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    Set {
        #[arg(short, long)]
        email: String,

        /// Comma-separated topics; the first one is the newsletter category
        #[arg(short, long, value_delimiter = ',', required = true)]
        topics: Vec<String>,
    },
    Show {
        #[arg(short, long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum TwitterAction {
    Set {
        #[arg(short, long)]
        email: String,

        #[arg(long, value_delimiter = ',')]
        handles: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        hashtags: Vec<String>,
    },
}

#[derive(Subcommand)]
enum StyleAction {
    /// Replace the samples with the contents of the given files
    Set {
        #[arg(short, long)]
        email: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    Show {
        #[arg(short, long)]
        email: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    match args.command {
        Command::Prefs { action } => {
            let store = Store::open(&config.store)?;
            match action {
                PrefsAction::Set { email, topics } => {
                    let topics = clean_list(topics, "");
                    store
                        .preferences()
                        .upsert_topics(&email, &topics)
                        .await
                        .context("Failed to save topics")?;
                    println!("✓ Topics for {}: {}", email, topics.join(", "));
                }
                PrefsAction::Show { email } => {
                    let pref = load_user(&store, &email).await?;
                    print_preferences(&pref);
                }
            }
        }
        Command::Twitter {
            action:
                TwitterAction::Set {
                    email,
                    handles,
                    hashtags,
                },
        } => {
            let store = Store::open(&config.store)?;
            let handles: BTreeSet<String> = clean_list(handles, "@").into_iter().collect();
            let hashtags: BTreeSet<String> = clean_list(hashtags, "#").into_iter().collect();
            store
                .preferences()
                .upsert_twitter(&email, &handles, &hashtags)
                .await
                .context("Failed to save Twitter signals")?;
            println!(
                "✓ Twitter signals for {}: {} handles, {} hashtags",
                email,
                handles.len(),
                hashtags.len()
            );
        }
        Command::Style { action } => {
            let store = Store::open(&config.store)?;
            match action {
                StyleAction::Set { email, files } => {
                    let mut samples = Vec::new();
                    for path in &files {
                        let sample = fs::read_to_string(path)
                            .context(format!("Failed to read sample: {}", path.display()))?;
                        samples.push(sample.trim().to_string());
                    }
                    store
                        .styles()
                        .upsert_samples(&email, &samples)
                        .await
                        .context("Failed to save style samples")?;
                    println!("✓ Saved {} style samples for {}", samples.len(), email);
                }
                StyleAction::Show { email } => {
                    let samples = store
                        .styles()
                        .get_samples(&email)
                        .await
                        .context("Failed to load style samples")?;
                    if samples.is_empty() {
                        println!("No style samples for {}", email);
                    }
                    for (i, sample) in samples.iter().enumerate() {
                        println!("--- Sample {} ---\n{}\n", i + 1, sample);
                    }
                }
            }
        }
        Command::Feedback {
            email,
            rating,
            subject,
            notes,
        } => {
            let store = Store::open(&config.store)?;
            let feedback = Feedback {
                email: shared::store::validate_email(&email)?.to_string(),
                rating,
                notes,
                subject,
            };
            store
                .analytics()
                .record_feedback(&feedback)
                .await
                .context("Failed to record feedback")?;
            println!("✓ Recorded {} for \"{}\"", feedback.rating, feedback.subject);
        }
        Command::Draft { email, category } => {
            let services = Services::from_config(&config)?;
            let user = load_user(&services.store, &email).await?;
            let category = pick_category(&user, category)?;

            println!(
                "🤖 Curating {} for {} with {}...\n",
                category,
                user.email,
                services.curator.model_id()
            );
            let mailer = DryRunMailer;
            let newsletter = services
                .dispatcher(&mailer)
                .compose(&user, &category)
                .await
                .context("Failed to curate newsletter")?;
            println!("{}", newsletter.body);
        }
        Command::Regenerate {
            email,
            section,
            category,
        } => {
            let services = Services::from_config(&config)?;
            let user = load_user(&services.store, &email).await?;
            let category = pick_category(&user, category)?;

            let mailer = DryRunMailer;
            let block = services
                .dispatcher(&mailer)
                .regenerate(&user, &category, section)
                .await
                .context("Failed to regenerate section")?;
            println!("{}", block);
        }
    }

    Ok(())
}

async fn load_user(store: &Store, email: &str) -> Result<UserPreference> {
    store
        .preferences()
        .get(email)
        .await
        .context("Failed to load preferences")?
        .ok_or_else(|| anyhow::anyhow!("No preferences stored for {}", email))
}

fn pick_category(user: &UserPreference, category: Option<String>) -> Result<String> {
    category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .or_else(|| user.primary_topic().map(str::to_string))
        .ok_or_else(|| anyhow::anyhow!("{} has no topics; pass --category", user.email))
}

/// Trim entries, drop blanks and strip a leading marker such as `@` or `#`
fn clean_list(items: Vec<String>, marker: &str) -> Vec<String> {
    items
        .into_iter()
        .map(|item| {
            let item = item.trim();
            item.strip_prefix(marker).unwrap_or(item).trim().to_string()
        })
        .filter(|item| !item.is_empty())
        .collect()
}

fn print_preferences(pref: &UserPreference) {
    println!("Email:    {}", pref.email);
    println!("Topics:   {}", pref.topics.join(", "));
    if pref.has_social_signals() {
        let handles: Vec<String> = pref.twitter_handles.iter().map(|h| format!("@{}", h)).collect();
        let tags: Vec<String> = pref.twitter_hashtags.iter().map(|t| format!("#{}", t)).collect();
        println!("Handles:  {}", handles.join(", "));
        println!("Hashtags: {}", tags.join(", "));
    }
}

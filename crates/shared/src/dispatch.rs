use std::fmt;
use tracing::{error, info, warn};

use crate::curator::{Curator, Section};
use crate::error::Result;
use crate::mailer::MailSender;
use crate::models::{SendRecord, TrendItem, UserPreference};
use crate::social::{SignalSource, SocialPost};
use crate::sources::SourceAggregator;
use crate::store::{FeedbackSink, PreferenceStore, StyleStore};
use crate::trends::{append_trends, TrendDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingEmail,
    NoTopics,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingEmail => f.write_str("no email"),
            SkipReason::NoTopics => f.write_str("no topics"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Sent { subject: String },
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserOutcome {
    pub email: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<UserOutcome>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }

    pub fn sent(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Sent { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn outcome_for(&self, email: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.email == email)
            .map(|o| &o.outcome)
    }
}

/// A composed newsletter, ready to send
#[derive(Debug, Clone)]
pub struct Newsletter {
    pub category: String,
    pub subject: String,
    pub body: String,
    pub trends: Vec<TrendItem>,
}

/// Everything a batch run needs, constructed once by the entry point
pub struct Dispatcher<'a> {
    pub preferences: &'a dyn PreferenceStore,
    pub styles: &'a dyn StyleStore,
    pub analytics: &'a dyn FeedbackSink,
    pub aggregator: &'a SourceAggregator,
    pub detector: &'a TrendDetector,
    pub signals: Option<&'a dyn SignalSource>,
    pub curator: &'a Curator,
    pub mailer: &'a dyn MailSender,
}

impl<'a> Dispatcher<'a> {
    /// Send to every stored subscriber
    pub async fn run(&self) -> Result<BatchReport> {
        let users = self.preferences.list().await?;
        info!(users = users.len(), "Starting newsletter batch");
        Ok(self.run_for(&users).await)
    }

    /// Send to the given users, one at a time. A failing user never stops
    /// the batch.
    pub async fn run_for(&self, users: &[UserPreference]) -> BatchReport {
        let mut report = BatchReport::default();
        for user in users {
            let outcome = self.process_user(user).await;
            report.outcomes.push(UserOutcome {
                email: user.email.clone(),
                outcome,
            });
        }

        info!(
            sent = report.sent(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Newsletter batch finished"
        );
        report
    }

    pub async fn process_user(&self, user: &UserPreference) -> Outcome {
        let email = user.email.trim();
        if email.is_empty() {
            warn!("Skipping subscriber without an email");
            return Outcome::Skipped(SkipReason::MissingEmail);
        }
        let Some(category) = user.primary_topic() else {
            info!(email, "Skipping subscriber without topics");
            return Outcome::Skipped(SkipReason::NoTopics);
        };

        match self.deliver(user, category).await {
            Ok(subject) => {
                println!("Sent to {}", email);
                Outcome::Sent { subject }
            }
            Err(e) => {
                error!(email, error = %e, "Newsletter failed");
                eprintln!("Error for {}: {}", email, e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    async fn deliver(&self, user: &UserPreference, category: &str) -> Result<String> {
        let newsletter = self.compose(user, category).await?;
        let email = user.email.trim();

        self.mailer
            .send(email, &newsletter.subject, &newsletter.body)
            .await?;

        let record = SendRecord {
            email: email.to_string(),
            subject: newsletter.subject.clone(),
            categories: vec![newsletter.category.clone()],
        };
        if let Err(e) = self.analytics.record_send(&record).await {
            warn!(email, error = %e, "Failed to log send");
        }

        Ok(newsletter.subject)
    }

    /// Aggregate, detect trends and curate a newsletter for one category
    pub async fn compose(&self, user: &UserPreference, category: &str) -> Result<Newsletter> {
        let email = user.email.trim();
        let articles = self.aggregator.aggregate(category).await;
        if articles.is_empty() {
            warn!(email, category, "No articles found; curating without context");
        }

        let signals = self.social_signals(user).await;
        let trends = self.detector.detect(category, &articles, &signals);
        let samples = self.style_samples(email).await;
        let topics = vec![category.to_string()];

        let draft = self.curator.curate(&articles, &topics, &samples).await?;
        let body = append_trends(&draft.to_string(), &trends);

        Ok(Newsletter {
            category: category.to_string(),
            subject: draft.subject_a,
            body,
            trends,
        })
    }

    /// Rewrite one body section for a user's newsletter category
    pub async fn regenerate(
        &self,
        user: &UserPreference,
        category: &str,
        section: Section,
    ) -> Result<String> {
        let articles = self.aggregator.aggregate(category).await;
        let samples = self.style_samples(user.email.trim()).await;
        let topics = vec![category.to_string()];
        self.curator
            .regenerate_section(&articles, &topics, section, &samples)
            .await
    }

    async fn style_samples(&self, email: &str) -> Vec<String> {
        match self.styles.get_samples(email).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(email, error = %e, "Style samples unavailable; drafting without them");
                Vec::new()
            }
        }
    }

    async fn social_signals(&self, user: &UserPreference) -> Vec<SocialPost> {
        let Some(signals) = self.signals else {
            return Vec::new();
        };
        if !user.has_social_signals() {
            return Vec::new();
        }

        match signals
            .recent_posts(&user.twitter_handles, &user.twitter_hashtags)
            .await
        {
            Ok(posts) => posts,
            Err(e) => {
                warn!(email = %user.email, error = %e, "Social signals unavailable");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NewsletterError;
    use crate::llm::LanguageModel;
    use crate::models::Article;
    use crate::sources::ContentSource;
    use crate::sqlite::SqliteStore;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use url::Url;

    const DRAFT: &str = "SUBJECT_A: Agents arrive\nSUBJECT_B: The agent week\nSUMMARY: Lots happened.\nLEARNING: Agents matter.\nACTION: Try one agent.";

    /// Answers every prompt with a fixed draft, failing when the prompt
    /// mentions `fail_on`
    struct ScriptedModel {
        fail_on: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _model: &str, prompt: &str) -> crate::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_on {
                Some(marker) if prompt.contains(marker) => Err(NewsletterError::ModelInvocation(
                    "503 Service Unavailable".to_string(),
                )),
                _ => Ok(DRAFT.to_string()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl MailSender for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> crate::Result<()> {
            if self.fail {
                return Err(NewsletterError::Delivery("relay refused".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct BrokenStyles;

    #[async_trait]
    impl StyleStore for BrokenStyles {
        async fn get_samples(&self, _email: &str) -> crate::Result<Vec<String>> {
            Err(NewsletterError::Store("timeout".to_string()))
        }

        async fn upsert_samples(&self, _email: &str, _samples: &[String]) -> crate::Result<()> {
            Err(NewsletterError::Store("timeout".to_string()))
        }
    }

    struct Headlines(Vec<Article>);

    #[async_trait]
    impl ContentSource for Headlines {
        fn name(&self) -> &str {
            "headlines"
        }

        async fn fetch(&self, _topic: &str) -> crate::Result<Vec<Article>> {
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        store: SqliteStore,
        aggregator: SourceAggregator,
        detector: TrendDetector,
        curator: Curator,
        mailer: RecordingMailer,
        calls: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new(fail_on: Option<&'static str>, articles: Vec<Article>) -> Self {
            let calls = Arc::new(AtomicUsize::new(0));
            let model = ScriptedModel {
                fail_on,
                calls: calls.clone(),
            };
            Self {
                store: SqliteStore::open_in_memory().unwrap(),
                aggregator: SourceAggregator::new(20)
                    .with_search_source(Box::new(Headlines(articles))),
                detector: TrendDetector::new(3),
                curator: Curator::new(Box::new(model), "test-model"),
                mailer: RecordingMailer::default(),
                calls,
            }
        }

        fn dispatcher(&self) -> Dispatcher<'_> {
            Dispatcher {
                preferences: &self.store,
                styles: &self.store,
                analytics: &self.store,
                aggregator: &self.aggregator,
                detector: &self.detector,
                signals: None,
                curator: &self.curator,
                mailer: &self.mailer,
            }
        }
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn linked(source: &str, title: &str, link: &str) -> Article {
        Article::new(source, title)
            .with_title(title)
            .with_link(Url::parse(link).unwrap())
    }

    #[tokio::test]
    async fn one_failing_user_does_not_stop_the_batch() {
        let fixture = Fixture::new(Some("Robotics"), vec![Article::new("Wire", "AI news")]);
        fixture
            .store
            .upsert_topics("a@x.com", &topics(&["AI"]))
            .await
            .unwrap();
        fixture
            .store
            .upsert_topics("b@x.com", &topics(&["Robotics"]))
            .await
            .unwrap();

        let report = fixture.dispatcher().run().await.unwrap();

        assert_eq!(report.sent(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(
            report.outcome_for("a@x.com"),
            Some(&Outcome::Sent {
                subject: "Agents arrive".to_string()
            })
        );
        assert!(matches!(report.outcome_for("b@x.com"), Some(Outcome::Failed(msg)) if msg.contains("503")));

        let sent = fixture.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "a@x.com");
        assert!(sent[0].2.starts_with("SUBJECT_A: Agents arrive"));
        assert_eq!(fixture.store.send_count("a@x.com").unwrap(), 1);
        assert_eq!(fixture.store.send_count("b@x.com").unwrap(), 0);
    }

    #[tokio::test]
    async fn users_without_topics_or_email_are_skipped_without_model_calls() {
        let fixture = Fixture::new(None, vec![]);
        let users = vec![
            UserPreference::new("c@x.com", vec![]),
            UserPreference::new("  ", topics(&["AI"])),
            UserPreference::new("d@x.com", topics(&["   "])),
        ];

        let report = fixture.dispatcher().run_for(&users).await;

        assert_eq!(report.skipped(), 3);
        assert_eq!(
            report.outcome_for("c@x.com"),
            Some(&Outcome::Skipped(SkipReason::NoTopics))
        );
        assert_eq!(
            report.outcomes[1].outcome,
            Outcome::Skipped(SkipReason::MissingEmail)
        );
        assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
        assert!(fixture.mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn trends_block_follows_the_draft() {
        let fixture = Fixture::new(
            None,
            vec![
                linked("TechCrunch", "Robots learn warehouse tricks", "https://tc.com/robots"),
                linked("Verge", "Warehouse robots go mainstream", "https://verge.com/robots"),
            ],
        );
        let user = UserPreference::new("e@x.com", topics(&["AI", "Robots"]));

        let newsletter = fixture.dispatcher().compose(&user, "AI").await.unwrap();

        assert_eq!(newsletter.subject, "Agents arrive");
        assert!(!newsletter.trends.is_empty());
        let (draft, block) = newsletter
            .body
            .split_once("\n\nTRENDS TO WATCH:\n")
            .unwrap();
        assert!(draft.ends_with("ACTION: Try one agent."));
        assert!(block.starts_with("- "));
    }

    #[tokio::test]
    async fn broken_style_store_still_sends() {
        let fixture = Fixture::new(None, vec![Article::new("Wire", "AI news")]);
        let mut dispatcher = fixture.dispatcher();
        dispatcher.styles = &BrokenStyles;

        let outcome = dispatcher
            .process_user(&UserPreference::new("f@x.com", topics(&["AI"])))
            .await;

        assert!(matches!(outcome, Outcome::Sent { .. }));
    }

    #[tokio::test]
    async fn delivery_failure_is_not_logged_as_a_send() {
        let mut fixture = Fixture::new(None, vec![Article::new("Wire", "AI news")]);
        fixture.mailer.fail = true;

        let outcome = fixture
            .dispatcher()
            .process_user(&UserPreference::new("g@x.com", topics(&["AI"])))
            .await;

        assert!(matches!(outcome, Outcome::Failed(msg) if msg.contains("relay refused")));
        assert_eq!(fixture.store.send_count("g@x.com").unwrap(), 0);
    }

    #[tokio::test]
    async fn social_signals_are_skipped_for_users_without_handles() {
        struct Panicking;

        #[async_trait]
        impl SignalSource for Panicking {
            async fn recent_posts(
                &self,
                _handles: &BTreeSet<String>,
                _hashtags: &BTreeSet<String>,
            ) -> crate::Result<Vec<SocialPost>> {
                panic!("should not be called");
            }
        }

        let fixture = Fixture::new(None, vec![]);
        let mut dispatcher = fixture.dispatcher();
        dispatcher.signals = Some(&Panicking);

        let outcome = dispatcher
            .process_user(&UserPreference::new("h@x.com", topics(&["AI"])))
            .await;
        assert!(matches!(outcome, Outcome::Sent { .. }));
    }
}

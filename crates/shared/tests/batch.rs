use async_trait::async_trait;
use shared::{
    Article, ContentSource, Curator, Dispatcher, LanguageModel, MailSender, NewsletterError,
    Outcome, PreferenceStore, Section, SourceAggregator, SqliteStore, StyleStore, TrendDetector,
};
use std::sync::{Arc, Mutex};

const FULL_DRAFT: &str = "\
**SUBJECT_A:** AI agents go mainstream
SUBJECT_B: Your agent briefing

SUMMARY: Agents shipped everywhere this week.

Vendors raced to follow.

Regulators took notice.
LEARNING: Small agents beat big ones.
ACTION: Automate one chore today.";

/// Records every prompt and answers with `reply`
#[derive(Clone)]
struct CapturingModel {
    prompts: Arc<Mutex<Vec<String>>>,
    reply: &'static str,
}

impl CapturingModel {
    fn new(reply: &'static str) -> Self {
        Self {
            prompts: Arc::new(Mutex::new(Vec::new())),
            reply,
        }
    }
}

#[async_trait]
impl LanguageModel for CapturingModel {
    async fn complete(&self, model: &str, prompt: &str) -> shared::Result<String> {
        assert_eq!(model, "test-model");
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.to_string())
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl MailSender for Outbox {
    async fn send(&self, to: &str, subject: &str, body: &str) -> shared::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

struct OneArticle;

#[async_trait]
impl ContentSource for OneArticle {
    fn name(&self) -> &str {
        "TechCrunch"
    }

    async fn fetch(&self, topic: &str) -> shared::Result<Vec<Article>> {
        if topic != "AI" {
            return Err(NewsletterError::unavailable("TechCrunch", "no such category"));
        }
        Ok(vec![Article::new(
            "TechCrunch",
            "Anthropic releases new agent tooling for developers",
        )])
    }
}

fn aggregator() -> SourceAggregator {
    SourceAggregator::new(20).with_category_source("AI", Box::new(OneArticle))
}

fn label_count(text: &str, label: &str) -> usize {
    text.lines()
        .filter(|line| line.starts_with(&format!("{}:", label)))
        .count()
}

#[tokio::test]
async fn single_article_newsletter_end_to_end() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .upsert_topics("reader@example.com", &["AI".to_string()])
        .await
        .unwrap();

    let model = CapturingModel::new(FULL_DRAFT);
    let prompts = model.prompts.clone();
    let aggregator = aggregator();
    let detector = TrendDetector::new(3);
    let curator = Curator::new(Box::new(model), "test-model");
    let outbox = Outbox::default();

    let dispatcher = Dispatcher {
        preferences: &store,
        styles: &store,
        analytics: &store,
        aggregator: &aggregator,
        detector: &detector,
        signals: None,
        curator: &curator,
        mailer: &outbox,
    };
    let report = dispatcher.run().await.unwrap();

    assert_eq!(
        report.outcome_for("reader@example.com"),
        Some(&Outcome::Sent {
            subject: "AI agents go mainstream".to_string()
        })
    );

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Source: TechCrunch\nAnthropic releases new agent tooling"));
    assert!(!prompts[0].contains("STYLE_EXAMPLE:"));
    assert!(!prompts[0].contains("Guidance:"));

    let sent = outbox.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (to, subject, body) = &sent[0];
    assert_eq!(to, "reader@example.com");
    assert_eq!(subject, "AI agents go mainstream");
    for label in ["SUBJECT_A", "SUBJECT_B", "SUMMARY", "LEARNING", "ACTION"] {
        assert_eq!(label_count(body, label), 1, "{} in {}", label, body);
    }
    assert!(body.contains("Regulators took notice."));
    // A single article cannot make a trend
    assert!(!body.contains("TRENDS TO WATCH:"));

    assert_eq!(store.send_count("reader@example.com").unwrap(), 1);
}

#[tokio::test]
async fn style_samples_are_capped_at_five() {
    let store = SqliteStore::open_in_memory().unwrap();
    let samples: Vec<String> = (1..=7).map(|i| format!("Sample number {}", i)).collect();
    store
        .upsert_samples("writer@example.com", &samples)
        .await
        .unwrap();
    store
        .upsert_topics("writer@example.com", &["AI".to_string()])
        .await
        .unwrap();

    let model = CapturingModel::new(FULL_DRAFT);
    let prompts = model.prompts.clone();
    let aggregator = aggregator();
    let detector = TrendDetector::new(3);
    let curator = Curator::new(Box::new(model), "test-model");
    let outbox = Outbox::default();

    let dispatcher = Dispatcher {
        preferences: &store,
        styles: &store,
        analytics: &store,
        aggregator: &aggregator,
        detector: &detector,
        signals: None,
        curator: &curator,
        mailer: &outbox,
    };
    dispatcher.run().await.unwrap();

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts[0].matches("STYLE_EXAMPLE:").count(), 5);
    assert!(prompts[0].contains("Sample number 5"));
    assert!(!prompts[0].contains("Sample number 6"));
}

#[tokio::test]
async fn regenerated_section_carries_only_its_label() {
    let store = SqliteStore::open_in_memory().unwrap();
    let model = CapturingModel::new("LEARNING: Ship small.\nACTION: ignore me");
    let prompts = model.prompts.clone();
    let aggregator = aggregator();
    let detector = TrendDetector::new(3);
    let curator = Curator::new(Box::new(model), "test-model");
    let outbox = Outbox::default();

    let dispatcher = Dispatcher {
        preferences: &store,
        styles: &store,
        analytics: &store,
        aggregator: &aggregator,
        detector: &detector,
        signals: None,
        curator: &curator,
        mailer: &outbox,
    };
    let user = shared::UserPreference::new("r@example.com", vec!["AI".to_string()]);
    let block = dispatcher
        .regenerate(&user, "AI", Section::Learning)
        .await
        .unwrap();

    assert_eq!(block, "LEARNING: Ship small.");
    assert!(prompts.lock().unwrap()[0].contains("Regenerate ONLY the LEARNING"));
    assert!(outbox.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn subject_sections_cannot_be_regenerated() {
    let model = CapturingModel::new(FULL_DRAFT);
    let prompts = model.prompts.clone();
    let curator = Curator::new(Box::new(model), "test-model");

    let err = curator
        .regenerate_section(&[], &["AI".to_string()], Section::SubjectA, &[])
        .await
        .unwrap_err();

    assert!(matches!(err, NewsletterError::InvalidArgument(_)));
    assert!(prompts.lock().unwrap().is_empty());
}

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{NewsletterError, Result};
use crate::extractor::{fragment_to_text, truncate_utf8, ContentExtractor};
use crate::models::Article;

const MAX_ITEMS_PER_SOURCE: usize = 10;
const DEFAULT_MAX_CONTENT_LEN: usize = 2000;

/// Something that can produce articles for a topic
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Human-readable name, used as `Article::source`
    fn name(&self) -> &str;

    async fn fetch(&self, topic: &str) -> Result<Vec<Article>>;
}

fn expand_template(template: &str, topic: &str) -> String {
    template.replace("{topic}", &urlencoding::encode(topic.trim()))
}

/// RSS or Atom feed, optionally parameterized by topic
pub struct RssSource {
    name: String,
    url_template: String,
    client: Client,
}

impl RssSource {
    pub fn new(name: impl Into<String>, url_template: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
            client,
        }
    }

    /// Turn a feed document into articles, newest entries as the feed orders them
    pub fn parse_feed(&self, body: &[u8]) -> Result<Vec<Article>> {
        let feed = feed_rs::parser::parse(body)
            .map_err(|e| NewsletterError::unavailable(&self.name, format!("bad feed: {}", e)))?;

        let articles = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let title = entry
                    .title
                    .map(|t| fragment_to_text(&t.content))
                    .filter(|t| !t.is_empty());
                let body = entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body))
                    .map(|html| fragment_to_text(&html))
                    .filter(|t| !t.is_empty());

                let content = match (&title, body) {
                    (Some(t), Some(b)) if !b.starts_with(t.as_str()) => format!("{}\n{}", t, b),
                    (_, Some(b)) => b,
                    (Some(t), None) => t.clone(),
                    (None, None) => return None,
                };

                let mut article = Article::new(self.name.clone(), content);
                article.title = title;
                article.link = entry
                    .links
                    .first()
                    .and_then(|l| Url::parse(&l.href).ok());
                article.published = entry.published.or(entry.updated);
                Some(article)
            })
            .take(MAX_ITEMS_PER_SOURCE)
            .collect();

        Ok(articles)
    }
}

#[async_trait]
impl ContentSource for RssSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, topic: &str) -> Result<Vec<Article>> {
        let url = expand_template(&self.url_template, topic);
        debug!(source = %self.name, %url, "Fetching feed");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| NewsletterError::unavailable(&self.name, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NewsletterError::unavailable(
                &self.name,
                format!("HTTP error: {}", status),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| NewsletterError::unavailable(&self.name, e))?;

        self.parse_feed(&body)
    }
}

/// HTML listing page; headlines are picked with a CSS selector and the first
/// few linked pages are pulled in as article text
pub struct HtmlSource {
    name: String,
    url_template: String,
    selector: String,
    follow_links: usize,
    extractor: ContentExtractor,
}

impl HtmlSource {
    pub fn new(
        name: impl Into<String>,
        url_template: impl Into<String>,
        selector: impl Into<String>,
        follow_links: usize,
        client: Client,
    ) -> Result<Self> {
        let name = name.into();
        let selector = selector.into();
        if Selector::parse(&selector).is_err() {
            return Err(NewsletterError::Configuration(format!(
                "Invalid CSS selector for source {}: {}",
                name, selector
            )));
        }

        Ok(Self {
            name,
            url_template: url_template.into(),
            selector,
            follow_links,
            extractor: ContentExtractor::new(client),
        })
    }

    /// Headline text and absolute link for every element matching the selector
    pub fn extract_headlines(&self, html: &str, base: &Url) -> Vec<(String, Url)> {
        let Ok(selector) = Selector::parse(&self.selector) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);

        let mut seen = HashSet::new();
        document
            .select(&selector)
            .filter_map(|element| {
                let title = element
                    .text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ");
                let href = element.value().attr("href")?;
                let link = base.join(href).ok()?;
                if title.is_empty() || !seen.insert(link.clone()) {
                    return None;
                }
                Some((title, link))
            })
            .take(MAX_ITEMS_PER_SOURCE)
            .collect()
    }
}

#[async_trait]
impl ContentSource for HtmlSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, topic: &str) -> Result<Vec<Article>> {
        let url = expand_template(&self.url_template, topic);
        let base = Url::parse(&url)
            .map_err(|e| NewsletterError::unavailable(&self.name, format!("bad URL {}: {}", url, e)))?;

        let html = self
            .extractor
            .fetch_html(&url)
            .await
            .map_err(|e| NewsletterError::unavailable(&self.name, e))?;
        let headlines = self.extract_headlines(&html, &base);

        let mut articles = Vec::with_capacity(headlines.len());
        for (index, (title, link)) in headlines.into_iter().enumerate() {
            let mut content = title.clone();
            if index < self.follow_links {
                match self.extractor.fetch_article_text(link.as_str()).await {
                    Ok(Some(text)) => content = format!("{}\n{}", title, text.trim()),
                    Ok(None) => {}
                    Err(e) => debug!(source = %self.name, %link, error = %e, "Keeping headline only"),
                }
            }
            articles.push(Article::new(self.name.clone(), content).with_title(title).with_link(link));
        }

        Ok(articles)
    }
}

fn default_follow_links() -> usize {
    3
}

/// Declarative description of a source, as found in a sources file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSpec {
    Rss {
        name: String,
        url: String,
    },
    Html {
        name: String,
        url: String,
        selector: String,
        #[serde(default = "default_follow_links")]
        follow_links: usize,
    },
}

impl SourceSpec {
    fn rss(name: &str, url: &str) -> Self {
        SourceSpec::Rss {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    pub fn build(&self, client: &Client) -> Result<Box<dyn ContentSource>> {
        let source: Box<dyn ContentSource> = match self {
            SourceSpec::Rss { name, url } => Box::new(RssSource::new(name, url, client.clone())),
            SourceSpec::Html {
                name,
                url,
                selector,
                follow_links,
            } => Box::new(HtmlSource::new(
                name,
                url,
                selector,
                *follow_links,
                client.clone(),
            )?),
        };
        Ok(source)
    }
}

/// Which sources serve which category. Categories without an entry use the
/// topic-search sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<SourceSpec>>,
    #[serde(default)]
    pub search: Vec<SourceSpec>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            "AI".to_string(),
            vec![
                SourceSpec::rss(
                    "TechCrunch AI",
                    "https://techcrunch.com/category/artificial-intelligence/feed/",
                ),
                SourceSpec::rss(
                    "The Verge AI",
                    "https://www.theverge.com/rss/ai-artificial-intelligence/index.xml",
                ),
                SourceSpec::rss(
                    "Google News",
                    "https://news.google.com/rss/search?q={topic}&hl=en-US&gl=US&ceid=US:en",
                ),
            ],
        );
        categories.insert(
            "Technology".to_string(),
            vec![
                SourceSpec::Html {
                    name: "Hacker News".to_string(),
                    url: "https://news.ycombinator.com/".to_string(),
                    selector: ".titleline > a".to_string(),
                    follow_links: default_follow_links(),
                },
                SourceSpec::rss("Ars Technica", "https://feeds.arstechnica.com/arstechnica/index"),
            ],
        );
        categories.insert(
            "Startups".to_string(),
            vec![
                SourceSpec::rss("TechCrunch Startups", "https://techcrunch.com/category/startups/feed/"),
                SourceSpec::rss(
                    "Google News",
                    "https://news.google.com/rss/search?q={topic}&hl=en-US&gl=US&ceid=US:en",
                ),
            ],
        );

        Self {
            categories,
            search: vec![
                SourceSpec::rss(
                    "Google News",
                    "https://news.google.com/rss/search?q={topic}&hl=en-US&gl=US&ceid=US:en",
                ),
                SourceSpec::rss("Bing News", "https://www.bing.com/news/search?q={topic}&format=rss"),
            ],
        }
    }
}

impl SourcesConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NewsletterError::Configuration(format!(
                "Failed to read sources file {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            NewsletterError::Configuration(format!(
                "Failed to parse sources file {}: {}",
                path.display(),
                e
            ))
        })
    }
}

/// Fans a topic out over its sources and merges what comes back
pub struct SourceAggregator {
    categories: HashMap<String, Vec<Box<dyn ContentSource>>>,
    search: Vec<Box<dyn ContentSource>>,
    max_articles: usize,
    max_content_len: usize,
}

impl SourceAggregator {
    pub fn new(max_articles: usize) -> Self {
        Self {
            categories: HashMap::new(),
            search: Vec::new(),
            max_articles,
            max_content_len: DEFAULT_MAX_CONTENT_LEN,
        }
    }

    pub fn from_config(config: &SourcesConfig, client: &Client, max_articles: usize) -> Result<Self> {
        let mut aggregator = Self::new(max_articles);
        for (category, specs) in &config.categories {
            for spec in specs {
                aggregator = aggregator.with_category_source(category, spec.build(client)?);
            }
        }
        for spec in &config.search {
            aggregator = aggregator.with_search_source(spec.build(client)?);
        }
        Ok(aggregator)
    }

    pub fn with_category_source(mut self, category: &str, source: Box<dyn ContentSource>) -> Self {
        self.categories
            .entry(category.trim().to_lowercase())
            .or_default()
            .push(source);
        self
    }

    pub fn with_search_source(mut self, source: Box<dyn ContentSource>) -> Self {
        self.search.push(source);
        self
    }

    pub fn with_max_content_len(mut self, max_content_len: usize) -> Self {
        self.max_content_len = max_content_len;
        self
    }

    pub fn sources_for(&self, topic: &str) -> &[Box<dyn ContentSource>] {
        self.categories
            .get(&topic.trim().to_lowercase())
            .map(|sources| sources.as_slice())
            .unwrap_or(&self.search)
    }

    /// Collect articles for a topic. A source that fails is skipped; this
    /// never fails as a whole and may return an empty list.
    pub async fn aggregate(&self, topic: &str) -> Vec<Article> {
        let sources = self.sources_for(topic);
        let mut articles: Vec<Article> = Vec::new();
        let mut seen_links = HashSet::new();
        let mut failed = 0;

        for source in sources {
            if articles.len() >= self.max_articles {
                break;
            }

            match source.fetch(topic).await {
                Ok(batch) => {
                    debug!(source = source.name(), count = batch.len(), "Source fetched");
                    for mut article in batch {
                        if articles.len() >= self.max_articles {
                            break;
                        }
                        if let Some(link) = &article.link {
                            if !seen_links.insert(link.clone()) {
                                continue;
                            }
                        }
                        if article.content.len() > self.max_content_len {
                            article.content =
                                truncate_utf8(&article.content, self.max_content_len).to_string();
                        }
                        articles.push(article);
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!(source = source.name(), topic, error = %e, "Skipping unavailable source");
                }
            }
        }

        info!(
            topic,
            articles = articles.len(),
            sources = sources.len(),
            failed,
            "Aggregated articles"
        );
        articles
    }
}

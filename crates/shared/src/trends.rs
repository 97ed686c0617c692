use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::extractor::truncate_utf8;
use crate::models::{Article, TrendItem};
use crate::social::SocialPost;

pub const TRENDS_HEADER: &str = "TRENDS TO WATCH:";
const DEFAULT_MIN_MENTIONS: usize = 2;
const MIN_KEYWORD_LEN: usize = 3;
const MAX_TITLE_LEN: usize = 120;

const STOP_WORDS: &[&str] = &[
    "about", "according", "after", "again", "all", "also", "and", "any", "are", "because",
    "been", "before", "being", "between", "both", "but", "can", "could", "day", "did", "does",
    "doing", "down", "during", "each", "few", "first", "for", "from", "further", "get", "gets",
    "had", "has", "have", "having", "her", "here", "hers", "him", "his", "how", "into", "its",
    "just", "last", "like", "make", "makes", "more", "most", "new", "news", "not", "now", "off",
    "once", "one", "only", "other", "our", "out", "over", "own", "report", "reports", "said",
    "same", "says", "she", "should", "some", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "through", "today", "too", "two", "under",
    "until", "use", "using", "very", "via", "was", "way", "week", "were", "what", "when",
    "where", "which", "while", "who", "whom", "why", "will", "with", "would", "year", "years",
    "you", "your",
];

/// How strongly a term trends: breadth of coverage, then volume, then recency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rank {
    sources: usize,
    mentions: usize,
    latest: Option<DateTime<Utc>>,
}

impl Rank {
    /// Stronger ranks sort first
    fn priority(&self, other: &Rank) -> Ordering {
        other
            .sources
            .cmp(&self.sources)
            .then(other.mentions.cmp(&self.mentions))
            .then(other.latest.cmp(&self.latest))
    }
}

struct Candidate {
    trend: TrendItem,
    rank: Rank,
}

struct TermStats<'a> {
    term: String,
    hits: Vec<usize>,
    sources: BTreeSet<&'a str>,
    latest: Option<DateTime<Utc>>,
    order: usize,
}

impl TermStats<'_> {
    fn rank(&self) -> Rank {
        Rank {
            sources: self.sources.len(),
            mentions: self.hits.len(),
            latest: self.latest,
        }
    }
}

/// Picks out keywords that several articles (or social posts) keep coming back to
#[derive(Debug, Clone)]
pub struct TrendDetector {
    max_trends: usize,
    min_mentions: usize,
}

impl TrendDetector {
    pub fn new(max_trends: usize) -> Self {
        Self {
            max_trends,
            min_mentions: DEFAULT_MIN_MENTIONS,
        }
    }

    pub fn with_min_mentions(mut self, min_mentions: usize) -> Self {
        self.min_mentions = min_mentions.max(1);
        self
    }

    /// Rank trends for a topic. Words of the topic itself never trend. An
    /// empty result means nothing stood out.
    pub fn detect(&self, topic: &str, articles: &[Article], signals: &[SocialPost]) -> Vec<TrendItem> {
        if self.max_trends == 0 {
            return Vec::new();
        }

        let ignored: HashSet<String> = keywords(topic).collect();
        let mut picked = self.article_trends(articles, &ignored);
        picked.extend(self.social_trends(signals));

        // Stable, so full ties keep article order ahead of social order
        picked.sort_by(|a, b| a.rank.priority(&b.rank));
        picked.truncate(self.max_trends);

        debug!(topic, trends = picked.len(), "Detected trends");
        picked.into_iter().map(|c| c.trend).collect()
    }

    fn article_trends(&self, articles: &[Article], ignored: &HashSet<String>) -> Vec<Candidate> {
        let article_terms: Vec<HashSet<String>> = articles
            .iter()
            .map(|a| {
                let text = format!("{} {}", a.title.as_deref().unwrap_or(""), a.content);
                keywords(&text).collect()
            })
            .collect();

        // Only headline words are candidates; body words just add weight
        let mut order: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for article in articles {
            let headline = article
                .title
                .as_deref()
                .unwrap_or_else(|| article.content.lines().next().unwrap_or(""));
            for term in keywords(headline) {
                if !ignored.contains(&term) && seen.insert(term.clone()) {
                    order.push(term);
                }
            }
        }

        let mut stats: Vec<TermStats> = order
            .into_iter()
            .enumerate()
            .filter_map(|(position, term)| {
                let hits: Vec<usize> = article_terms
                    .iter()
                    .enumerate()
                    .filter(|(_, terms)| terms.contains(&term))
                    .map(|(i, _)| i)
                    .collect();
                if hits.len() < self.min_mentions {
                    return None;
                }
                Some(TermStats {
                    sources: hits.iter().map(|&i| articles[i].source.as_str()).collect(),
                    latest: hits.iter().filter_map(|&i| articles[i].published).max(),
                    term,
                    hits,
                    order: position,
                })
            })
            .collect();

        stats.sort_by(|a, b| a.rank().priority(&b.rank()).then(a.order.cmp(&b.order)));

        // Each trend points at its first linked article not already taken
        let mut used = HashSet::new();
        let mut picked = Vec::new();
        for stat in stats {
            if picked.len() >= self.max_trends {
                break;
            }
            let Some(&representative) = stat
                .hits
                .iter()
                .find(|&&i| articles[i].link.is_some() && !used.contains(&i))
            else {
                continue;
            };
            let article = &articles[representative];
            let Some(link) = article.link.clone() else {
                continue;
            };
            used.insert(representative);

            picked.push(Candidate {
                rank: stat.rank(),
                trend: TrendItem {
                    why: rationale(stat.hits.len(), &stat.sources),
                    topic: stat.term,
                    title: headline_of(article),
                    link,
                },
            });
        }
        picked
    }

    fn social_trends(&self, signals: &[SocialPost]) -> Vec<Candidate> {
        let mut groups: Vec<(&str, Vec<&SocialPost>)> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for post in signals {
            match index.get(post.term.as_str()) {
                Some(&i) => groups[i].1.push(post),
                None => {
                    index.insert(post.term.as_str(), groups.len());
                    groups.push((post.term.as_str(), vec![post]));
                }
            }
        }

        groups
            .into_iter()
            .filter(|(_, posts)| posts.len() >= self.min_mentions)
            .map(|(term, posts)| {
                let first = posts[0];
                Candidate {
                    trend: TrendItem {
                        topic: term.to_string(),
                        title: single_line(&first.text),
                        link: first.link.clone(),
                        why: format!("{} recent posts on X for {}", posts.len(), term),
                    },
                    // X counts as a single source; posts carry no timestamp
                    rank: Rank {
                        sources: 1,
                        mentions: posts.len(),
                        latest: None,
                    },
                }
            })
            .collect()
    }
}

fn keywords(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
}

fn rationale(mentions: usize, sources: &BTreeSet<&str>) -> String {
    let names = sources.iter().copied().collect::<Vec<_>>().join(", ");
    if sources.len() == 1 {
        format!("mentioned in {} articles from {}", mentions, names)
    } else {
        format!(
            "mentioned in {} articles across {} sources ({})",
            mentions,
            sources.len(),
            names
        )
    }
}

fn headline_of(article: &Article) -> String {
    match &article.title {
        Some(title) => single_line(title),
        None => single_line(article.content.lines().next().unwrap_or("")),
    }
}

fn single_line(text: &str) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.len() > MAX_TITLE_LEN {
        format!("{}...", truncate_utf8(&line, MAX_TITLE_LEN).trim_end())
    } else {
        line
    }
}

/// Capitalize the first letter of every word and lowercase the rest, where a
/// word is any run of alphabetic characters
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}

pub fn format_trend_line(trend: &TrendItem) -> String {
    format!(
        "- {}: {} ({}) — {}",
        title_case(&trend.topic),
        trend.title,
        trend.link,
        trend.why
    )
}

/// The plain-text trends block, or `None` when there is nothing to show
pub fn format_trends_block(trends: &[TrendItem]) -> Option<String> {
    if trends.is_empty() {
        return None;
    }
    let lines: Vec<String> = trends.iter().map(format_trend_line).collect();
    Some(format!("{}\n{}", TRENDS_HEADER, lines.join("\n")))
}

pub fn append_trends(draft: &str, trends: &[TrendItem]) -> String {
    match format_trends_block(trends) {
        Some(block) => format!("{}\n\n{}", draft, block),
        None => draft.to_string(),
    }
}

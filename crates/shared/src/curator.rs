use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{NewsletterError, Result};
use crate::llm::LanguageModel;
use crate::models::Article;

/// Style samples beyond this many are ignored
pub const MAX_STYLE_SAMPLES: usize = 5;
pub const STYLE_LABEL: &str = "STYLE_EXAMPLE:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    SubjectA,
    SubjectB,
    Summary,
    Learning,
    Action,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::SubjectA,
        Section::SubjectB,
        Section::Summary,
        Section::Learning,
        Section::Action,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Section::SubjectA => "SUBJECT_A",
            Section::SubjectB => "SUBJECT_B",
            Section::Summary => "SUMMARY",
            Section::Learning => "LEARNING",
            Section::Action => "ACTION",
        }
    }

    /// Only body sections can be regenerated on their own
    pub fn is_regenerable(&self) -> bool {
        matches!(self, Section::Summary | Section::Learning | Section::Action)
    }

    fn brief(&self) -> &'static str {
        match self {
            Section::SubjectA | Section::SubjectB => "a catchy subject line",
            Section::Summary => "a 3-paragraph summary of the most important developments",
            Section::Learning => "one key learning point",
            Section::Action => "one specific action item the reader can do today",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Section {
    type Err = NewsletterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().trim_end_matches(':').to_uppercase();
        Section::ALL
            .into_iter()
            .find(|section| section.label() == wanted)
            .ok_or_else(|| {
                NewsletterError::InvalidArgument(format!(
                    "unknown section '{}', expected one of SUMMARY, LEARNING, ACTION",
                    s
                ))
            })
    }
}

/// A parsed newsletter draft
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub subject_a: String,
    pub subject_b: String,
    pub summary: String,
    pub learning: String,
    pub action: String,
}

impl Draft {
    /// Parse a model response; every section must be present and non-empty.
    /// When a label repeats, the first non-empty occurrence wins.
    pub fn parse(text: &str) -> Result<Self> {
        let sections = split_sections(text);
        let take = |wanted: Section| -> Result<String> {
            sections
                .iter()
                .find(|(section, content)| *section == wanted && !content.is_empty())
                .map(|(_, content)| content.clone())
                .ok_or_else(|| {
                    NewsletterError::ModelInvocation(format!(
                        "model response is missing the {} section",
                        wanted
                    ))
                })
        };

        Ok(Self {
            subject_a: take(Section::SubjectA)?,
            subject_b: take(Section::SubjectB)?,
            summary: take(Section::Summary)?,
            learning: take(Section::Learning)?,
            action: take(Section::Action)?,
        })
    }
}

impl fmt::Display for Draft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SUBJECT_A: {}", self.subject_a)?;
        writeln!(f, "SUBJECT_B: {}", self.subject_b)?;
        writeln!(f)?;
        writeln!(f, "SUMMARY: {}", self.summary)?;
        writeln!(f)?;
        writeln!(f, "LEARNING: {}", self.learning)?;
        writeln!(f)?;
        write!(f, "ACTION: {}", self.action)
    }
}

fn is_decoration(c: char) -> bool {
    c == '*' || c == '_'
}

/// Drop a leading bullet (`-`, `*`, `•`) or number (`1.`, `2)`)
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim_start();
    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest;
        }
    }

    let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() < line.len() {
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest;
        }
    }
    line
}

/// Recognize a line opening a labeled section, tolerating markdown decoration
/// and list markers such as `**SUMMARY:**`, `## ACTION:`, `- LEARNING:` or
/// `1. SUBJECT_A:`
fn match_label(line: &str) -> Option<(Section, &str)> {
    let stripped = line.trim_start_matches(|c: char| c == '#' || c.is_whitespace());
    let stripped = strip_list_marker(stripped)
        .trim_start_matches(|c: char| c == '#' || is_decoration(c) || c.is_whitespace());
    Section::ALL.into_iter().find_map(|section| {
        let rest = stripped.strip_prefix(section.label())?;
        let rest = rest.trim_start_matches(is_decoration).strip_prefix(':')?;
        Some((section, rest.trim_start_matches(is_decoration).trim()))
    })
}

/// Locate `label` used as a label anywhere in `content`, decorated or not.
/// Returns where the label's decoration starts and where its text begins.
fn find_label(content: &str, section: Section) -> Option<(usize, usize)> {
    let label = section.label();
    content.match_indices(label).find_map(|(i, _)| {
        // Part of a longer word such as `COUNTER_ACTION`
        let mut before = content[..i].chars().rev();
        let glued = match before.next() {
            Some('_') => before.next().map_or(false, |c| c.is_alphanumeric()),
            Some(c) => c.is_alphanumeric(),
            None => false,
        };
        if glued {
            return None;
        }

        let after = &content[i + label.len()..];
        let decorated = after.trim_start_matches(is_decoration);
        let rest = decorated.strip_prefix(':')?;
        let text_start = content.len() - rest.trim_start_matches(is_decoration).len();

        let start = content[..i]
            .trim_end_matches(|c: char| {
                is_decoration(c) || c == '#' || c == '-' || c == '•' || c.is_whitespace()
            })
            .len();
        Some((start, text_start))
    })
}

fn split_sections(text: &str) -> Vec<(Section, String)> {
    let mut sections: Vec<(Section, Vec<&str>)> = Vec::new();
    for line in text.lines() {
        match match_label(line) {
            Some((section, rest)) => sections.push((section, vec![rest])),
            None => {
                if let Some((_, lines)) = sections.last_mut() {
                    lines.push(line.trim_end());
                }
            }
        }
    }

    sections
        .into_iter()
        .map(|(section, lines)| (section, lines.join("\n").trim().to_string()))
        .collect()
}

/// `Source: <source>\n<content>` blocks separated by blank lines, in order
pub fn compose_context(articles: &[Article]) -> String {
    articles
        .iter()
        .map(|a| format!("Source: {}\n{}", a.source, a.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Labeled style blocks for at most the first `MAX_STYLE_SAMPLES` samples
pub fn compose_style_block(samples: &[String]) -> Option<String> {
    let blocks: Vec<String> = samples
        .iter()
        .take(MAX_STYLE_SAMPLES)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| format!("{}\n{}", STYLE_LABEL, s))
        .collect();

    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}

fn style_section(samples: &[String], guidance: &str) -> String {
    match compose_style_block(samples) {
        Some(block) => format!("\n\n{}\n\nGuidance: {}", block, guidance),
        None => String::new(),
    }
}

pub fn build_curation_prompt(articles: &[Article], topics: &[String], samples: &[String]) -> String {
    format!(
        r#"You are an AI newsletter curator. Based on these articles about {topics}, create:

1. TWO catchy, distinct subject lines. Label them SUBJECT_A and SUBJECT_B.
2. A 3-paragraph summary of the most important developments
3. One key learning point
4. One action item the reader can do today

Articles:
{context}{style}

Format your response as:
SUBJECT_A: [subject A]
SUBJECT_B: [subject B]
SUMMARY: [3 paragraphs]
LEARNING: [key point]
ACTION: [one specific task]
"#,
        topics = topics.join(", "),
        context = compose_context(articles),
        style = style_section(
            samples,
            "If STYLE_EXAMPLE blocks are provided, match tone, cadence, and structure. \
            Keep the draft concise and scannable."
        ),
    )
}

pub fn build_section_prompt(
    articles: &[Article],
    topics: &[String],
    section: Section,
    samples: &[String],
) -> String {
    format!(
        r#"Regenerate ONLY the {label} for a newsletter about {topics}. It should be {brief}.

Articles:
{context}{style}

Respond with exactly one block labeled {label}: and nothing else.
"#,
        label = section.label(),
        topics = topics.join(", "),
        brief = section.brief(),
        context = compose_context(articles),
        style = style_section(
            samples,
            "Match tone, cadence, and structure of the STYLE_EXAMPLE blocks."
        ),
    )
}

/// Cut `content` at the first stray label belonging to another section
fn strip_foreign_labels(content: &str, keep: Section) -> &str {
    let cut = Section::ALL
        .into_iter()
        .filter(|s| *s != keep)
        .filter_map(|s| find_label(content, s).map(|(start, _)| start))
        .min()
        .unwrap_or(content.len());
    content[..cut].trim_end()
}

/// Extract a single section from a regeneration response
pub fn extract_section(text: &str, section: Section) -> Result<String> {
    let sections = split_sections(text);

    let content = if sections.is_empty() {
        // No line opens with a label; the block may still carry its own
        // label inline after some preamble
        match find_label(text, section) {
            Some((_, text_start)) => text[text_start..].trim().to_string(),
            None => text.trim().to_string(),
        }
    } else {
        sections
            .into_iter()
            .find(|(s, content)| *s == section && !content.is_empty())
            .map(|(_, content)| content)
            .ok_or_else(|| {
                NewsletterError::ModelInvocation(format!(
                    "model response has no {} block",
                    section
                ))
            })?
    };

    let content = strip_foreign_labels(&content, section).trim();
    if content.is_empty() {
        return Err(NewsletterError::ModelInvocation(format!(
            "model returned an empty {} block",
            section
        )));
    }

    Ok(format!("{}: {}", section.label(), content))
}

/// Builds prompts, calls the model, and parses what comes back
pub struct Curator {
    model: Box<dyn LanguageModel>,
    model_id: String,
}

impl Curator {
    pub fn new(model: Box<dyn LanguageModel>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Draft a full newsletter. Any model failure, including a response
    /// missing a section, fails the whole draft.
    pub async fn curate(
        &self,
        articles: &[Article],
        topics: &[String],
        samples: &[String],
    ) -> Result<Draft> {
        let prompt = build_curation_prompt(articles, topics, samples);
        info!(
            articles = articles.len(),
            style_samples = samples.len().min(MAX_STYLE_SAMPLES),
            model = %self.model_id,
            "Curating newsletter"
        );

        let response = self.model.complete(&self.model_id, &prompt).await?;
        Draft::parse(&response).map_err(|e| {
            warn!(error = %e, "Model output did not follow the section format");
            e
        })
    }

    /// Regenerate one body section; the result carries only that section's
    /// label and content
    pub async fn regenerate_section(
        &self,
        articles: &[Article],
        topics: &[String],
        section: Section,
        samples: &[String],
    ) -> Result<String> {
        if !section.is_regenerable() {
            return Err(NewsletterError::InvalidArgument(format!(
                "{} cannot be regenerated on its own; use SUMMARY, LEARNING or ACTION",
                section
            )));
        }

        let prompt = build_section_prompt(articles, topics, section, samples);
        info!(%section, model = %self.model_id, "Regenerating section");

        let response = self.model.complete(&self.model_id, &prompt).await?;
        extract_section(&response, section)
    }
}

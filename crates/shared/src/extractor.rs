use reqwest::Client;
use tracing::debug;

use crate::error::{NewsletterError, Result};

const MIN_TEXT_LEN: usize = 100;

/// Pulls readable text out of web pages
pub struct ContentExtractor {
    client: Client,
    width: usize,
}

impl ContentExtractor {
    pub fn new(client: Client) -> Self {
        Self { client, width: 100 }
    }

    /// Fetch a page as raw HTML
    pub async fn fetch_html(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NewsletterError::unavailable(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NewsletterError::unavailable(
                url,
                format!("HTTP error: {}", status),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| NewsletterError::unavailable(url, e))
    }

    /// Fetch a page and render it to plain text. Pages that refuse access or
    /// carry too little text yield `None`.
    pub async fn fetch_article_text(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NewsletterError::unavailable(url, e))?;

        let status = response.status();
        if status == 401 || status == 403 || status == 404 {
            debug!(url, %status, "Article not accessible");
            return Ok(None);
        }

        if !status.is_success() {
            return Err(NewsletterError::unavailable(
                url,
                format!("HTTP error: {}", status),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| NewsletterError::unavailable(url, e))?;

        Ok(self.html_to_text(&html))
    }

    pub fn html_to_text(&self, html: &str) -> Option<String> {
        let text = html2text::from_read(html.as_bytes(), self.width);

        if text.trim().is_empty() || text.len() < MIN_TEXT_LEN {
            return None;
        }

        Some(text)
    }
}

/// Render an HTML fragment (feed summaries) to a single line of text
pub fn fragment_to_text(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 10_000);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` bytes, respecting UTF-8 boundaries
pub fn truncate_utf8(content: &str, max: usize) -> &str {
    if content.len() <= max {
        return content;
    }
    let mut end = max;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

//! Destination visitor
//!
//! Fetches a URL payload's destination over HTTP with a bounded redirect
//! chain and an explicit timeout, extracts the page title and a short text
//! preview for the classifier, and snapshots the page body to disk. A
//! destination that answers with a non-success HTTP status is still a
//! successful visit (it answered); only transport failures and timeouts are
//! visit errors.

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum redirects to follow before giving up
const MAX_REDIRECTS: usize = 10;

/// Characters of tag-stripped body text kept as the classifier preview
const PREVIEW_LEN: usize = 500;

/// Visit errors; all of them are local to the analysis step
#[derive(Debug, Error)]
pub enum VisitError {
    #[error("Visit timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Outcome of a successful destination visit
#[derive(Debug, Clone)]
pub struct Visit {
    /// URL as visited (the payload)
    pub destination_url: String,
    /// URL after following redirects
    pub final_url: String,
    /// HTTP status the destination answered with
    pub status: u16,
    /// HTML `<title>` text when present
    pub title: Option<String>,
    /// Tag-stripped text preview of the page body
    pub preview: Option<String>,
    /// Saved page body path; None when the snapshot write failed
    pub snapshot_ref: Option<String>,
}

/// Destination visitor seam
#[async_trait]
pub trait DestinationVisitor: Send + Sync {
    async fn visit(&self, url: &str, context_id: Uuid) -> Result<Visit, VisitError>;
}

/// HTTP visitor backed by reqwest
pub struct HttpVisitor {
    client: Client,
    snapshots_dir: PathBuf,
}

impl HttpVisitor {
    pub fn new(snapshots_dir: PathBuf, timeout_seconds: u64, user_agent: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(user_agent)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            snapshots_dir,
        }
    }
}

#[async_trait]
impl DestinationVisitor for HttpVisitor {
    async fn visit(&self, url: &str, context_id: Uuid) -> Result<Visit, VisitError> {
        debug!(url = %url, context_id = %context_id, "Visiting destination");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                VisitError::Timeout
            } else {
                VisitError::Transport(e.to_string())
            }
        })?;

        let final_url = response.url().to_string();
        let status = response.status().as_u16();

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                VisitError::Timeout
            } else {
                VisitError::Transport(e.to_string())
            }
        })?;

        let title = extract_title(&body);
        let preview = text_preview(&body, PREVIEW_LEN);

        // Snapshot write failures degrade to no reference, never to a failed visit
        let snapshot_path = self.snapshots_dir.join(format!("{}.html", context_id));
        let snapshot_ref = match tokio::fs::write(&snapshot_path, &body).await {
            Ok(()) => Some(snapshot_path.display().to_string()),
            Err(e) => {
                warn!(path = %snapshot_path.display(), error = %e, "Failed to save page snapshot");
                None
            }
        };

        debug!(final_url = %final_url, status, "Visit complete");

        Ok(Visit {
            destination_url: url.to_string(),
            final_url,
            status,
            title,
            preview: if preview.is_empty() { None } else { Some(preview) },
            snapshot_ref,
        })
    }
}

/// Extract the `<title>` text from an HTML document, case-insensitively
pub fn extract_title(html: &str) -> Option<String> {
    let lowered = html.to_lowercase();
    let open = lowered.find("<title")?;
    let open_end = lowered[open..].find('>')? + open + 1;
    let close = lowered[open_end..].find("</title")? + open_end;

    let title = html[open_end..close].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Tag-stripped, whitespace-collapsed preview of an HTML body
pub fn text_preview(html: &str, limit: usize) -> String {
    let mut text = String::new();
    let mut in_tag = false;
    let mut last_was_space = true;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                // Tag boundaries separate words
                if !last_was_space {
                    text.push(' ');
                    last_was_space = true;
                }
            }
            _ if in_tag => {}
            c if c.is_whitespace() => {
                if !last_was_space {
                    text.push(' ');
                    last_was_space = true;
                }
            }
            c => {
                text.push(c);
                last_was_space = false;
            }
        }
        if text.chars().count() >= limit {
            break;
        }
    }

    text.trim().chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_extraction_is_case_insensitive() {
        assert_eq!(
            extract_title("<html><head><TITLE>Example Site</TITLE></head></html>"),
            Some("Example Site".to_string())
        );
        assert_eq!(
            extract_title("<title lang=\"en\">With Attributes</title>"),
            Some("With Attributes".to_string())
        );
    }

    #[test]
    fn missing_or_empty_title_is_none() {
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
        assert_eq!(extract_title("<title>   </title>"), None);
    }

    #[test]
    fn preview_strips_tags_and_collapses_whitespace() {
        let html = "<html><body><h1>Spring   Sale</h1>\n<p>Everything\tmust go</p></body></html>";
        assert_eq!(text_preview(html, 500), "Spring Sale Everything must go");
    }

    #[test]
    fn preview_respects_limit() {
        let html = format!("<p>{}</p>", "word ".repeat(300));
        let preview = text_preview(&html, 500);
        assert!(preview.chars().count() <= 500);
        assert!(preview.starts_with("word word"));
    }

    #[test]
    fn preview_of_tag_only_document_is_empty() {
        assert_eq!(text_preview("<html><head></head><body></body></html>", 500), "");
    }
}

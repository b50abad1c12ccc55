//! AI destination classifier
//!
//! Sends the visited destination (URL, title, text preview, advisory
//! warnings, and the saved page snapshot when it is an image) to the
//! Anthropic Messages API and parses the marker-line reply into a
//! `RawClassification`. The raw result then passes through the
//! classification policy; this module never derives flags itself.

use crate::services::policy::Category;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Anthropic Messages API endpoint
const MESSAGES_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Required API version header
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Timeout for classification requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Classifier errors; all of them are local to the classification step
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Raw classifier output before policy application
///
/// `category` is free text as returned; the policy coerces it into the
/// closed label set. A reply missing a confidence marker defaults to 0.5,
/// a missing malicious marker to false.
#[derive(Debug, Clone, PartialEq)]
pub struct RawClassification {
    pub category: String,
    pub confidence: f64,
    pub is_malicious: bool,
    pub reasoning: Option<String>,
}

/// Everything the classifier gets to see about one destination
#[derive(Debug, Clone)]
pub struct ClassificationRequest<'a> {
    pub url: &'a str,
    pub title: Option<&'a str>,
    pub preview: Option<&'a str>,
    pub screenshot_ref: Option<&'a str>,
    pub warnings: &'a [String],
}

/// Classifier seam
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<RawClassification, ClassifyError>;
}

/// Messages API response shapes (only the fields we read)
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic-backed classifier
pub struct ClaudeClassifier {
    http_client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeClassifier {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            api_key,
            model,
            max_tokens,
        }
    }

    fn build_content(&self, request: &ClassificationRequest<'_>) -> Vec<Value> {
        let mut content = Vec::new();

        // A snapshot is only attachable when it is an actual image file
        if let Some(block) = request.screenshot_ref.and_then(image_content_block) {
            content.push(block);
        }

        content.push(json!({
            "type": "text",
            "text": build_prompt(request),
        }));

        content
    }
}

#[async_trait]
impl Classifier for ClaudeClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<RawClassification, ClassifyError> {
        debug!(url = %request.url, model = %self.model, "Classifying destination");

        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": self.build_content(request),
            }],
        });

        let response = self
            .http_client
            .post(MESSAGES_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Api(status.as_u16(), body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Parse(e.to_string()))?;

        let text = parsed
            .content
            .iter()
            .find_map(|block| block.text.as_deref())
            .ok_or_else(|| ClassifyError::Parse("Reply carried no text content".to_string()))?;

        Ok(parse_reply(text))
    }
}

/// Build the classification prompt from the visit context
fn build_prompt(request: &ClassificationRequest<'_>) -> String {
    let mut prompt = String::from(
        "You are analyzing the destination of a QR code found posted in a public place.\n\
         Classify the destination's intent.\n\n",
    );

    prompt.push_str(&format!("URL: {}\n", request.url));
    if let Some(title) = request.title {
        prompt.push_str(&format!("Page title: {}\n", title));
    }
    if let Some(preview) = request.preview {
        prompt.push_str(&format!("Page text (first {} chars): {}\n", preview.len(), preview));
    }
    if !request.warnings.is_empty() {
        prompt.push_str("Advisory warnings from heuristic checks:\n");
        for warning in request.warnings {
            prompt.push_str(&format!("- {}\n", warning));
        }
    }

    prompt.push_str("\nCategories:\n");
    for category in Category::CHOICES {
        prompt.push_str(&format!("- {}: {}\n", category, category.description()));
    }

    prompt.push_str(
        "\nReply with exactly these four lines:\n\
         CATEGORY: one of the category names above\n\
         CONFIDENCE: a number between 0.0 and 1.0\n\
         MALICIOUS: true or false\n\
         REASONING: one sentence\n",
    );

    prompt
}

/// Attach the saved snapshot as a base64 image block when it is PNG/JPEG
fn image_content_block(screenshot_ref: &str) -> Option<Value> {
    let path = Path::new(screenshot_ref);
    let media_type = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => return None,
    };

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %screenshot_ref, error = %e, "Could not read screenshot for classification");
            return None;
        }
    };

    Some(json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": media_type,
            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }))
}

/// Parse the marker-line reply format
///
/// Missing markers degrade rather than fail: no category means `other`, no
/// confidence means 0.5, no malicious marker means false.
pub fn parse_reply(text: &str) -> RawClassification {
    let mut category = None;
    let mut confidence = None;
    let mut is_malicious = None;
    let mut reasoning = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("CATEGORY:") {
            category = Some(value.trim().to_lowercase());
        } else if let Some(value) = line.strip_prefix("CONFIDENCE:") {
            confidence = value.trim().parse::<f64>().ok();
        } else if let Some(value) = line.strip_prefix("MALICIOUS:") {
            is_malicious = Some(value.trim().eq_ignore_ascii_case("true"));
        } else if let Some(value) = line.strip_prefix("REASONING:") {
            reasoning = Some(value.trim().to_string());
        }
    }

    RawClassification {
        category: category.unwrap_or_else(|| "other".to_string()),
        confidence: confidence.unwrap_or(0.5),
        is_malicious: is_malicious.unwrap_or(false),
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reply_reads_all_markers() {
        let text = "CATEGORY: scam\nCONFIDENCE: 0.92\nMALICIOUS: true\nREASONING: Fake parking payment page.";
        let raw = parse_reply(text);
        assert_eq!(raw.category, "scam");
        assert_eq!(raw.confidence, 0.92);
        assert!(raw.is_malicious);
        assert_eq!(raw.reasoning.as_deref(), Some("Fake parking payment page."));
    }

    #[test]
    fn parse_reply_defaults_missing_markers() {
        let raw = parse_reply("The page looks like a restaurant menu.");
        assert_eq!(raw.category, "other");
        assert_eq!(raw.confidence, 0.5);
        assert!(!raw.is_malicious);
        assert!(raw.reasoning.is_none());
    }

    #[test]
    fn parse_reply_tolerates_surrounding_prose_and_case() {
        let text = "Here is my assessment:\n\n  CATEGORY: Promotional\nCONFIDENCE: not sure\nMALICIOUS: FALSE\n";
        let raw = parse_reply(text);
        assert_eq!(raw.category, "promotional");
        assert_eq!(raw.confidence, 0.5, "unparseable confidence defaults");
        assert!(!raw.is_malicious);
    }

    #[test]
    fn prompt_carries_context_and_warnings() {
        let warnings = vec!["URL contains suspicious keyword 'login'".to_string()];
        let request = ClassificationRequest {
            url: "https://example.tk/login",
            title: Some("Sign in"),
            preview: Some("Enter your account details"),
            screenshot_ref: None,
            warnings: &warnings,
        };

        let prompt = build_prompt(&request);
        assert!(prompt.contains("https://example.tk/login"));
        assert!(prompt.contains("Sign in"));
        assert!(prompt.contains("suspicious keyword"));
        assert!(prompt.contains("CATEGORY:"));
    }

    #[test]
    fn prompt_describes_every_category_choice() {
        let request = ClassificationRequest {
            url: "https://example.com",
            title: None,
            preview: None,
            screenshot_ref: None,
            warnings: &[],
        };

        let prompt = build_prompt(&request);
        for category in Category::CHOICES {
            let line = format!("- {}: {}", category, category.description());
            assert!(prompt.contains(&line), "missing guide line for {}", category);
        }
        assert!(!prompt.contains("- error:"));
    }

    #[test]
    fn non_image_snapshot_is_not_attached() {
        assert!(image_content_block("snapshots/page.html").is_none());
        assert!(image_content_block("snapshots/missing.png").is_none());
    }
}

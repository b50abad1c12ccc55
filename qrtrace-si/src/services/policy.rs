//! Analysis decision engine and classification policy
//!
//! Two pure policy pieces live here: the cost-control decision of whether a
//! submission warrants a destination visit, and the mapping from a raw
//! classifier reply to the stored verdict. Both tunables
//! (`skip_duplicate_analysis`, `review_confidence_threshold`) come from the
//! settings table so tests and operators can move them without code changes.

use qrtrace_common::db::settings::get_setting;
use qrtrace_common::Result;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::fmt;

use crate::services::classifier::RawClassification;

/// Default review threshold when the setting is absent
pub const DEFAULT_REVIEW_THRESHOLD: f64 = 0.7;

/// Neutral confidence for out-of-range or unparseable values
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Decide whether full analysis (visit + classification) should run
///
/// Debug mode overrides the duplicate check only: re-analysis is free to the
/// corpus because nothing is persisted. The URL-shape gate is absolute; a
/// payload that is not a well-formed URL never analyzes in any mode.
pub fn should_analyze(
    is_url: bool,
    is_duplicate: bool,
    skip_duplicates: bool,
    debug_mode: bool,
) -> bool {
    is_url && (debug_mode || !is_duplicate || !skip_duplicates)
}

/// Closed set of classification labels
///
/// Anything a classifier returns outside this set is coerced to `Other`.
/// `Error` is internal: it marks a failed classification call and is never
/// produced by coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Promotional,
    Informational,
    Business,
    Personal,
    Transactional,
    Social,
    Event,
    Scam,
    Malicious,
    ShortenedUrl,
    Other,
    Error,
}

impl Category {
    /// Labels the classifier may choose from, in prompt order
    ///
    /// Excludes `Error`, which only the failure path produces.
    pub const CHOICES: [Category; 11] = [
        Category::Promotional,
        Category::Informational,
        Category::Business,
        Category::Personal,
        Category::Transactional,
        Category::Social,
        Category::Event,
        Category::Scam,
        Category::Malicious,
        Category::ShortenedUrl,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Promotional => "promotional",
            Category::Informational => "informational",
            Category::Business => "business",
            Category::Personal => "personal",
            Category::Transactional => "transactional",
            Category::Social => "social",
            Category::Event => "event",
            Category::Scam => "scam",
            Category::Malicious => "malicious",
            Category::ShortenedUrl => "shortened_url",
            Category::Other => "other",
            Category::Error => "error",
        }
    }

    /// One-line description shown to the classifier for each choice
    pub fn description(&self) -> &'static str {
        match self {
            Category::Promotional => "Marketing, advertisements, product promotions",
            Category::Informational => "Educational content, documentation, information",
            Category::Business => "Business websites, company pages, contact info",
            Category::Personal => "Personal websites, social media profiles",
            Category::Transactional => "Payment links, shopping, e-commerce",
            Category::Social => "Social media links, sharing, engagement",
            Category::Event => "Event tickets, registrations, invitations",
            Category::Scam => "Suspicious phishing attempts, fake sites",
            Category::Malicious => "Known malware, dangerous sites",
            Category::ShortenedUrl => "URL shortener requiring investigation",
            Category::Other => "Does not fit other categories",
            Category::Error => "Classification failed",
        }
    }

    /// Exact parse of a stored or classifier-supplied label
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "promotional" => Some(Category::Promotional),
            "informational" => Some(Category::Informational),
            "business" => Some(Category::Business),
            "personal" => Some(Category::Personal),
            "transactional" => Some(Category::Transactional),
            "social" => Some(Category::Social),
            "event" => Some(Category::Event),
            "scam" => Some(Category::Scam),
            "malicious" => Some(Category::Malicious),
            "shortened_url" => Some(Category::ShortenedUrl),
            "other" => Some(Category::Other),
            "error" => Some(Category::Error),
            _ => None,
        }
    }

    /// Coerce a classifier-supplied label into the closed set
    ///
    /// Unknown labels become `Other`; so does a literal "error", which only
    /// the failure path may produce.
    pub fn coerce(s: &str) -> Self {
        match Category::parse(s) {
            Some(Category::Error) | None => Category::Other,
            Some(category) => category,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored classification verdict after policy application
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub category: Category,
    /// Always within [0.0, 1.0]
    pub confidence: f64,
    pub is_malicious: bool,
    /// Derived: true iff confidence < review threshold
    pub needs_review: bool,
}

/// Tunable analysis policy loaded from the settings table
#[derive(Debug, Clone)]
pub struct AnalysisPolicy {
    /// Skip the visit/classification for previously seen payloads
    pub skip_duplicate_analysis: bool,
    /// Confidence below this flags the record for manual review
    pub review_threshold: f64,
}

impl Default for AnalysisPolicy {
    fn default() -> Self {
        Self {
            skip_duplicate_analysis: true,
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
        }
    }
}

impl AnalysisPolicy {
    pub async fn load(db: &Pool<Sqlite>) -> Result<Self> {
        Ok(Self {
            skip_duplicate_analysis: get_setting(db, "skip_duplicate_analysis")
                .await?
                .unwrap_or(true),
            review_threshold: get_setting(db, "review_confidence_threshold")
                .await?
                .unwrap_or(DEFAULT_REVIEW_THRESHOLD),
        })
    }

    /// Map a raw classifier reply into the stored verdict
    ///
    /// Category coerces into the closed set, confidence coerces to the
    /// neutral default when out of range, and the review flag derives fresh
    /// from the coerced confidence.
    pub fn apply_classification(&self, raw: &RawClassification) -> Verdict {
        let category = Category::coerce(&raw.category);
        let confidence = if raw.confidence.is_finite() && (0.0..=1.0).contains(&raw.confidence) {
            raw.confidence
        } else {
            NEUTRAL_CONFIDENCE
        };

        Verdict {
            category,
            confidence,
            is_malicious: raw.is_malicious,
            needs_review: self.needs_review(confidence),
        }
    }

    /// Verdict for a classification call that failed entirely
    pub fn failure_verdict(&self) -> Verdict {
        Verdict {
            category: Category::Error,
            confidence: 0.0,
            is_malicious: false,
            needs_review: self.needs_review(0.0),
        }
    }

    /// Review derivation, re-applied whenever confidence changes
    pub fn needs_review(&self, confidence: f64) -> bool {
        confidence < self.review_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(category: &str, confidence: f64, is_malicious: bool) -> RawClassification {
        RawClassification {
            category: category.to_string(),
            confidence,
            is_malicious,
            reasoning: None,
        }
    }

    #[test]
    fn decision_engine_truth_table() {
        // (is_url, is_duplicate, skip_duplicates, debug_mode) -> expected
        let cases = [
            (false, false, false, false, false),
            (false, false, false, true, false),
            (false, false, true, false, false),
            (false, false, true, true, false),
            (false, true, false, false, false),
            (false, true, false, true, false),
            (false, true, true, false, false),
            (false, true, true, true, false),
            (true, false, false, false, true),
            (true, false, false, true, true),
            (true, false, true, false, true),
            (true, false, true, true, true),
            (true, true, false, false, true),
            (true, true, false, true, true),
            (true, true, true, false, false),
            (true, true, true, true, true),
        ];

        for (is_url, is_duplicate, skip, debug, expected) in cases {
            assert_eq!(
                should_analyze(is_url, is_duplicate, skip, debug),
                expected,
                "is_url={} is_duplicate={} skip={} debug={}",
                is_url,
                is_duplicate,
                skip,
                debug
            );
        }
    }

    #[test]
    fn review_flag_boundary_is_inclusive_on_non_review_side() {
        let policy = AnalysisPolicy::default();
        assert!(policy.needs_review(0.69));
        assert!(!policy.needs_review(0.70));
        assert!(!policy.needs_review(0.71));
    }

    #[test]
    fn unknown_category_coerces_to_other() {
        let policy = AnalysisPolicy::default();
        let verdict = policy.apply_classification(&raw("clickbait", 0.9, false));
        assert_eq!(verdict.category, Category::Other);
        assert_eq!(verdict.confidence, 0.9);
        assert!(!verdict.is_malicious);
        assert!(!verdict.needs_review);
    }

    #[test]
    fn error_label_never_produced_by_coercion() {
        assert_eq!(Category::coerce("error"), Category::Other);
        assert_eq!(Category::parse("error"), Some(Category::Error));
    }

    #[test]
    fn known_categories_pass_through() {
        let policy = AnalysisPolicy::default();
        let verdict = policy.apply_classification(&raw("Scam", 0.95, true));
        assert_eq!(verdict.category, Category::Scam);
        assert!(verdict.is_malicious);

        let verdict = policy.apply_classification(&raw("shortened_url", 0.8, false));
        assert_eq!(verdict.category, Category::ShortenedUrl);
    }

    #[test]
    fn out_of_range_confidence_coerces_to_neutral() {
        let policy = AnalysisPolicy::default();

        let verdict = policy.apply_classification(&raw("promotional", 1.5, false));
        assert_eq!(verdict.confidence, NEUTRAL_CONFIDENCE);
        assert!(verdict.needs_review, "0.5 is below the default threshold");

        let verdict = policy.apply_classification(&raw("promotional", -0.1, false));
        assert_eq!(verdict.confidence, NEUTRAL_CONFIDENCE);

        let verdict = policy.apply_classification(&raw("promotional", f64::NAN, false));
        assert_eq!(verdict.confidence, NEUTRAL_CONFIDENCE);
    }

    #[test]
    fn failure_verdict_flags_review() {
        let policy = AnalysisPolicy::default();
        let verdict = policy.failure_verdict();
        assert_eq!(verdict.category, Category::Error);
        assert_eq!(verdict.confidence, 0.0);
        assert!(!verdict.is_malicious);
        assert!(verdict.needs_review);
    }

    #[test]
    fn review_threshold_is_tunable() {
        let policy = AnalysisPolicy {
            skip_duplicate_analysis: true,
            review_threshold: 0.5,
        };
        let verdict = policy.apply_classification(&raw("business", 0.6, false));
        assert!(!verdict.needs_review);
    }

    #[tokio::test]
    async fn policy_loads_from_settings_table() {
        let pool = sqlx::SqlitePool::connect(":memory:").await.unwrap();
        qrtrace_common::db::init::create_settings_table(&pool).await.unwrap();
        qrtrace_common::db::settings::set_setting(&pool, "skip_duplicate_analysis", false)
            .await
            .unwrap();
        qrtrace_common::db::settings::set_setting(&pool, "review_confidence_threshold", 0.9)
            .await
            .unwrap();

        let policy = AnalysisPolicy::load(&pool).await.unwrap();
        assert!(!policy.skip_duplicate_analysis);
        assert_eq!(policy.review_threshold, 0.9);
    }

    #[tokio::test]
    async fn policy_defaults_when_settings_absent() {
        let pool = sqlx::SqlitePool::connect(":memory:").await.unwrap();
        qrtrace_common::db::init::create_settings_table(&pool).await.unwrap();

        let policy = AnalysisPolicy::load(&pool).await.unwrap();
        assert!(policy.skip_duplicate_analysis);
        assert_eq!(policy.review_threshold, DEFAULT_REVIEW_THRESHOLD);
    }
}

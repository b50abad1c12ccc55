//! Submission pipeline integration tests
//!
//! Exercises the orchestrator end to end against an in-memory database and
//! fake collaborators for the decoder, visitor, and classifier.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use qrtrace_common::db::init::{create_tables, init_default_settings};
use qrtrace_common::db::models::{Channel, GeoPoint};
use qrtrace_common::db::settings::set_setting;
use sqlx::SqlitePool;
use uuid::Uuid;

use qrtrace_si::db::{FingerprintStore, SightingLog};
use qrtrace_si::models::{Submission, VisitOutcome};
use qrtrace_si::services::classifier::{
    ClassificationRequest, Classifier, ClassifyError, RawClassification,
};
use qrtrace_si::services::image_decoder::{
    CaptureMetadata, DecodeError, DecodedImage, ImageDecoder,
};
use qrtrace_si::services::pipeline::{PipelineError, SubmissionPipeline};
use qrtrace_si::services::responder;
use qrtrace_si::services::visitor::{DestinationVisitor, Visit, VisitError};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Decoder returning fixed payloads and metadata
struct FakeDecoder {
    payloads: Vec<String>,
    metadata: CaptureMetadata,
}

impl FakeDecoder {
    fn with_payload(payload: &str) -> Self {
        Self {
            payloads: vec![payload.to_string()],
            metadata: CaptureMetadata::default(),
        }
    }

    fn empty() -> Self {
        Self {
            payloads: Vec::new(),
            metadata: CaptureMetadata::default(),
        }
    }
}

impl ImageDecoder for FakeDecoder {
    fn decode(&self, _image: &[u8]) -> Result<DecodedImage, DecodeError> {
        Ok(DecodedImage {
            payloads: self.payloads.clone(),
            metadata: self.metadata.clone(),
        })
    }
}

enum VisitBehavior {
    Succeed {
        final_url: String,
        title: Option<String>,
    },
    Timeout,
}

/// Visitor with scripted behavior and a call counter
struct FakeVisitor {
    behavior: VisitBehavior,
    calls: AtomicUsize,
}

impl FakeVisitor {
    fn succeeding(final_url: &str, title: Option<&str>) -> Self {
        Self {
            behavior: VisitBehavior::Succeed {
                final_url: final_url.to_string(),
                title: title.map(|t| t.to_string()),
            },
            calls: AtomicUsize::new(0),
        }
    }

    fn timing_out() -> Self {
        Self {
            behavior: VisitBehavior::Timeout,
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationVisitor for FakeVisitor {
    async fn visit(&self, url: &str, context_id: Uuid) -> Result<Visit, VisitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            VisitBehavior::Succeed { final_url, title } => Ok(Visit {
                destination_url: url.to_string(),
                final_url: final_url.clone(),
                status: 200,
                title: title.clone(),
                preview: Some("page text".to_string()),
                snapshot_ref: Some(format!("snapshots/{}.html", context_id)),
            }),
            VisitBehavior::Timeout => Err(VisitError::Timeout),
        }
    }
}

/// Classifier returning a scripted reply, counting invocations
struct FakeClassifier {
    reply: Result<RawClassification, ()>,
    calls: AtomicUsize,
}

impl FakeClassifier {
    fn replying(category: &str, confidence: f64, is_malicious: bool) -> Self {
        Self {
            reply: Ok(RawClassification {
                category: category.to_string(),
                confidence,
                is_malicious,
                reasoning: Some("test".to_string()),
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            reply: Err(()),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(
        &self,
        _request: &ClassificationRequest<'_>,
    ) -> Result<RawClassification, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Ok(raw) => Ok(raw.clone()),
            Err(()) => Err(ClassifyError::Network("connection refused".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    create_tables(&pool).await.unwrap();
    init_default_settings(&pool).await.unwrap();
    pool
}

fn submission(debug_mode: bool) -> Submission {
    Submission::new(
        b"fake image bytes".to_vec(),
        "images/test.jpg".to_string(),
        "+15555550123".to_string(),
        Channel::Sms,
        debug_mode,
    )
}

fn pipeline(
    pool: &SqlitePool,
    decoder: Arc<dyn ImageDecoder>,
    visitor: Arc<dyn DestinationVisitor>,
    classifier: Option<Arc<dyn Classifier>>,
) -> SubmissionPipeline {
    SubmissionPipeline::new(pool.clone(), decoder, visitor, classifier)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// TC-PL-001: First sighting of a URL payload runs the full pipeline
#[tokio::test]
async fn tc_pl_001_first_url_sighting_visits_and_classifies() {
    // Given: an unseen URL payload, a working visitor, and a classifier
    let pool = test_pool().await;
    let visitor = Arc::new(FakeVisitor::succeeding(
        "https://landing.example/offer",
        Some("Big Offer"),
    ));
    let classifier = Arc::new(FakeClassifier::replying("promotional", 0.85, false));
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("https://short.example/x")),
        visitor.clone(),
        Some(classifier.clone()),
    );

    // When: the submission is processed
    let report = pipeline.process(submission(false)).await.unwrap();

    // Then: the report carries the full outcome
    assert!(!report.is_duplicate);
    assert!(report.sighting_id.is_some());
    assert_eq!(report.visit, VisitOutcome::Succeeded);
    let verdict = report.classification.as_ref().unwrap();
    assert_eq!(verdict.category.as_str(), "promotional");
    assert_eq!(verdict.confidence, 0.85);
    assert!(!verdict.needs_review, "0.85 is above the review threshold");

    // And: the record was persisted with destination and verdict fields
    let store = FingerprintStore::new(pool.clone());
    let stored = store.get(&report.record.fingerprint).await.unwrap().unwrap();
    assert_eq!(stored.sighting_count, 1);
    assert_eq!(stored.destination_url.as_deref(), Some("https://short.example/x"));
    assert_eq!(stored.final_url.as_deref(), Some("https://landing.example/offer"));
    assert_eq!(stored.site_title.as_deref(), Some("Big Offer"));
    assert_eq!(stored.classification.as_deref(), Some("promotional"));
    assert_eq!(stored.needs_review, Some(false));

    // And: one sighting exists, with the screenshot attached
    let log = SightingLog::new(pool.clone());
    assert_eq!(log.count_for_fingerprint(stored.id).await.unwrap(), 1);
    let screenshot: Option<String> =
        sqlx::query_scalar("SELECT screenshot_ref FROM qr_sightings LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(screenshot.unwrap().starts_with("snapshots/"));

    assert_eq!(visitor.call_count(), 1);
    assert_eq!(classifier.call_count(), 1);
}

/// TC-PL-002: Repeat submissions deduplicate and skip re-analysis
#[tokio::test]
async fn tc_pl_002_duplicates_increment_count_and_skip_analysis() {
    // Given: the default skip-duplicates policy
    let pool = test_pool().await;
    let visitor = Arc::new(FakeVisitor::succeeding("https://example.com", None));
    let classifier = Arc::new(FakeClassifier::replying("business", 0.9, false));
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("https://example.com")),
        visitor.clone(),
        Some(classifier.clone()),
    );

    // When: the same payload arrives three times
    let first = pipeline.process(submission(false)).await.unwrap();
    let second = pipeline.process(submission(false)).await.unwrap();
    let third = pipeline.process(submission(false)).await.unwrap();

    // Then: one record, counted sightings, duplicate flags after the first
    assert!(!first.is_duplicate);
    assert!(second.is_duplicate);
    assert!(third.is_duplicate);
    assert_eq!(third.record.sighting_count, 3);
    assert_eq!(third.record.id, first.record.id);

    // And: only the first submission analyzed
    assert_eq!(visitor.call_count(), 1);
    assert_eq!(classifier.call_count(), 1);
    assert_eq!(second.visit, VisitOutcome::Skipped);
    assert!(second.classification.is_none());
}

/// TC-PL-003: Disabling the skip policy re-analyzes duplicates
#[tokio::test]
async fn tc_pl_003_skip_policy_disabled_reanalyzes_duplicates() {
    // Given: skip_duplicate_analysis turned off by the operator
    let pool = test_pool().await;
    set_setting(&pool, "skip_duplicate_analysis", false).await.unwrap();
    let visitor = Arc::new(FakeVisitor::succeeding("https://example.com", None));
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("https://example.com")),
        visitor.clone(),
        None,
    );

    // When: the same payload arrives twice
    pipeline.process(submission(false)).await.unwrap();
    let second = pipeline.process(submission(false)).await.unwrap();

    // Then: the duplicate still visits
    assert!(second.is_duplicate);
    assert_eq!(second.visit, VisitOutcome::Succeeded);
    assert_eq!(visitor.call_count(), 2);
}

/// TC-PL-004: Non-URL payloads never analyze
#[tokio::test]
async fn tc_pl_004_non_url_payload_skips_analysis() {
    // Given: a tel: payload
    let pool = test_pool().await;
    let visitor = Arc::new(FakeVisitor::succeeding("https://unused.example", None));
    let classifier = Arc::new(FakeClassifier::replying("other", 0.9, false));
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("tel:+15555550100")),
        visitor.clone(),
        Some(classifier.clone()),
    );

    // When: processed, even in debug mode
    let normal = pipeline.process(submission(false)).await.unwrap();
    let debug = pipeline.process(submission(true)).await.unwrap();

    // Then: no visit and no classification in either mode
    assert_eq!(normal.visit, VisitOutcome::Skipped);
    assert_eq!(debug.visit, VisitOutcome::Skipped);
    assert_eq!(visitor.call_count(), 0);
    assert_eq!(classifier.call_count(), 0);

    // And: the sighting was still recorded in persistent mode
    assert!(normal.sighting_id.is_some());
    assert_eq!(normal.record.sighting_count, 1);
}

/// TC-PL-005: Debug mode mutates nothing but produces the same report shape
#[tokio::test]
async fn tc_pl_005_debug_mode_does_not_mutate_storage() {
    // Given: an unseen URL payload and a debug submission
    let pool = test_pool().await;
    let visitor = Arc::new(FakeVisitor::succeeding("https://example.com/landing", Some("T")));
    let classifier = Arc::new(FakeClassifier::replying("scam", 0.95, true));
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("https://example.com")),
        visitor.clone(),
        Some(classifier.clone()),
    );

    // When: processed in debug mode
    let report = pipeline.process(submission(true)).await.unwrap();

    // Then: the full analysis ran
    assert!(report.debug_mode);
    assert_eq!(report.visit, VisitOutcome::Succeeded);
    assert_eq!(report.record.classification.as_deref(), Some("scam"));
    assert_eq!(report.record.is_malicious, Some(true));
    assert_eq!(classifier.call_count(), 1);

    // And: no sighting reference, and both tables stayed empty
    assert!(report.sighting_id.is_none());
    let codes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM qr_codes")
        .fetch_one(&pool)
        .await
        .unwrap();
    let sightings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM qr_sightings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(codes, 0);
    assert_eq!(sightings, 0);
}

/// TC-PL-006: Debug mode observes duplicate status read-only
#[tokio::test]
async fn tc_pl_006_debug_mode_sees_duplicates_without_incrementing() {
    // Given: a payload already recorded persistently
    let pool = test_pool().await;
    let visitor = Arc::new(FakeVisitor::succeeding("https://example.com", None));
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("https://example.com")),
        visitor.clone(),
        None,
    );
    pipeline.process(submission(false)).await.unwrap();

    // When: the same payload arrives in debug mode
    let report = pipeline.process(submission(true)).await.unwrap();

    // Then: reported as duplicate, analysis re-ran (debug overrides the
    // duplicate skip), and the stored count did not move
    assert!(report.is_duplicate);
    assert_eq!(report.visit, VisitOutcome::Succeeded);
    assert_eq!(visitor.call_count(), 2);
    let count: i64 = sqlx::query_scalar("SELECT sighting_count FROM qr_codes")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

/// TC-PL-007: A failed visit degrades gracefully
#[tokio::test]
async fn tc_pl_007_visit_timeout_degrades_without_classification() {
    // Given: a visitor that times out and a configured classifier
    let pool = test_pool().await;
    let classifier = Arc::new(FakeClassifier::replying("business", 0.9, false));
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("https://slow.example")),
        Arc::new(FakeVisitor::timing_out()),
        Some(classifier.clone()),
    );

    // When: the submission is processed
    let report = pipeline.process(submission(false)).await.unwrap();

    // Then: the submission completes with a failed visit and no classification
    assert!(matches!(report.visit, VisitOutcome::Failed { .. }));
    assert!(report.classification.is_none());
    assert_eq!(classifier.call_count(), 0, "classifier must not run after a failed visit");

    // And: records persisted with destination fields left untouched
    let stored = FingerprintStore::new(pool.clone())
        .get(&report.record.fingerprint)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.destination_url.is_none());
    assert!(stored.classification.is_none());
    assert_eq!(stored.sighting_count, 1);
}

/// TC-PL-008: Unknown classifier category coerces to other
#[tokio::test]
async fn tc_pl_008_unknown_category_coerces_to_other() {
    // Given: a classifier replying with a label outside the closed set
    let pool = test_pool().await;
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("https://example.com")),
        Arc::new(FakeVisitor::succeeding("https://example.com", None)),
        Some(Arc::new(FakeClassifier::replying("clickbait", 0.8, false))),
    );

    // When: the submission is processed
    let report = pipeline.process(submission(false)).await.unwrap();

    // Then: the stored category is the fallback, other fields unaffected
    let verdict = report.classification.unwrap();
    assert_eq!(verdict.category.as_str(), "other");
    assert_eq!(verdict.confidence, 0.8);
    assert!(!verdict.is_malicious);
    let stored: Option<String> = sqlx::query_scalar("SELECT classification FROM qr_codes")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored.as_deref(), Some("other"));
}

/// TC-PL-009: Classification failure coerces to the error verdict
#[tokio::test]
async fn tc_pl_009_classifier_failure_does_not_abort() {
    // Given: a classifier whose transport always fails
    let pool = test_pool().await;
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("https://example.com")),
        Arc::new(FakeVisitor::succeeding("https://example.com", None)),
        Some(Arc::new(FakeClassifier::failing())),
    );

    // When: the submission is processed
    let report = pipeline.process(submission(false)).await.unwrap();

    // Then: the pipeline completes with the neutral error verdict
    let verdict = report.classification.unwrap();
    assert_eq!(verdict.category.as_str(), "error");
    assert_eq!(verdict.confidence, 0.0);
    assert!(!verdict.is_malicious);
    assert!(verdict.needs_review);
    assert_eq!(report.visit, VisitOutcome::Succeeded);
}

/// TC-PL-010: No classifier configured is a valid operating mode
#[tokio::test]
async fn tc_pl_010_unconfigured_classifier_skips_classification() {
    // Given: a pipeline without a classifier
    let pool = test_pool().await;
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("https://example.com")),
        Arc::new(FakeVisitor::succeeding("https://example.com", Some("Home"))),
        None,
    );

    // When: the submission is processed
    let report = pipeline.process(submission(false)).await.unwrap();

    // Then: the visit completed and classification fields stayed null
    assert_eq!(report.visit, VisitOutcome::Succeeded);
    assert!(report.classification.is_none());
    assert_eq!(report.record.site_title.as_deref(), Some("Home"));
    let stored: Option<String> = sqlx::query_scalar("SELECT classification FROM qr_codes")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(stored.is_none());
}

/// TC-PL-011: An image with no QR code is a decode failure
#[tokio::test]
async fn tc_pl_011_empty_decode_is_a_decode_error() {
    // Given: a decoder finding zero payloads
    let pool = test_pool().await;
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::empty()),
        Arc::new(FakeVisitor::timing_out()),
        None,
    );

    // When: the submission is processed
    let result = pipeline.process(submission(false)).await;

    // Then: a decode error, and nothing was written
    assert!(matches!(result, Err(PipelineError::Decode(_))));
    let codes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM qr_codes")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(codes, 0);
}

/// TC-PL-012: Capture metadata flows into the sighting
#[tokio::test]
async fn tc_pl_012_capture_metadata_reaches_the_sighting() {
    // Given: a decoder producing a geotag and device label
    let pool = test_pool().await;
    let decoder = FakeDecoder {
        payloads: vec!["tel:+15555550100".to_string()],
        metadata: CaptureMetadata {
            location: Some(GeoPoint {
                latitude: 40.7128,
                longitude: -74.006,
                source: "gps".to_string(),
            }),
            captured_at: None,
            device_label: Some("Apple iPhone 12".to_string()),
        },
    };
    let pipeline = pipeline(
        &pool,
        Arc::new(decoder),
        Arc::new(FakeVisitor::timing_out()),
        None,
    );

    // When: the submission is processed
    let report = pipeline.process(submission(false)).await.unwrap();

    // Then: the report and the stored sighting carry the location
    assert_eq!(report.location.as_ref().unwrap().latitude, 40.7128);
    let (latitude, device): (Option<f64>, Option<String>) =
        sqlx::query_as("SELECT latitude, device_label FROM qr_sightings LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(latitude, Some(40.7128));
    assert_eq!(device.as_deref(), Some("Apple iPhone 12"));
}

/// TC-PL-013: A skipped duplicate's reply still warns about the stored verdict
#[tokio::test]
async fn tc_pl_013_duplicate_reply_surfaces_stored_verdict() {
    // Given: a payload already classified as malicious on its first sighting
    let pool = test_pool().await;
    let visitor = Arc::new(FakeVisitor::succeeding("https://evil.example/payload", None));
    let classifier = Arc::new(FakeClassifier::replying("malicious", 0.95, true));
    let pipeline = pipeline(
        &pool,
        Arc::new(FakeDecoder::with_payload("https://evil.example")),
        visitor,
        Some(classifier),
    );
    pipeline.process(submission(false)).await.unwrap();

    // When: the same payload arrives again under the skip-duplicates policy
    let second = pipeline.process(submission(false)).await.unwrap();

    // Then: analysis was skipped but the reply still carries the verdict
    assert!(second.is_duplicate);
    assert!(second.classification.is_none());
    let reply = responder::format_reply(&second);
    assert!(reply.contains("Category: malicious (95% confidence)"));
    assert!(reply.contains("WARNING"));
}

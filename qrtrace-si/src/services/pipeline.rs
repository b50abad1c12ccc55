//! Submission processing pipeline
//!
//! The orchestrator behind every submission: decode, fingerprint, record the
//! sighting, decide whether analysis is warranted, visit the destination,
//! classify, and assemble the report. Collaborators arrive as injected
//! dependencies so the whole pipeline runs against fakes in tests.
//!
//! Debug mode walks the identical decision and classification path but
//! touches no storage: the fingerprint store is consulted read-only and the
//! record is an in-memory placeholder with the same shape as a persisted row.

use qrtrace_common::db::models::FingerprintRecord;
use qrtrace_common::fingerprint::fingerprint;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::sightings::SightingMetadata;
use crate::db::{FingerprintStore, SightingLog};
use crate::models::{Submission, SubmissionReport, SubmissionStage, VisitOutcome};
use crate::services::classifier::{ClassificationRequest, Classifier};
use crate::services::image_decoder::ImageDecoder;
use crate::services::policy::{should_analyze, AnalysisPolicy, Verdict};
use crate::services::safety;
use crate::services::visitor::DestinationVisitor;

/// Failures that abort a submission
///
/// Everything else (visit failure, classification failure) degrades into a
/// completed report with partial data.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No payload found or image unreadable; user-facing "no QR code found"
    #[error("No QR code found: {0}")]
    Decode(String),

    /// Fingerprint or sighting persistence failed
    #[error("Storage error: {0}")]
    Storage(#[from] qrtrace_common::Error),
}

/// The submission orchestrator
pub struct SubmissionPipeline {
    db: Pool<Sqlite>,
    fingerprints: FingerprintStore,
    sightings: SightingLog,
    decoder: Arc<dyn ImageDecoder>,
    visitor: Arc<dyn DestinationVisitor>,
    /// None when no classifier is configured; the step is skipped entirely
    classifier: Option<Arc<dyn Classifier>>,
}

impl SubmissionPipeline {
    pub fn new(
        db: Pool<Sqlite>,
        decoder: Arc<dyn ImageDecoder>,
        visitor: Arc<dyn DestinationVisitor>,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> Self {
        Self {
            fingerprints: FingerprintStore::new(db.clone()),
            sightings: SightingLog::new(db.clone()),
            db,
            decoder,
            visitor,
            classifier,
        }
    }

    /// Process one submission to completion
    pub async fn process(&self, submission: Submission) -> Result<SubmissionReport, PipelineError> {
        let submission_id = submission.id;
        self.trace_stage(submission_id, SubmissionStage::Received);

        // Decode image and capture metadata
        let decoded = self
            .decoder
            .decode(&submission.image)
            .map_err(|e| PipelineError::Decode(e.to_string()))?;

        let payload = match decoded.payloads.first() {
            Some(payload) => payload.clone(),
            None => {
                return Err(PipelineError::Decode(
                    "no QR code in image".to_string(),
                ))
            }
        };
        if decoded.payloads.len() > 1 {
            // Documented limitation: only the first payload is processed
            warn!(
                submission_id = %submission_id,
                extra = decoded.payloads.len() - 1,
                "Image contained multiple QR codes; processing the first only"
            );
        }

        let policy = AnalysisPolicy::load(&self.db).await?;

        // Fingerprint resolution; in debug mode the store is read-only
        let (mut record, is_duplicate) = if submission.debug_mode {
            match self.fingerprints.get(&fingerprint(&payload)).await? {
                Some(existing) => (existing, true),
                None => (FingerprintRecord::ephemeral(&payload), false),
            }
        } else {
            let (record, is_new) = self.fingerprints.resolve(&payload).await?;
            (record, !is_new)
        };
        self.trace_stage(submission_id, SubmissionStage::Fingerprinted);

        // Sighting append; simulated in debug mode
        let sighting_id = if submission.debug_mode {
            info!(submission_id = %submission_id, "Debug mode: sighting not recorded");
            None
        } else {
            let sighting = self
                .sightings
                .append(
                    record.id,
                    SightingMetadata {
                        location: decoded.metadata.location.clone(),
                        captured_at: decoded
                            .metadata
                            .captured_at
                            .unwrap_or(submission.received_at),
                        image_ref: submission.image_ref.clone(),
                        device_label: decoded.metadata.device_label.clone(),
                        submitter_ref: submission.submitter_ref.clone(),
                        channel: submission.channel,
                    },
                )
                .await?;
            Some(sighting.id)
        };
        self.trace_stage(submission_id, SubmissionStage::SightingRecorded);

        // Analysis decision
        let is_url = safety::is_url_payload(&payload);
        let analyze = should_analyze(
            is_url,
            is_duplicate,
            policy.skip_duplicate_analysis,
            submission.debug_mode,
        );

        let (visit_outcome, classification) = if analyze {
            self.trace_stage(submission_id, SubmissionStage::Analyzing);
            self.analyze(
                &submission,
                &mut record,
                sighting_id,
                &payload,
                &policy,
            )
            .await?
        } else {
            self.trace_stage(submission_id, SubmissionStage::AnalysisSkipped);
            (VisitOutcome::Skipped, None)
        };

        self.trace_stage(submission_id, SubmissionStage::Complete);

        Ok(SubmissionReport {
            submission_id,
            record,
            is_duplicate,
            sighting_id,
            location: decoded.metadata.location,
            visit: visit_outcome,
            classification,
            debug_mode: submission.debug_mode,
        })
    }

    /// Visit the destination and, when configured, classify it
    ///
    /// Visit and classification failures degrade; only the write-backs to the
    /// fingerprint record can abort with a StorageError.
    async fn analyze(
        &self,
        submission: &Submission,
        record: &mut FingerprintRecord,
        sighting_id: Option<uuid::Uuid>,
        url: &str,
        policy: &AnalysisPolicy,
    ) -> Result<(VisitOutcome, Option<Verdict>), PipelineError> {
        let warnings = safety::safety_warnings(url);
        if !warnings.is_empty() {
            info!(
                submission_id = %submission.id,
                warnings = warnings.len(),
                "Advisory safety warnings raised; visiting anyway"
            );
        }

        let visit = match self.visitor.visit(url, submission.id).await {
            Ok(visit) => visit,
            Err(e) => {
                self.trace_stage(submission.id, SubmissionStage::AnalysisFailed);
                warn!(submission_id = %submission.id, error = %e, "Destination visit failed");
                return Ok((
                    VisitOutcome::Failed {
                        error: e.to_string(),
                    },
                    None,
                ));
            }
        };
        self.trace_stage(submission.id, SubmissionStage::AnalysisSucceeded);

        // Destination fields go onto the shared record shape in both modes;
        // only persistent mode writes them back to storage
        record.destination_url = Some(visit.destination_url.clone());
        record.final_url = Some(visit.final_url.clone());
        record.site_title = visit.title.clone();
        if !submission.debug_mode {
            self.fingerprints
                .record_visit(
                    record.id,
                    &visit.destination_url,
                    Some(visit.final_url.as_str()),
                    visit.title.as_deref(),
                )
                .await?;

            if let (Some(sighting_id), Some(snapshot_ref)) = (sighting_id, &visit.snapshot_ref) {
                self.sightings.attach_screenshot(sighting_id, snapshot_ref).await;
            }
        }

        let Some(classifier) = &self.classifier else {
            // Not configured is a valid operating mode, not an error
            return Ok((VisitOutcome::Succeeded, None));
        };

        let request = ClassificationRequest {
            url,
            title: visit.title.as_deref(),
            preview: visit.preview.as_deref(),
            screenshot_ref: visit.snapshot_ref.as_deref(),
            warnings: &warnings,
        };

        let verdict = match classifier.classify(&request).await {
            Ok(raw) => policy.apply_classification(&raw),
            Err(e) => {
                warn!(submission_id = %submission.id, error = %e, "Classification failed");
                policy.failure_verdict()
            }
        };
        self.trace_stage(submission.id, SubmissionStage::Classified);

        record.classification = Some(verdict.category.as_str().to_string());
        record.confidence = Some(verdict.confidence);
        record.is_malicious = Some(verdict.is_malicious);
        record.needs_review = Some(verdict.needs_review);
        if !submission.debug_mode {
            self.fingerprints
                .record_verdict(
                    record.id,
                    verdict.category.as_str(),
                    verdict.confidence,
                    verdict.is_malicious,
                    verdict.needs_review,
                )
                .await?;
        }

        Ok((VisitOutcome::Succeeded, Some(verdict)))
    }

    fn trace_stage(&self, submission_id: uuid::Uuid, stage: SubmissionStage) {
        info!(submission_id = %submission_id, stage = %stage, "Submission stage");
    }
}

//! Submission lifecycle models
//!
//! A `Submission` is one raw photograph arriving over a channel. The
//! pipeline walks it through the `SubmissionStage` state machine and returns
//! a `SubmissionReport`, the single result shape the reply formatter and any
//! other consumer read from without re-deriving anything.

use chrono::{DateTime, Utc};
use qrtrace_common::db::models::{Channel, FingerprintRecord, GeoPoint};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// One raw submission as received from the ingress channel
#[derive(Debug, Clone)]
pub struct Submission {
    /// Submission identity, used as the context id for artifacts
    pub id: Uuid,
    /// Raw image bytes as downloaded from the channel
    pub image: Vec<u8>,
    /// Where the image bytes were stored (path under the images directory)
    pub image_ref: String,
    /// Channel-specific submitter identity (phone number for SMS)
    pub submitter_ref: String,
    pub channel: Channel,
    /// Transport receipt time; capture-time fallback
    pub received_at: DateTime<Utc>,
    /// Dry-run mode: full analysis, no persistent mutation
    pub debug_mode: bool,
}

impl Submission {
    pub fn new(
        image: Vec<u8>,
        image_ref: String,
        submitter_ref: String,
        channel: Channel,
        debug_mode: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            image,
            image_ref,
            submitter_ref,
            channel,
            received_at: Utc::now(),
            debug_mode,
        }
    }
}

/// Pipeline stages for one submission
///
/// `Received → Fingerprinted → SightingRecorded →
/// {AnalysisSkipped | Analyzing → {AnalysisSucceeded | AnalysisFailed}} →
/// Classified(optional) → Complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStage {
    Received,
    Fingerprinted,
    SightingRecorded,
    AnalysisSkipped,
    Analyzing,
    AnalysisSucceeded,
    AnalysisFailed,
    Classified,
    Complete,
}

impl SubmissionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStage::Received => "received",
            SubmissionStage::Fingerprinted => "fingerprinted",
            SubmissionStage::SightingRecorded => "sighting_recorded",
            SubmissionStage::AnalysisSkipped => "analysis_skipped",
            SubmissionStage::Analyzing => "analyzing",
            SubmissionStage::AnalysisSucceeded => "analysis_succeeded",
            SubmissionStage::AnalysisFailed => "analysis_failed",
            SubmissionStage::Classified => "classified",
            SubmissionStage::Complete => "complete",
        }
    }
}

impl fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the destination-visit step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum VisitOutcome {
    /// Decision engine declined analysis, or payload is not URL-shaped
    Skipped,
    /// Destination answered; destination fields are on the record
    Succeeded,
    /// Visit failed (timeout, transport error); submission still completes
    Failed { error: String },
}

impl VisitOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, VisitOutcome::Succeeded)
    }
}

/// Terminal result of one submission
///
/// Populated identically in persistent and debug mode; only `sighting_id`
/// and the record's provenance differ. Carries everything a result consumer
/// needs to format a reply.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub submission_id: Uuid,
    /// Fingerprint record: a persisted row, or an ephemeral placeholder in
    /// debug mode, with destination/classification fields filled in either way
    pub record: FingerprintRecord,
    /// True when this payload had been seen before this submission
    pub is_duplicate: bool,
    /// Recorded sighting; None in debug mode
    pub sighting_id: Option<Uuid>,
    /// Capture location for this sighting, when the photo carried a geotag
    pub location: Option<GeoPoint>,
    pub visit: VisitOutcome,
    /// Classification verdict; None when skipped, unconfigured, or the visit
    /// did not succeed
    pub classification: Option<crate::services::policy::Verdict>,
    pub debug_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(SubmissionStage::Received.to_string(), "received");
        assert_eq!(SubmissionStage::AnalysisSkipped.to_string(), "analysis_skipped");
        assert_eq!(SubmissionStage::Complete.to_string(), "complete");
    }

    #[test]
    fn visit_outcome_succeeded_flag() {
        assert!(VisitOutcome::Succeeded.succeeded());
        assert!(!VisitOutcome::Skipped.succeeded());
        assert!(!VisitOutcome::Failed { error: "timeout".into() }.succeeded());
    }
}

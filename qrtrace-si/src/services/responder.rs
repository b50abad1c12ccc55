//! Reply formatting
//!
//! Pure functions mapping a submission report to the human-readable SMS
//! reply. Everything printed here comes straight off the report; nothing is
//! re-derived from storage.

use crate::models::{SubmissionReport, VisitOutcome};
use crate::services::policy::{Category, Verdict};

/// Longest payload excerpt shown in a reply
const PAYLOAD_PREVIEW_LEN: usize = 80;

/// Longest site title shown in a reply
const TITLE_PREVIEW_LEN: usize = 60;

/// Format the outcome of a processed submission
pub fn format_reply(report: &SubmissionReport) -> String {
    let mut lines = Vec::new();

    if report.debug_mode {
        lines.push("[debug mode: nothing was recorded]".to_string());
    }

    if report.is_duplicate {
        lines.push("This QR code has been reported before.".to_string());
    } else {
        lines.push("New QR code recorded. Thanks for the report!".to_string());
    }

    lines.push(format!(
        "Content: {}",
        truncate(&report.record.payload, PAYLOAD_PREVIEW_LEN)
    ));

    // Destination info comes off the record, so a duplicate whose analysis
    // was skipped still shows what the earlier visit found
    match &report.visit {
        VisitOutcome::Failed { error } => {
            lines.push(format!("Could not reach the destination ({}).", error));
        }
        VisitOutcome::Succeeded | VisitOutcome::Skipped => {
            if let (Some(destination), Some(final_url)) =
                (&report.record.destination_url, &report.record.final_url)
            {
                if destination != final_url {
                    lines.push(format!("Redirects to: {}", final_url));
                }
            }
            if let Some(title) = &report.record.site_title {
                lines.push(format!("Site: {}", truncate(title, TITLE_PREVIEW_LEN)));
            }
        }
    }

    if let Some(verdict) = effective_verdict(report) {
        match verdict.category {
            Category::Error => {
                lines.push("Classification was unavailable for this destination.".to_string());
            }
            category => {
                lines.push(format!(
                    "Category: {} ({:.0}% confidence)",
                    category,
                    verdict.confidence * 100.0
                ));
            }
        }
        if verdict.is_malicious {
            lines.push("WARNING: this destination looks malicious. Do not scan it.".to_string());
        } else if verdict.needs_review {
            lines.push("Flagged for manual review.".to_string());
        }
    }

    if let Some(location) = &report.location {
        lines.push(format!(
            "Location: {:.6}, {:.6}",
            location.latitude, location.longitude
        ));
    }

    // The count only means something when the run actually recorded
    if !report.debug_mode {
        lines.push(format!("Total sightings: {}", report.record.sighting_count));
    }

    lines.join("\n")
}

/// Reply for a submission with no decodable QR code
pub fn format_no_qr_reply() -> String {
    "No QR code found in that photo. Try a sharper shot with the full code in frame.".to_string()
}

/// Reply for a submission that failed to persist
pub fn format_failure_reply() -> String {
    "Something went wrong processing your report. Please try again later.".to_string()
}

/// Verdict to show in the reply
///
/// A run that analyzed the payload carries a fresh verdict on the report.
/// When analysis was skipped (duplicate under the skip policy) the record
/// still holds the verdict from the earlier pass, and the submitter gets
/// the same category and malicious warning either way.
fn effective_verdict(report: &SubmissionReport) -> Option<Verdict> {
    if let Some(verdict) = &report.classification {
        return Some(verdict.clone());
    }
    let stored = report.record.classification.as_deref()?;
    Some(Verdict {
        category: Category::parse(stored).unwrap_or(Category::Other),
        confidence: report.record.confidence.unwrap_or(0.0),
        is_malicious: report.record.is_malicious.unwrap_or(false),
        needs_review: report.record.needs_review.unwrap_or(false),
    })
}

/// Char-safe truncation with an ellipsis
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", head)
}

//! Shared record models
//!
//! One `FingerprintRecord` exists per unique QR payload; one `Sighting` is
//! appended per physical submission event. Both shapes are used verbatim by
//! persistent rows and by debug-mode placeholders, so downstream logic never
//! branches on where a record came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Submission channel for a sighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Other,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Other => "other",
        }
    }

    /// Parse a stored channel value; unknown values map to `Other`
    pub fn parse(s: &str) -> Self {
        match s {
            "sms" => Channel::Sms,
            _ => Channel::Other,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a sighting's coordinates came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy source label, e.g. "gps" for EXIF geotags
    pub source: String,
}

/// Canonical record for one unique QR payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// Opaque identity, assigned on creation, immutable
    pub id: Uuid,
    /// SHA-256 digest of the payload; unique across records
    pub fingerprint: String,
    /// Raw decoded text content, immutable once created
    pub payload: String,
    /// Timestamp of the first sighting, immutable
    pub first_seen: DateTime<Utc>,
    /// Number of sightings referencing this record (>= 1 when persisted)
    pub sighting_count: i64,
    /// Populated by the first successful destination visit
    pub destination_url: Option<String>,
    pub final_url: Option<String>,
    pub site_title: Option<String>,
    /// Populated by classification; null until a classification pass runs
    pub classification: Option<String>,
    pub confidence: Option<f64>,
    pub is_malicious: Option<bool>,
    pub needs_review: Option<bool>,
}

impl FingerprintRecord {
    /// Transient record for debug-mode runs
    ///
    /// Carries the same field shape as a persisted row so the pipeline and
    /// result consumers treat both identically. `sighting_count` is 0: the
    /// run records nothing, and reply formatting only reports counts for
    /// persisted records.
    pub fn ephemeral(payload: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint: crate::fingerprint::fingerprint(payload),
            payload: payload.to_string(),
            first_seen: Utc::now(),
            sighting_count: 0,
            destination_url: None,
            final_url: None,
            site_title: None,
            classification: None,
            confidence: None,
            is_malicious: None,
            needs_review: None,
        }
    }
}

/// One physical submission event of a QR code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sighting {
    pub id: Uuid,
    /// Owning fingerprint record; many sightings share one fingerprint
    pub fingerprint_id: Uuid,
    pub location: Option<GeoPoint>,
    /// Capture time from EXIF, or submission receipt time when unavailable
    pub captured_at: DateTime<Utc>,
    /// Reference to the stored submission image (path, not bytes)
    pub image_ref: String,
    pub device_label: Option<String>,
    /// Channel-specific submitter identity (e.g. phone number)
    pub submitter_ref: String,
    pub channel: Channel,
    /// Attached after a successful destination visit; otherwise null
    pub screenshot_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

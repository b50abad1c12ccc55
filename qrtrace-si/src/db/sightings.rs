//! Sighting log
//!
//! Append-only record of each physical submission event, one row per
//! submission, linked to its owning fingerprint record. Rows are never
//! mutated after insert except to attach a screenshot reference once a
//! destination visit completes.

use chrono::{DateTime, Utc};
use qrtrace_common::db::models::{Channel, GeoPoint, Sighting};
use qrtrace_common::Result;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;
use tracing::warn;

/// Capture metadata for one sighting, as extracted from the submission
#[derive(Debug, Clone)]
pub struct SightingMetadata {
    pub location: Option<GeoPoint>,
    pub captured_at: DateTime<Utc>,
    pub image_ref: String,
    pub device_label: Option<String>,
    pub submitter_ref: String,
    pub channel: Channel,
}

/// Sighting log backed by the shared SQLite pool
#[derive(Clone)]
pub struct SightingLog {
    db: Pool<Sqlite>,
}

impl SightingLog {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Append one sighting. Pure insert, no read-modify-write.
    pub async fn append(
        &self,
        fingerprint_id: Uuid,
        metadata: SightingMetadata,
    ) -> Result<Sighting> {
        let sighting = Sighting {
            id: Uuid::new_v4(),
            fingerprint_id,
            location: metadata.location,
            captured_at: metadata.captured_at,
            image_ref: metadata.image_ref,
            device_label: metadata.device_label,
            submitter_ref: metadata.submitter_ref,
            channel: metadata.channel,
            screenshot_ref: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO qr_sightings
                (guid, qr_code_id, latitude, longitude, location_source,
                 captured_at, image_ref, device_label, submitter_ref, channel)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sighting.id.to_string())
        .bind(fingerprint_id.to_string())
        .bind(sighting.location.as_ref().map(|l| l.latitude))
        .bind(sighting.location.as_ref().map(|l| l.longitude))
        .bind(sighting.location.as_ref().map(|l| l.source.as_str()))
        .bind(sighting.captured_at.to_rfc3339())
        .bind(&sighting.image_ref)
        .bind(sighting.device_label.as_deref())
        .bind(&sighting.submitter_ref)
        .bind(sighting.channel.as_str())
        .execute(&self.db)
        .await?;

        Ok(sighting)
    }

    /// Attach a screenshot reference to a sighting after a visit completes
    ///
    /// Idempotent, last write wins. Failures are logged and swallowed: the
    /// primary fingerprint and sighting writes have already succeeded, and a
    /// missing screenshot reference must not fail the submission.
    pub async fn attach_screenshot(&self, sighting_id: Uuid, screenshot_ref: &str) {
        let result = sqlx::query("UPDATE qr_sightings SET screenshot_ref = ? WHERE guid = ?")
            .bind(screenshot_ref)
            .bind(sighting_id.to_string())
            .execute(&self.db)
            .await;

        if let Err(e) = result {
            warn!(
                sighting_id = %sighting_id,
                error = %e,
                "Failed to attach screenshot reference; continuing"
            );
        }
    }

    /// Number of sightings recorded for a fingerprint
    pub async fn count_for_fingerprint(&self, fingerprint_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM qr_sightings WHERE qr_code_id = ?")
                .bind(fingerprint_id.to_string())
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }
}

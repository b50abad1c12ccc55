//! Content fingerprint store
//!
//! Owns the `qr_codes` table: one row per unique payload, keyed by its
//! SHA-256 fingerprint. `resolve` is the deduplication hot path; the
//! increment-or-create is a single unique-constraint-guarded upsert so two
//! concurrent first sightings of the same payload can never produce two rows.

use chrono::{DateTime, Utc};
use qrtrace_common::db::models::FingerprintRecord;
use qrtrace_common::fingerprint::fingerprint;
use qrtrace_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

/// Fingerprint store backed by the shared SQLite pool
#[derive(Clone)]
pub struct FingerprintStore {
    db: Pool<Sqlite>,
}

impl FingerprintStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Resolve a payload to its canonical record
    ///
    /// Returns `(record, is_new)`. An existing record has its
    /// `sighting_count` incremented atomically; a new record starts at 1.
    pub async fn resolve(&self, payload: &str) -> Result<(FingerprintRecord, bool)> {
        let fp = fingerprint(payload);
        let guid = Uuid::new_v4();
        let first_seen = Utc::now();

        // Single transactional upsert: the UNIQUE constraint on fingerprint
        // arbitrates concurrent first sightings of the same payload
        let row = sqlx::query(
            r#"
            INSERT INTO qr_codes (guid, fingerprint, payload, first_seen, sighting_count)
            VALUES (?, ?, ?, ?, 1)
            ON CONFLICT(fingerprint) DO UPDATE SET
                sighting_count = sighting_count + 1,
                updated_at = CURRENT_TIMESTAMP
            RETURNING guid, fingerprint, payload, first_seen, sighting_count,
                      destination_url, final_url, site_title,
                      classification, confidence, is_malicious, needs_review
            "#,
        )
        .bind(guid.to_string())
        .bind(&fp)
        .bind(payload)
        .bind(first_seen.to_rfc3339())
        .fetch_one(&self.db)
        .await?;

        let record = row_to_record(&row)?;
        let is_new = record.id == guid;

        tracing::debug!(
            fingerprint = %&fp[..12],
            sighting_count = record.sighting_count,
            is_new,
            "Resolved payload fingerprint"
        );

        Ok((record, is_new))
    }

    /// Look up a record by fingerprint without touching the sighting count
    ///
    /// Debug-mode submissions use this to observe duplicate status read-only.
    pub async fn get(&self, fp: &str) -> Result<Option<FingerprintRecord>> {
        let row = sqlx::query(
            r#"
            SELECT guid, fingerprint, payload, first_seen, sighting_count,
                   destination_url, final_url, site_title,
                   classification, confidence, is_malicious, needs_review
            FROM qr_codes
            WHERE fingerprint = ?
            "#,
        )
        .bind(fp)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Write destination fields after a successful visit
    pub async fn record_visit(
        &self,
        id: Uuid,
        destination_url: &str,
        final_url: Option<&str>,
        site_title: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE qr_codes
            SET destination_url = ?, final_url = ?, site_title = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE guid = ?
            "#,
        )
        .bind(destination_url)
        .bind(final_url)
        .bind(site_title)
        .bind(id.to_string())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Write classification fields after policy application
    pub async fn record_verdict(
        &self,
        id: Uuid,
        category: &str,
        confidence: f64,
        is_malicious: bool,
        needs_review: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE qr_codes
            SET classification = ?, confidence = ?, is_malicious = ?, needs_review = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE guid = ?
            "#,
        )
        .bind(category)
        .bind(confidence)
        .bind(is_malicious)
        .bind(needs_review)
        .bind(id.to_string())
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

/// Map a qr_codes row into the shared record model
fn row_to_record(row: &SqliteRow) -> Result<FingerprintRecord> {
    let guid_str: String = row.get("guid");
    let id = Uuid::parse_str(&guid_str)
        .map_err(|e| Error::Internal(format!("Invalid guid in qr_codes: {}", e)))?;

    let first_seen_str: String = row.get("first_seen");
    let first_seen = DateTime::parse_from_rfc3339(&first_seen_str)
        .map_err(|e| Error::Internal(format!("Invalid first_seen in qr_codes: {}", e)))?
        .with_timezone(&Utc);

    Ok(FingerprintRecord {
        id,
        fingerprint: row.get("fingerprint"),
        payload: row.get("payload"),
        first_seen,
        sighting_count: row.get("sighting_count"),
        destination_url: row.get("destination_url"),
        final_url: row.get("final_url"),
        site_title: row.get("site_title"),
        classification: row.get("classification"),
        confidence: row.get("confidence"),
        is_malicious: row.get::<Option<i64>, _>("is_malicious").map(|v| v != 0),
        needs_review: row.get::<Option<i64>, _>("needs_review").map(|v| v != 0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrtrace_common::db::init::create_tables;
    use sqlx::SqlitePool;

    async fn setup_store() -> FingerprintStore {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_tables(&pool).await.unwrap();
        FingerprintStore::new(pool)
    }

    #[tokio::test]
    async fn first_resolve_creates_record_with_count_one() {
        let store = setup_store().await;

        let (record, is_new) = store.resolve("https://example.com").await.unwrap();

        assert!(is_new);
        assert_eq!(record.sighting_count, 1);
        assert_eq!(record.payload, "https://example.com");
        assert_eq!(record.fingerprint, fingerprint("https://example.com"));
        assert!(record.destination_url.is_none());
        assert!(record.classification.is_none());
    }

    #[tokio::test]
    async fn repeated_resolve_increments_count_on_one_record() {
        let store = setup_store().await;

        let (first, _) = store.resolve("https://example.com").await.unwrap();
        for n in 2..=5 {
            let (record, is_new) = store.resolve("https://example.com").await.unwrap();
            assert!(!is_new, "only the first resolve may report a new record");
            assert_eq!(record.sighting_count, n);
            assert_eq!(record.id, first.id);
        }
    }

    #[tokio::test]
    async fn distinct_payloads_get_distinct_records() {
        let store = setup_store().await;

        let (a, a_new) = store.resolve("https://example.com/a").await.unwrap();
        let (b, b_new) = store.resolve("https://example.com/b").await.unwrap();

        assert!(a_new && b_new);
        assert_ne!(a.id, b.id);
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[tokio::test]
    async fn get_does_not_touch_sighting_count() {
        let store = setup_store().await;
        let (record, _) = store.resolve("tel:+15555550100").await.unwrap();

        let fetched = store.get(&record.fingerprint).await.unwrap().unwrap();
        assert_eq!(fetched.sighting_count, 1);
        assert_eq!(fetched.id, record.id);

        assert!(store.get("0".repeat(64).as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_visit_and_verdict_round_trip() {
        let store = setup_store().await;
        let (record, _) = store.resolve("https://example.com").await.unwrap();

        store
            .record_visit(
                record.id,
                "https://example.com",
                Some("https://example.com/landing"),
                Some("Example"),
            )
            .await
            .unwrap();
        store
            .record_verdict(record.id, "promotional", 0.85, false, false)
            .await
            .unwrap();

        let updated = store.get(&record.fingerprint).await.unwrap().unwrap();
        assert_eq!(updated.destination_url.as_deref(), Some("https://example.com"));
        assert_eq!(updated.final_url.as_deref(), Some("https://example.com/landing"));
        assert_eq!(updated.site_title.as_deref(), Some("Example"));
        assert_eq!(updated.classification.as_deref(), Some("promotional"));
        assert_eq!(updated.confidence, Some(0.85));
        assert_eq!(updated.is_malicious, Some(false));
        assert_eq!(updated.needs_review, Some(false));
    }
}

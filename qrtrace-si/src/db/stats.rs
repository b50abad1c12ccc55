//! Corpus statistics for the health endpoint

use qrtrace_common::Result;
use serde::Serialize;
use sqlx::{Pool, Sqlite};

/// Aggregate statistics over the fingerprint and sighting tables
#[derive(Debug, Clone, Serialize)]
pub struct CorpusStats {
    /// Unique QR payloads seen
    pub unique_codes: i64,
    /// Total physical sightings recorded
    pub total_sightings: i64,
    /// Fingerprints classified as malicious
    pub malicious_count: i64,
    /// Fingerprints flagged for manual review
    pub review_queue: i64,
}

pub async fn corpus_stats(db: &Pool<Sqlite>) -> Result<CorpusStats> {
    let unique_codes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM qr_codes")
        .fetch_one(db)
        .await?;
    let total_sightings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM qr_sightings")
        .fetch_one(db)
        .await?;
    let malicious_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM qr_codes WHERE is_malicious = 1")
            .fetch_one(db)
            .await?;
    let review_queue: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM qr_codes WHERE needs_review = 1")
            .fetch_one(db)
            .await?;

    Ok(CorpusStats {
        unique_codes,
        total_sightings,
        malicious_count,
        review_queue,
    })
}

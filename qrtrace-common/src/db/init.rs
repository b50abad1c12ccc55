//! Database initialization
//!
//! Creates the QRTrace schema idempotently on startup and seeds default
//! values for every tunable setting, so the service starts with zero manual
//! database preparation.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use sqlite options to create database if it doesn't exist
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL mode: concurrent readers with one writer, needed because the
    // webhook acknowledges while spawned submissions are still writing
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Set busy timeout
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_tables(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create all QRTrace tables and indexes (idempotent)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_qr_codes_table(pool).await?;
    create_qr_sightings_table(pool).await?;
    Ok(())
}

pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per unique QR payload, keyed by content fingerprint
pub async fn create_qr_codes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qr_codes (
            guid TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL UNIQUE CHECK (length(fingerprint) = 64),
            payload TEXT NOT NULL,
            first_seen TEXT NOT NULL,
            sighting_count INTEGER NOT NULL DEFAULT 1 CHECK (sighting_count >= 1),
            destination_url TEXT,
            final_url TEXT,
            site_title TEXT,
            classification TEXT,
            confidence REAL CHECK (confidence IS NULL OR (confidence >= 0.0 AND confidence <= 1.0)),
            is_malicious INTEGER,
            needs_review INTEGER,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_qr_codes_fingerprint ON qr_codes(fingerprint)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_qr_codes_needs_review ON qr_codes(needs_review)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Append-only log of physical submission events, one per submission
pub async fn create_qr_sightings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qr_sightings (
            guid TEXT PRIMARY KEY,
            qr_code_id TEXT NOT NULL REFERENCES qr_codes(guid) ON DELETE CASCADE,
            latitude REAL,
            longitude REAL,
            location_source TEXT,
            captured_at TEXT NOT NULL,
            image_ref TEXT NOT NULL,
            device_label TEXT,
            submitter_ref TEXT NOT NULL,
            channel TEXT NOT NULL DEFAULT 'sms' CHECK (channel IN ('sms', 'other')),
            screenshot_ref TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_qr_sightings_code ON qr_sightings(qr_code_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all tunable settings exist with default values. Existing values
/// are never overwritten; NULL values are reset to the default.
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Classification policy
    ensure_setting(pool, "review_confidence_threshold", "0.7").await?;
    ensure_setting(pool, "skip_duplicate_analysis", "true").await?;

    // Destination visitor
    ensure_setting(pool, "visit_timeout_seconds", "30").await?;
    ensure_setting(
        pool,
        "visit_user_agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    )
    .await?;

    // Classifier
    ensure_setting(pool, "classifier_model", "claude-3-5-sonnet-20241022").await?;
    ensure_setting(pool, "classifier_max_tokens", "1024").await?;

    // HTTP server
    ensure_setting(pool, "http_port", "5740").await?;

    Ok(())
}

/// Ensure a setting exists with a default value
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // Check if setting exists
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // Use INSERT OR IGNORE to handle concurrent initialization races
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;

        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    // Reset NULL values to the default
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;

        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table_exists(pool: &SqlitePool, name: &str) -> bool {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn init_creates_schema_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("qrtrace.db");

        let pool = init_database(&db_path).await.unwrap();

        assert!(table_exists(&pool, "settings").await);
        assert!(table_exists(&pool, "qr_codes").await);
        assert!(table_exists(&pool, "qr_sightings").await);

        let threshold: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = 'review_confidence_threshold'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(threshold.as_deref(), Some("0.7"));
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("qrtrace.db");

        let pool = init_database(&db_path).await.unwrap();
        drop(pool);
        // Second open of the same file must not fail or duplicate settings
        let pool = init_database(&db_path).await.unwrap();

        let rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM settings WHERE key = 'review_confidence_threshold'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn ensure_setting_preserves_existing_and_resets_null() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_settings_table(&pool).await.unwrap();

        ensure_setting(&pool, "http_port", "5740").await.unwrap();

        // Existing non-NULL value survives a re-run
        sqlx::query("UPDATE settings SET value = '9000' WHERE key = 'http_port'")
            .execute(&pool)
            .await
            .unwrap();
        ensure_setting(&pool, "http_port", "5740").await.unwrap();
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'http_port'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("9000"));

        // NULL value is reset to the default
        sqlx::query("UPDATE settings SET value = NULL WHERE key = 'http_port'")
            .execute(&pool)
            .await
            .unwrap();
        ensure_setting(&pool, "http_port", "5740").await.unwrap();
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'http_port'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("5740"));
    }
}

//! Configuration resolution for qrtrace-si
//!
//! Provides multi-tier credential resolution with Database → ENV → TOML
//! priority. The Anthropic key is optional (classification is a feature that
//! can be off); Twilio credentials are mandatory because SMS is the only
//! ingress and egress channel.

use qrtrace_common::config::TomlConfig;
use qrtrace_common::db::settings::get_setting;
use qrtrace_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

/// Environment variable carrying the Anthropic API key
pub const ANTHROPIC_API_KEY_ENV: &str = "QRTRACE_ANTHROPIC_API_KEY";

/// Environment variables carrying Twilio credentials
pub const TWILIO_ACCOUNT_SID_ENV: &str = "QRTRACE_TWILIO_ACCOUNT_SID";
pub const TWILIO_AUTH_TOKEN_ENV: &str = "QRTRACE_TWILIO_AUTH_TOKEN";
pub const TWILIO_FROM_NUMBER_ENV: &str = "QRTRACE_TWILIO_FROM_NUMBER";

/// Default HTTP port when no override is configured
pub const DEFAULT_HTTP_PORT: u16 = 5740;

/// Validate a credential value (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve one credential from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML. Returns `None` when no tier carries a
/// valid value; warns when more than one tier is set, since that usually
/// means a stale copy is shadowed.
async fn resolve_credential(
    db: &Pool<Sqlite>,
    setting_key: &str,
    env_var: &str,
    toml_value: Option<&String>,
) -> Result<Option<String>> {
    let db_value: Option<String> = get_setting(db, setting_key).await?;
    let env_value = std::env::var(env_var).ok();

    let mut sources = Vec::new();
    if db_value.as_deref().is_some_and(is_valid_key) {
        sources.push("database");
    }
    if env_value.as_deref().is_some_and(is_valid_key) {
        sources.push("environment");
    }
    if toml_value.map(|v| is_valid_key(v)).unwrap_or(false) {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        warn!(
            "'{}' found in multiple sources: {}. Using {} (highest priority).",
            setting_key,
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(value) = db_value {
        if is_valid_key(&value) {
            info!("'{}' loaded from database", setting_key);
            return Ok(Some(value));
        }
    }

    if let Some(value) = env_value {
        if is_valid_key(&value) {
            info!("'{}' loaded from environment variable {}", setting_key, env_var);
            return Ok(Some(value));
        }
    }

    if let Some(value) = toml_value {
        if is_valid_key(value) {
            info!("'{}' loaded from TOML config", setting_key);
            return Ok(Some(value.clone()));
        }
    }

    Ok(None)
}

/// Resolve the Anthropic API key used for destination classification
///
/// Absence is not an error: classification is simply disabled and the
/// pipeline skips the classification step entirely.
pub async fn resolve_anthropic_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<Option<String>> {
    let key = resolve_credential(
        db,
        "anthropic_api_key",
        ANTHROPIC_API_KEY_ENV,
        toml_config.anthropic_api_key.as_ref(),
    )
    .await?;

    if key.is_none() {
        warn!(
            "Anthropic API key not configured; destination classification is disabled. \
             Configure via settings table, {}, or the TOML config file.",
            ANTHROPIC_API_KEY_ENV
        );
    }

    Ok(key)
}

/// Resolved Twilio REST credentials for the SMS channel
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

/// Resolve Twilio credentials from 3-tier configuration
///
/// SMS is the sole ingress/egress channel, so a missing credential is a
/// startup configuration error and the service refuses to run.
pub async fn resolve_twilio_config(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<TwilioConfig> {
    let account_sid = resolve_credential(
        db,
        "twilio_account_sid",
        TWILIO_ACCOUNT_SID_ENV,
        toml_config.twilio_account_sid.as_ref(),
    )
    .await?;
    let auth_token = resolve_credential(
        db,
        "twilio_auth_token",
        TWILIO_AUTH_TOKEN_ENV,
        toml_config.twilio_auth_token.as_ref(),
    )
    .await?;
    let from_number = resolve_credential(
        db,
        "twilio_from_number",
        TWILIO_FROM_NUMBER_ENV,
        toml_config.twilio_from_number.as_ref(),
    )
    .await?;

    match (account_sid, auth_token, from_number) {
        (Some(account_sid), Some(auth_token), Some(from_number)) => Ok(TwilioConfig {
            account_sid,
            auth_token,
            from_number,
        }),
        _ => Err(Error::Config(format!(
            "Twilio credentials not configured. Set twilio_account_sid, twilio_auth_token \
             and twilio_from_number in the settings table, via {}/{}/{}, or in the TOML \
             config file.",
            TWILIO_ACCOUNT_SID_ENV, TWILIO_AUTH_TOKEN_ENV, TWILIO_FROM_NUMBER_ENV
        ))),
    }
}

/// Resolve the HTTP listen port: CLI override, then settings table, then default
pub async fn resolve_http_port(db: &Pool<Sqlite>, cli_override: Option<u16>) -> Result<u16> {
    if let Some(port) = cli_override {
        info!("HTTP port from CLI: {}", port);
        return Ok(port);
    }

    let port: Option<u16> = get_setting(db, "http_port").await?;
    Ok(port.unwrap_or(DEFAULT_HTTP_PORT))
}

//! Twilio SMS gateway
//!
//! Outbound message delivery and inbound media download over the Twilio
//! REST API. Both use HTTP basic auth with the account SID and auth token;
//! media URLs in webhooks point at Twilio-hosted resources that require the
//! same credentials.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::TwilioConfig;

/// Twilio REST API base
const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Timeout for Twilio API calls and media downloads
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway errors
#[derive(Debug, Error)]
pub enum SmsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),
}

/// SMS transport seam
#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Send an outbound SMS to a subscriber
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), SmsError>;

    /// Download inbound MMS media bytes
    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, SmsError>;
}

/// Twilio REST implementation
pub struct TwilioGateway {
    http_client: Client,
    config: TwilioConfig,
}

impl TwilioGateway {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            config,
        }
    }
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), SmsError> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            TWILIO_API_BASE, self.config.account_sid
        );

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| SmsError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SmsError::Api(status.as_u16(), body));
        }

        info!(to = %to, chars = body.len(), "Sent SMS reply");
        Ok(())
    }

    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, SmsError> {
        debug!(url = %url, "Fetching submission media");

        let response = self
            .http_client
            .get(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .send()
            .await
            .map_err(|e| SmsError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SmsError::Api(status.as_u16(), body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SmsError::Network(e.to_string()))?;

        debug!(bytes = bytes.len(), "Fetched submission media");
        Ok(bytes.to_vec())
    }
}

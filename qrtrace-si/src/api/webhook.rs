//! SMS webhook ingress
//!
//! Receives Twilio-style form posts for inbound messages. The handler
//! validates the submission, acknowledges the transport immediately with
//! TwiML, and runs the pipeline on a spawned task so a slow destination
//! visit never stalls the webhook. Each attachment is one submission and
//! gets its own outbound SMS reply.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Form, Router,
};
use qrtrace_common::db::models::Channel;
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::Submission;
use crate::services::responder;
use crate::services::PipelineError;
use crate::AppState;

/// One attachment on an inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    pub url: String,
    pub extension: &'static str,
}

/// Marker in the message body that requests a debug (non-persistent) run
const DEBUG_MARKER: &str = "no log";

/// POST /webhook/sms
///
/// Twilio numbers its attachments `MediaUrl0..MediaUrl{NumMedia-1}`, so the
/// form is read as a key/value map rather than a fixed struct. Zero-media
/// messages get an immediate instructional reply; messages with media are
/// acknowledged with empty TwiML and each attachment is processed in the
/// background as its own submission.
pub async fn receive_sms(
    axum::extract::State(state): axum::extract::State<AppState>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    let from = match params.get("From") {
        Some(from) => from.clone(),
        None => return StatusCode::BAD_REQUEST.into_response(),
    };
    let body = params.get("Body").map(String::as_str).unwrap_or("");
    let num_media: u32 = params
        .get("NumMedia")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);

    info!(from = %from, num_media, "Inbound SMS submission");

    let media = collect_media(&params, num_media);
    if media.is_empty() {
        return twiml_reply(Some("Please send a photo of the QR code you found."));
    }

    let debug_mode = body.to_lowercase().contains(DEBUG_MARKER);
    for item in media {
        let task_state = state.clone();
        let submitter = from.clone();
        tokio::spawn(async move {
            process_submission(task_state, submitter, item.url, item.extension, debug_mode).await;
        });
    }

    twiml_reply(None)
}

/// Collect the numbered media attachments from the form
fn collect_media(params: &HashMap<String, String>, num_media: u32) -> Vec<MediaItem> {
    let mut media = Vec::new();
    for i in 0..num_media {
        let Some(url) = params.get(&format!("MediaUrl{}", i)) else {
            warn!(index = i, "NumMedia names an attachment the form does not carry");
            continue;
        };
        let content_type = params.get(&format!("MediaContentType{}", i));
        media.push(MediaItem {
            url: url.clone(),
            extension: media_extension(content_type.map(String::as_str)),
        });
    }
    media
}

/// Download, store, and process one submission; reply over SMS
///
/// Never returns an error: every failure path turns into a reply to the
/// submitter, and reply delivery failures are logged and dropped.
async fn process_submission(
    state: AppState,
    submitter: String,
    media_url: String,
    extension: &'static str,
    debug_mode: bool,
) {
    let image = match state.gateway.fetch_media(&media_url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(from = %submitter, error = %e, "Media download failed");
            send_reply(&state, &submitter, &responder::format_no_qr_reply()).await;
            return;
        }
    };

    // Store the capture artifact; the sighting references it by path
    let image_path = state
        .images_dir
        .join(format!("{}.{}", Uuid::new_v4(), extension));
    if let Err(e) = tokio::fs::write(&image_path, &image).await {
        error!(path = %image_path.display(), error = %e, "Failed to store submission image");
        send_reply(&state, &submitter, &responder::format_failure_reply()).await;
        return;
    }

    let submission = Submission::new(
        image,
        image_path.display().to_string(),
        submitter.clone(),
        Channel::Sms,
        debug_mode,
    );

    let reply = match state.pipeline.process(submission).await {
        Ok(report) => responder::format_reply(&report),
        Err(PipelineError::Decode(reason)) => {
            info!(from = %submitter, reason = %reason, "Submission had no decodable QR code");
            responder::format_no_qr_reply()
        }
        Err(PipelineError::Storage(e)) => {
            error!(from = %submitter, error = %e, "Submission failed to persist");
            responder::format_failure_reply()
        }
    };

    send_reply(&state, &submitter, &reply).await;
}

/// Send the outcome SMS; delivery failures are logged, never propagated
async fn send_reply(state: &AppState, to: &str, body: &str) {
    if let Err(e) = state.gateway.send_sms(to, body).await {
        error!(to = %to, error = %e, "Failed to send reply SMS");
    }
}

/// File extension for a stored media artifact
fn media_extension(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some("image/jpeg") => "jpg",
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        _ => "bin",
    }
}

/// Minimal TwiML response, optionally carrying an immediate reply message
fn twiml_reply(message: Option<&str>) -> Response {
    let body = match message {
        Some(text) => format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response><Message>{}</Message></Response>",
            xml_escape(text)
        ),
        None => "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response></Response>".to_string(),
    };

    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Build webhook routes
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/sms", post(receive_sms))
}

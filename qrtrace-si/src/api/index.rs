//! Landing page
//!
//! A plain HTML status page with corpus statistics, for anyone who opens
//! the service URL in a browser.

use axum::{extract::State, response::Html, routing::get, Router};

use crate::db::stats::corpus_stats;
use crate::error::ApiResult;
use crate::AppState;

/// GET /
pub async fn index(State(state): State<AppState>) -> ApiResult<Html<String>> {
    let stats = corpus_stats(&state.db).await?;

    let page = format!(
        "<html>\n\
         <head><title>QRTrace Submission Ingest</title></head>\n\
         <body style=\"font-family: monospace; margin: 40px;\">\n\
         <h1>QRTrace Submission Ingest</h1>\n\
         <p>Text a photo of a QR code you found in the wild and get back what it points at.</p>\n\
         <h2>Statistics</h2>\n\
         <ul>\n\
         <li>Unique QR codes: {}</li>\n\
         <li>Total sightings: {}</li>\n\
         <li>Flagged malicious: {}</li>\n\
         <li>Awaiting review: {}</li>\n\
         </ul>\n\
         <p><a href=\"/health\">Health check</a></p>\n\
         </body>\n\
         </html>",
        stats.unique_codes, stats.total_sightings, stats.malicious_count, stats.review_queue
    );

    Ok(Html(page))
}

/// Build landing page routes
pub fn index_routes() -> Router<AppState> {
    Router::new().route("/", get(index))
}

//! qrtrace-si - QR Submission Ingest service
//!
//! Receives photographs of QR codes over SMS, deduplicates payloads against
//! the fingerprint store, logs each sighting, and - policy permitting -
//! visits and classifies URL destinations before replying to the submitter.

use anyhow::Result;
use clap::Parser;
use qrtrace_common::config::{load_toml_config, RootFolderInitializer, RootFolderResolver};
use qrtrace_common::db::init_database;
use qrtrace_common::db::settings::get_setting;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qrtrace_si::services::classifier::{ClaudeClassifier, Classifier};
use qrtrace_si::services::image_decoder::QrImageDecoder;
use qrtrace_si::services::twilio::TwilioGateway;
use qrtrace_si::services::visitor::HttpVisitor;
use qrtrace_si::services::SubmissionPipeline;
use qrtrace_si::AppState;

#[derive(Debug, Parser)]
#[command(name = "qrtrace-si", about = "QRTrace submission ingest service")]
struct Cli {
    /// Root data folder (overrides env var and config file)
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// HTTP listen port (overrides the settings table)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with env-filter; INFO default
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting qrtrace-si (QR Submission Ingest)");
    info!(
        "Version: {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );

    // Resolve and prepare the root data folder
    let resolver =
        RootFolderResolver::new("submission-ingest").with_cli_override(cli.root_folder);
    let root_folder = resolver.resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    // Open or create the database, schema, and seeded settings
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db = init_database(&db_path).await?;

    // Resolve credentials (Database -> ENV -> TOML)
    let toml_config = load_toml_config();
    let twilio_config = qrtrace_si::config::resolve_twilio_config(&db, &toml_config).await?;
    let anthropic_key = qrtrace_si::config::resolve_anthropic_api_key(&db, &toml_config).await?;

    // Tunables from the settings table (seeded at init)
    let visit_timeout: u64 = get_setting(&db, "visit_timeout_seconds").await?.unwrap_or(30);
    let user_agent: String = get_setting(&db, "visit_user_agent")
        .await?
        .unwrap_or_else(|| format!("qrtrace/{}", env!("CARGO_PKG_VERSION")));
    let model: String = get_setting(&db, "classifier_model")
        .await?
        .unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string());
    let max_tokens: u32 = get_setting(&db, "classifier_max_tokens").await?.unwrap_or(1024);

    // Assemble collaborators
    let decoder = Arc::new(QrImageDecoder);
    let visitor = Arc::new(HttpVisitor::new(
        initializer.snapshots_dir(),
        visit_timeout,
        &user_agent,
    ));
    let classifier: Option<Arc<dyn Classifier>> = anthropic_key
        .map(|key| Arc::new(ClaudeClassifier::new(key, model, max_tokens)) as Arc<dyn Classifier>);
    if classifier.is_some() {
        info!("Destination classification enabled");
    }
    let gateway = Arc::new(TwilioGateway::new(twilio_config));

    let pipeline = Arc::new(SubmissionPipeline::new(
        db.clone(),
        decoder,
        visitor,
        classifier,
    ));

    let state = AppState::new(db.clone(), pipeline, gateway, initializer.images_dir());
    let app = qrtrace_si::build_router(state);

    // The webhook must be reachable by the SMS transport, so bind all interfaces
    let port = qrtrace_si::config::resolve_http_port(&db, cli.port).await?;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on http://0.0.0.0:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    axum::serve(listener, app).await?;

    Ok(())
}

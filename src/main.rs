//! Timeline catalog service — Binary Entrypoint
//! Boots the Axum HTTP server over the event store, runs one ingestion at
//! startup and optionally keeps re-ingesting on an interval.

use chronicle_ingest::ingest::config::IngestConfig;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chronicle_ingest=info,warn"));

    // Shuttle may already have installed a global subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = IngestConfig::load_default()?;
    let interval_secs = cfg.interval_secs;
    let ingestor = chronicle_ingest::build_default_ingestor(cfg).await?;

    let router = chronicle_ingest::app(ingestor, interval_secs);
    Ok(router.into())
}

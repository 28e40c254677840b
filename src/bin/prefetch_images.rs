//! Offline image prefetch: fills the bundled image directory and its manifest
//! from the configured TSV sources. Safe to re-run; existing images are kept.
//!
//! Usage: `prefetch-images [SOURCES_DIR]` (defaults to the ingest config).

use std::path::PathBuf;

use chronicle_ingest::enrich::prefetch::prefetch_images;
use chronicle_ingest::enrich::wikipedia::WikipediaClient;
use chronicle_ingest::ingest::config::IngestConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = IngestConfig::load_default()?;
    let sources_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.sources_dir.clone());

    let client = WikipediaClient::new(&cfg.user_agent, cfg.http_timeout_secs, cfg.api_base())?;
    let report = prefetch_images(
        &client,
        &sources_dir,
        &cfg.manifest_path,
        &cfg.images_dir,
        cfg.concurrency,
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

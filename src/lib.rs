// src/lib.rs
// Public library surface for the service binary, the prefetch tool and integration tests.

pub mod api;
pub mod enrich;
pub mod event;
pub mod ingest;
pub mod lanes;
pub mod manifest;
pub mod metrics;
pub mod schema;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::event::{event_id, HistoricalEvent, ENRICH_VERSION, MAX_LANES};
pub use crate::ingest::{IngestReport, Ingestor};
pub use crate::store::{EventStore, JsonFileStore, MemoryStore};

use shuttle_axum::axum::Router;
use std::sync::Arc;
use tracing::info;

use crate::api::AppState;
use crate::enrich::preview::NoPreview;
use crate::enrich::wikipedia::WikipediaClient;
use crate::ingest::config::IngestConfig;
use crate::ingest::scheduler::{spawn_ingest_scheduler, IngestSchedulerCfg};
use crate::metrics::Metrics;

/// Build an ingestor with the production collaborators: JSON file store,
/// Wikipedia enrichment and no preview resizer.
pub async fn build_default_ingestor(cfg: IngestConfig) -> anyhow::Result<Arc<Ingestor>> {
    let store = JsonFileStore::open(&cfg.store_path).await?;
    let enricher = WikipediaClient::new(&cfg.user_agent, cfg.http_timeout_secs, cfg.api_base())?;
    info!(
        sources = %cfg.sources_dir.display(),
        store = %cfg.store_path.display(),
        concurrency = cfg.concurrency,
        "ingestor configured"
    );
    Ok(Ingestor::new(
        cfg,
        Arc::new(store),
        Arc::new(enricher),
        Arc::new(NoPreview),
    ))
}

/// Full service: metrics recorder first, then the startup ingest, the
/// optional scheduler and the HTTP router. Must run inside a tokio runtime.
pub fn app(ingestor: Arc<Ingestor>, interval_secs: u64) -> Router {
    // Installed before any run so the first run's series are recorded.
    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics endpoint disabled");
            None
        }
    };

    // Initial run in the background; requests arriving meanwhile join it.
    {
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            let report = ingestor.run_ingest().await;
            info!(
                touched = report.touched(),
                total = report.total_events,
                "startup ingest done"
            );
        });
    }
    if interval_secs > 0 {
        spawn_ingest_scheduler(IngestSchedulerCfg { interval_secs }, ingestor.clone());
    }

    let router = api::router(AppState { ingestor });
    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}

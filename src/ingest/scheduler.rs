// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::ingest::Ingestor;

#[derive(Clone, Copy, Debug)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
}

/// Spawn a lightweight scheduler that re-runs ingestion on a fixed interval.
/// Ticks landing while a run is still going just join it.
pub fn spawn_ingest_scheduler(cfg: IngestSchedulerCfg, ingestor: Arc<Ingestor>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let report = ingestor.run_ingest().await;
            tracing::info!(
                target: "ingest",
                touched = report.touched(),
                parse_errors = report.parse_errors,
                total = report.total_events,
                "scheduled ingest tick"
            );
        }
    })
}

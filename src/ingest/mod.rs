// src/ingest/mod.rs
pub mod config;
pub mod parser;
pub mod runner;
pub mod scheduler;
pub mod sync;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::enrich::preview::DynPreviewGenerator;
use crate::enrich::DynEnricher;
use crate::ingest::config::IngestConfig;
use crate::ingest::sync::{sync_file, FileReport, SyncContext};
use crate::lanes::LaneAssigner;
use crate::manifest::ImageManifest;
use crate::store::DynEventStore;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Completed ingestion runs.");
        describe_counter!("ingest_rows_total", "Valid rows parsed from source files.");
        describe_counter!(
            "ingest_parse_errors_total",
            "Rejected rows plus unusable headers."
        );
        describe_counter!(
            "ingest_file_errors_total",
            "Source files skipped because they could not be read or synced."
        );
        describe_counter!(
            "ingest_enrich_calls_total",
            "Remote enrichment requests issued."
        );
        describe_counter!(
            "ingest_enrich_failures_total",
            "Remote enrichment requests that failed."
        );
        describe_counter!(
            "ingest_removed_total",
            "Stored events deleted because their row disappeared."
        );
        describe_histogram!("ingest_run_ms", "Ingestion run time in milliseconds.");
        describe_gauge!("ingest_events_stored", "Events in the store after the last run.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when the ingest pipeline last ran."
        );
    });
}

/// Aggregate counts of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub files_seen: usize,
    pub files_failed: usize,
    pub rows: usize,
    pub parse_errors: usize,
    pub removed: usize,
    pub enriched: usize,
    pub enrich_failures: usize,
    pub row_only_updates: usize,
    pub provenance_updates: usize,
    pub total_events: usize,
    /// Set when the lane write-back failed; stored lanes are stale then.
    pub lane_error: Option<String>,
    pub files: Vec<FileReport>,
}

impl IngestReport {
    /// Events written or deleted by the run, lane updates excluded.
    pub fn touched(&self) -> usize {
        self.removed + self.enriched + self.row_only_updates + self.provenance_updates
    }

    fn absorb(&mut self, f: FileReport) {
        self.rows += f.rows;
        self.parse_errors += f.parse_errors;
        self.removed += f.removed;
        self.enriched += f.enriched;
        self.enrich_failures += f.enrich_failures;
        self.row_only_updates += f.row_only_updates;
        self.provenance_updates += f.provenance_updates;
        self.files.push(f);
    }
}

type InFlight = Shared<BoxFuture<'static, IngestReport>>;

/// Coordinates parsing, sync, enrichment and lane layout.
///
/// At most one run is in flight: callers arriving while a run is active
/// await that run's report instead of starting another one. Once it settles
/// the next call starts fresh.
pub struct Ingestor {
    cfg: IngestConfig,
    store: DynEventStore,
    enricher: DynEnricher,
    preview: DynPreviewGenerator,
    in_flight: Mutex<Option<InFlight>>,
}

impl Ingestor {
    pub fn new(
        cfg: IngestConfig,
        store: DynEventStore,
        enricher: DynEnricher,
        preview: DynPreviewGenerator,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            store,
            enricher,
            preview,
            in_flight: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.cfg
    }

    pub fn store(&self) -> &DynEventStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    /// Run ingestion, or join the run already in progress.
    pub async fn run_ingest(self: &Arc<Self>) -> IngestReport {
        let fut = {
            let mut slot = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
            match slot.as_ref() {
                Some(running) => {
                    tracing::debug!(target: "ingest", "joining in-flight ingestion run");
                    running.clone()
                }
                None => {
                    // The run lives on its own task so it settles even when
                    // every caller has gone away.
                    let this = Arc::clone(self);
                    let handle = tokio::spawn(async move {
                        let report = this.run_once().await;
                        this.clear_in_flight();
                        report
                    });
                    let this = Arc::clone(self);
                    let run: InFlight = async move {
                        match handle.await {
                            Ok(report) => report,
                            Err(e) => {
                                tracing::error!(target: "ingest", error = ?e, "ingestion task died");
                                this.clear_in_flight();
                                IngestReport::default()
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(run.clone());
                    run
                }
            }
        };
        fut.await
    }

    fn clear_in_flight(&self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
    }

    async fn run_once(&self) -> IngestReport {
        ensure_metrics_described();
        let t0 = std::time::Instant::now();
        let started = Utc::now();
        let mut report = IngestReport {
            started_at: Some(started),
            ..Default::default()
        };

        let manifest = match ImageManifest::load(&self.cfg.manifest_path, &self.cfg.images_dir).await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, "image manifest unusable; ignoring it");
                ImageManifest::new(&self.cfg.images_dir)
            }
        };

        let files = match list_sources(&self.cfg.sources_dir).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, dir = %self.cfg.sources_dir.display(), "cannot list sources");
                counter!("ingest_file_errors_total").increment(1);
                report.files_failed += 1;
                Vec::new()
            }
        };

        let names: BTreeSet<String> = files.iter().map(|p| source_name(p)).collect();
        let ctx = SyncContext {
            store: self.store.as_ref(),
            enricher: self.enricher.as_ref(),
            preview: self.preview.as_ref(),
            manifest: &manifest,
            concurrency: self.cfg.concurrency,
            summary_max_chars: self.cfg.summary_max_chars,
            preview_max_dim: self.cfg.preview_max_dim,
            source_files: &names,
        };

        for path in files {
            report.files_seen += 1;
            let name = source_name(&path);
            match ingest_file(&ctx, &path, &name).await {
                Ok(fr) => report.absorb(fr),
                Err(e) => {
                    tracing::warn!(target: "ingest", file = %name, error = ?e, "source file skipped");
                    counter!("ingest_file_errors_total").increment(1);
                    report.files_failed += 1;
                }
            }
        }

        match self.assign_lanes().await {
            Ok(n) => report.total_events = n,
            Err(e) => {
                tracing::error!(target: "ingest", error = ?e, "lane write-back failed");
                report.lane_error = Some(format!("{e:#}"));
            }
        }

        report.duration_ms = t0.elapsed().as_millis() as u64;
        counter!("ingest_runs_total").increment(1);
        histogram!("ingest_run_ms").record(report.duration_ms as f64);
        gauge!("ingest_events_stored").set(report.total_events as f64);
        gauge!("ingest_pipeline_last_run_ts").set(started.timestamp().max(0) as f64);

        tracing::info!(
            target: "ingest",
            files = report.files_seen,
            files_failed = report.files_failed,
            parse_errors = report.parse_errors,
            touched = report.touched(),
            enrich_failures = report.enrich_failures,
            total = report.total_events,
            ms = report.duration_ms,
            "ingestion run finished"
        );
        report
    }

    /// Recompute lanes over the whole stored set and write them back.
    async fn assign_lanes(&self) -> Result<usize> {
        let all = self.store.get_all().await.context("loading events for lanes")?;
        let laid_out = LaneAssigner::new(self.cfg.lane_window_days).assign(all);
        let n = laid_out.len();
        if n > 0 {
            self.store
                .bulk_upsert(laid_out)
                .await
                .context("writing lane indices")?;
        }
        Ok(n)
    }
}

async fn ingest_file(ctx: &SyncContext<'_>, path: &Path, name: &str) -> Result<FileReport> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    sync_file(ctx, name, &text).await
}

/// Provenance name of a source file.
fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// `*.tsv` files directly inside `dir`, sorted by name.
pub async fn list_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut rd = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("listing {}", dir.display()))?;
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        let is_tsv = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("tsv"));
        if is_tsv && entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

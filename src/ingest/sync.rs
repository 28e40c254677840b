// src/ingest/sync.rs
//! Per-file diff & sync: drop stored events whose row disappeared, enrich
//! new or changed rows, refresh provenance of rows that merely moved.

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::enrich::preview::{build_preview, PreviewGenerator};
use crate::enrich::wikipedia::WikiPage;
use crate::enrich::{clean_extract, EnrichData, EnrichOutcome, Enricher};
use crate::event::{HistoricalEvent, DEFAULT_IMPORTANCE, ENRICH_VERSION};
use crate::ingest::parser::{parse_tsv, SourceRow};
use crate::ingest::runner::run_bounded;
use crate::manifest::ImageManifest;
use crate::store::EventStore;

/// Everything a file sync needs, borrowed from the orchestrator.
pub struct SyncContext<'a> {
    pub store: &'a dyn EventStore,
    pub enricher: &'a dyn Enricher,
    pub preview: &'a dyn PreviewGenerator,
    pub manifest: &'a ImageManifest,
    pub concurrency: usize,
    pub summary_max_chars: usize,
    pub preview_max_dim: u32,
    /// Names of every source file in this run.
    pub source_files: &'a BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file: String,
    pub rows: usize,
    pub parse_errors: usize,
    pub header_error: bool,
    pub removed: usize,
    pub enriched: usize,
    pub enrich_failures: usize,
    /// Rows whose own fields were applied although enrichment failed.
    pub row_only_updates: usize,
    pub provenance_updates: usize,
}

/// Whether a parsed row must go through the enrichment service again.
///
/// True when nothing is stored under the row's id, when the row carries an
/// explicit title, lang or image that differs from the stored one, or when
/// the stored record was produced by an older enrichment version.
pub fn needs_enrichment(existing: Option<&HistoricalEvent>, row: &SourceRow) -> bool {
    let Some(ev) = existing else {
        return true;
    };
    if row.explicit_title().is_some_and(|t| t != ev.title) {
        return true;
    }
    if row.lang != ev.lang {
        return true;
    }
    if row
        .explicit_image()
        .is_some_and(|img| Some(img) != ev.thumbnail_url.as_deref())
    {
        return true;
    }
    ev.enrich_version < ENRICH_VERSION
}

/// Combine a row, its previous record and fresh metadata into one event.
/// `data == None` means enrichment failed: previous metadata and its
/// enrichment version are kept, row-supplied fields still apply.
pub fn merge_event(
    row: &SourceRow,
    source_file: &str,
    existing: Option<&HistoricalEvent>,
    data: Option<&EnrichData>,
    has_local_image: bool,
    summary_max_chars: usize,
) -> HistoricalEvent {
    let slug_title = WikiPage::from_url(&row.url).map(|p| p.display_title());
    let title = row
        .explicit_title()
        .map(str::to_string)
        .or_else(|| data.and_then(|d| d.title.clone()))
        .or_else(|| existing.map(|e| e.title.clone()).filter(|t| !t.is_empty()))
        .or(slug_title)
        .unwrap_or_else(|| row.url.clone());

    let (summary, ru_url) = match data {
        Some(d) => (
            d.extract
                .as_deref()
                .map(|e| clean_extract(e, summary_max_chars))
                .filter(|s| !s.is_empty()),
            d.ru_url.clone(),
        ),
        None => (
            existing.and_then(|e| e.summary.clone()),
            existing.and_then(|e| e.ru_url.clone()),
        ),
    };

    let thumbnail_url = if has_local_image {
        None
    } else {
        match (row.explicit_image(), data) {
            (Some(img), _) => Some(img.to_string()),
            (None, Some(d)) => d.thumbnail_url.clone(),
            (None, None) => existing.and_then(|e| e.thumbnail_url.clone()),
        }
    };

    // A preview stays valid only while it was made from the same thumbnail.
    let preview_blob = existing
        .filter(|e| !has_local_image && e.thumbnail_url == thumbnail_url)
        .and_then(|e| e.preview_blob.clone());

    HistoricalEvent {
        id: row.id(),
        date: row.date.clone(),
        url: row.url.clone(),
        title,
        lang: row.lang.clone(),
        thumbnail_url,
        preview_blob,
        summary,
        ru_url,
        importance: existing.map(|e| e.importance).unwrap_or(DEFAULT_IMPORTANCE),
        source_file: source_file.to_string(),
        source_line: row.line,
        updated_at: Utc::now(),
        enrich_version: match (data, existing) {
            (Some(_), _) => ENRICH_VERSION,
            (None, Some(e)) => e.enrich_version,
            (None, None) => 0,
        },
        lane_index: existing.and_then(|e| e.lane_index),
    }
}

struct EnrichTask {
    row: SourceRow,
    existing: Option<HistoricalEvent>,
    has_local_image: bool,
}

struct Enriched {
    event: HistoricalEvent,
    /// False when the service failed and only row fields were applied.
    remote_ok: bool,
}

/// Fields a source row controls on its own, without the remote service.
fn row_fields_differ(a: &HistoricalEvent, b: &HistoricalEvent) -> bool {
    a.title != b.title
        || a.lang != b.lang
        || a.thumbnail_url != b.thumbnail_url
        || a.source_file != b.source_file
        || a.source_line != b.source_line
}

/// Enrich one row. An `Err` means "no update": enrichment failed for a
/// stored record and the row itself brings nothing new.
async fn enrich_row(ctx: &SyncContext<'_>, file: &str, task: EnrichTask) -> Result<Enriched> {
    let outcome = ctx.enricher.enrich(&task.row.url).await;
    let data = match &outcome {
        EnrichOutcome::Success(d) => Some(d),
        EnrichOutcome::Failure { reason } => {
            tracing::debug!(target: "ingest", url = %task.row.url, %reason, "enrichment failed; applying row fields only");
            None
        }
    };

    let mut ev = merge_event(
        &task.row,
        file,
        task.existing.as_ref(),
        data,
        task.has_local_image,
        ctx.summary_max_chars,
    );
    if let (None, Some(prev)) = (data, task.existing.as_ref()) {
        if !row_fields_differ(prev, &ev) {
            anyhow::bail!("enrichment failed for {}: {}", task.row.url, outcome_reason(&outcome));
        }
    }

    if ev.preview_blob.is_none() && !task.has_local_image && ctx.preview.enabled() {
        if let Some(thumb) = ev.thumbnail_url.clone() {
            match build_preview(ctx.enricher, ctx.preview, &thumb, ctx.preview_max_dim).await {
                Ok(blob) => ev.preview_blob = Some(blob),
                Err(e) => {
                    tracing::debug!(target: "ingest", id = %ev.id, error = ?e, "no preview; keeping thumbnail url")
                }
            }
        }
    }
    Ok(Enriched {
        event: ev,
        remote_ok: data.is_some(),
    })
}

fn outcome_reason(outcome: &EnrichOutcome) -> &str {
    match outcome {
        EnrichOutcome::Failure { reason } => reason,
        EnrichOutcome::Success(_) => "",
    }
}

/// Sync one source file's text against the store.
pub async fn sync_file(ctx: &SyncContext<'_>, file: &str, text: &str) -> Result<FileReport> {
    let parsed = parse_tsv(text, file);
    let mut report = FileReport {
        file: file.to_string(),
        rows: parsed.rows.len(),
        parse_errors: parsed.errors,
        header_error: parsed.header_error,
        ..Default::default()
    };
    if parsed.header_error {
        // Without usable columns the current id set is unknown; delete nothing.
        return Ok(report);
    }

    let stored: HashMap<String, HistoricalEvent> = ctx
        .store
        .get_all()
        .await
        .context("loading stored events")?
        .into_iter()
        .map(|e| (e.id.clone(), e))
        .collect();

    let current: HashSet<String> = parsed.rows.iter().map(SourceRow::id).collect();
    let stale: Vec<String> = stored
        .values()
        .filter(|e| e.source_file == file && !current.contains(&e.id))
        .map(|e| e.id.clone())
        .collect();
    if !stale.is_empty() {
        report.removed = ctx
            .store
            .delete_by_ids(&stale)
            .await
            .with_context(|| format!("deleting {} stale events of {file}", stale.len()))?;
        counter!("ingest_removed_total").increment(report.removed as u64);
        tracing::info!(target: "ingest", file, removed = report.removed, "removed stale events");
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut tasks: Vec<EnrichTask> = Vec::new();
    let mut moved: Vec<HistoricalEvent> = Vec::new();
    for row in parsed.rows {
        let id = row.id();
        if !seen.insert(id.clone()) {
            tracing::debug!(target: "ingest", file, line = row.line, "duplicate row; first occurrence wins");
            continue;
        }
        let existing = stored.get(&id);
        if let Some(owner) = existing.map(|e| e.source_file.as_str()) {
            // The same pair listed in several files belongs to the first one.
            if owner < file && ctx.source_files.contains(owner) {
                tracing::debug!(target: "ingest", file, line = row.line, owner, "row owned by an earlier file");
                continue;
            }
        }
        let has_local_image = ctx.manifest.has_local(&row.date, &row.url);

        // With a bundled image the stored thumbnail is always empty, so the
        // row's image column must not count as a change.
        let changed = if has_local_image {
            let masked = SourceRow {
                image: None,
                ..row.clone()
            };
            needs_enrichment(existing, &masked)
        } else {
            needs_enrichment(existing, &row)
        };

        match existing {
            _ if changed => tasks.push(EnrichTask {
                existing: existing.cloned(),
                row,
                has_local_image,
            }),
            Some(ev) if ev.source_file != file || ev.source_line != row.line => {
                let mut ev = ev.clone();
                ev.source_file = file.to_string();
                ev.source_line = row.line;
                moved.push(ev);
            }
            _ => {}
        }
    }

    let attempted = tasks.len();
    let results = run_bounded(tasks, ctx.concurrency, move |task| enrich_row(ctx, file, task)).await;
    let mut upserts: Vec<HistoricalEvent> = Vec::with_capacity(attempted + moved.len());
    for done in results.into_iter().flatten() {
        if done.remote_ok {
            report.enriched += 1;
        } else {
            report.row_only_updates += 1;
        }
        upserts.push(done.event);
    }
    report.enrich_failures = attempted - report.enriched;
    report.provenance_updates = moved.len();
    upserts.extend(moved);

    if !upserts.is_empty() {
        ctx.store
            .bulk_upsert(upserts)
            .await
            .with_context(|| format!("upserting events of {file}"))?;
    }

    tracing::info!(
        target: "ingest",
        file,
        rows = report.rows,
        parse_errors = report.parse_errors,
        removed = report.removed,
        enriched = report.enriched,
        enrich_failures = report.enrich_failures,
        row_only = report.row_only_updates,
        moved = report.provenance_updates,
        "file synced"
    );
    Ok(report)
}

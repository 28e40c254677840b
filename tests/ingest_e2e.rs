// tests/ingest_e2e.rs
//
// End-to-end ingestion against an in-memory store and a stub enricher.
// No network: the stub counts calls and returns canned metadata.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chronicle_ingest::enrich::preview::{NoPreview, PreviewGenerator};
use chronicle_ingest::enrich::{EnrichData, EnrichOutcome, Enricher};
use chronicle_ingest::event::{event_id, ENRICH_VERSION, MAX_LANES};
use chronicle_ingest::ingest::config::IngestConfig;
use chronicle_ingest::{EventStore, Ingestor, MemoryStore};

struct StubEnricher {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl StubEnricher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Enricher for StubEnricher {
    async fn enrich(&self, url: &str) -> EnrichOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return EnrichOutcome::failure("service unavailable");
        }
        EnrichOutcome::Success(EnrichData {
            title: Some(format!("Remote {}", url.rsplit('/').next().unwrap_or_default())),
            extract: Some("A short summary.".into()),
            thumbnail_url: None,
            ru_url: Some("https://ru.wikipedia.org/wiki/X".into()),
        })
    }
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        anyhow::bail!("no downloads in tests: {url}")
    }
    fn name(&self) -> &'static str {
        "stub"
    }
}

fn setup(dir: &Path) -> (Arc<Ingestor>, MemoryStore, Arc<StubEnricher>) {
    let cfg = IngestConfig {
        sources_dir: dir.join("sources"),
        manifest_path: dir.join("images").join("manifest.json"),
        images_dir: dir.join("images"),
        ..Default::default()
    };
    std::fs::create_dir_all(&cfg.sources_dir).unwrap();
    let store = MemoryStore::new();
    let enricher = StubEnricher::new();
    let ingestor = Ingestor::new(
        cfg,
        Arc::new(store.clone()),
        enricher.clone(),
        Arc::new(NoPreview),
    );
    (ingestor, store, enricher)
}

fn write_source(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join("sources").join(name), body).unwrap();
}

#[tokio::test]
async fn single_row_against_empty_store() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, store, _enricher) = setup(tmp.path());
    write_source(
        tmp.path(),
        "test.tsv",
        "date\turl\ttitle\n2020-03-15\thttps://en.wikipedia.org/wiki/Example\tExample Event\n",
    );

    let report = ingestor.run_ingest().await;
    assert_eq!(report.files_seen, 1);
    assert_eq!(report.parse_errors, 0);
    assert_eq!(report.total_events, 1);
    assert!(report.lane_error.is_none());

    let all = store.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    let ev = &all[0];
    assert_eq!(
        ev.id,
        event_id("2020-03-15", "https://en.wikipedia.org/wiki/Example")
    );
    assert_eq!(ev.title, "Example Event");
    assert_eq!(ev.source_file, "test.tsv");
    assert_eq!(ev.source_line, 2);
    assert_eq!(ev.summary.as_deref(), Some("A short summary."));
    assert_eq!(ev.enrich_version, ENRICH_VERSION);
    assert!(ev.lane_index.is_some_and(|l| l < MAX_LANES));
}

#[tokio::test]
async fn unchanged_sources_cause_no_second_enrichment() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, _store, enricher) = setup(tmp.path());
    write_source(
        tmp.path(),
        "a.tsv",
        "date\turl\n\
         1969-07-20\thttps://en.wikipedia.org/wiki/Apollo_11\n\
         1989-11-09\thttps://en.wikipedia.org/wiki/Fall_of_the_Berlin_Wall\n",
    );

    let first = ingestor.run_ingest().await;
    assert_eq!(first.enriched, 2);
    assert_eq!(enricher.calls(), 2);

    let second = ingestor.run_ingest().await;
    assert_eq!(enricher.calls(), 2, "second run must not hit the service");
    assert_eq!(second.touched(), 0);
    assert_eq!(second.total_events, 2);
}

#[tokio::test]
async fn removed_row_deletes_only_that_event() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, store, _enricher) = setup(tmp.path());
    write_source(
        tmp.path(),
        "a.tsv",
        "date\turl\n1914-07-28\thttps://a.test/ww1\n1939-09-01\thttps://a.test/ww2\n",
    );
    write_source(tmp.path(), "b.tsv", "date\turl\n1969-07-20\thttps://b.test/moon\n");
    ingestor.run_ingest().await;

    let moon_id = event_id("1969-07-20", "https://b.test/moon");
    let moon_before = store.get(&moon_id).await.unwrap().unwrap();

    write_source(tmp.path(), "a.tsv", "date\turl\n1914-07-28\thttps://a.test/ww1\n");
    let report = ingestor.run_ingest().await;
    assert_eq!(report.removed, 1);

    assert!(store
        .get(&event_id("1939-09-01", "https://a.test/ww2"))
        .await
        .unwrap()
        .is_none());
    assert!(store
        .get(&event_id("1914-07-28", "https://a.test/ww1"))
        .await
        .unwrap()
        .is_some());
    let moon_after = store.get(&moon_id).await.unwrap().unwrap();
    assert_eq!(moon_after.updated_at, moon_before.updated_at);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn edited_title_reenriches_and_moved_row_updates_provenance() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, store, enricher) = setup(tmp.path());
    write_source(
        tmp.path(),
        "a.tsv",
        "date\turl\ttitle\n1914-07-28\thttps://a.test/ww1\tGreat War\n1939-09-01\thttps://a.test/ww2\t\n",
    );
    ingestor.run_ingest().await;
    assert_eq!(enricher.calls(), 2);

    // ww1 gets a new title, ww2 moves down a line.
    write_source(
        tmp.path(),
        "a.tsv",
        "date\turl\ttitle\n1914-07-28\thttps://a.test/ww1\tWorld War I\n# interwar\n1939-09-01\thttps://a.test/ww2\t\n",
    );
    let report = ingestor.run_ingest().await;
    assert_eq!(enricher.calls(), 3);
    assert_eq!(report.enriched, 1);
    assert_eq!(report.provenance_updates, 1);

    let ww1 = store
        .get(&event_id("1914-07-28", "https://a.test/ww1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ww1.title, "World War I");
    assert_eq!(ww1.source_line, 2);
    let ww2 = store
        .get(&event_id("1939-09-01", "https://a.test/ww2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ww2.title, "Remote ww2");
    assert_eq!(ww2.source_line, 4);
}

#[tokio::test]
async fn bad_rows_are_counted_and_bad_headers_delete_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, store, _enricher) = setup(tmp.path());
    write_source(
        tmp.path(),
        "a.tsv",
        "date\turl\n2024-13-40\thttps://a.test/x\n2024-01-01\tnot-a-url\n2024-01-02\thttps://a.test/ok\n",
    );
    let report = ingestor.run_ingest().await;
    assert_eq!(report.parse_errors, 2);
    assert_eq!(store.len().await, 1);

    write_source(tmp.path(), "a.tsv", "when\twhere\n2024-01-02\thttps://a.test/ok\n");
    let report = ingestor.run_ingest().await;
    assert_eq!(report.parse_errors, 1);
    assert_eq!(report.removed, 0);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn enrichment_failures_never_abort_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, store, enricher) = setup(tmp.path());
    enricher.fail.store(true, Ordering::SeqCst);
    write_source(
        tmp.path(),
        "a.tsv",
        "date\turl\n1969-07-20\thttps://en.wikipedia.org/wiki/Apollo_11\n",
    );

    let report = ingestor.run_ingest().await;
    assert_eq!(report.total_events, 1);
    let id = event_id("1969-07-20", "https://en.wikipedia.org/wiki/Apollo_11");
    let bare = store.get(&id).await.unwrap().unwrap();
    assert_eq!(bare.title, "Apollo 11");
    assert!(bare.summary.is_none());
    assert_eq!(bare.enrich_version, 0);

    // Bare rows are retried on the next run; a failure there leaves the record as is.
    let report = ingestor.run_ingest().await;
    assert_eq!(enricher.calls(), 2);
    assert_eq!(report.enrich_failures, 1);
    assert_eq!(store.get(&id).await.unwrap().unwrap().updated_at, bare.updated_at);

    enricher.fail.store(false, Ordering::SeqCst);
    ingestor.run_ingest().await;
    let enriched = store.get(&id).await.unwrap().unwrap();
    assert_eq!(enriched.title, "Remote Apollo_11");
    assert_eq!(enriched.enrich_version, ENRICH_VERSION);
}

#[tokio::test]
async fn unreadable_sources_dir_still_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, _store, _enricher) = setup(tmp.path());
    std::fs::remove_dir_all(tmp.path().join("sources")).unwrap();
    let report = ingestor.run_ingest().await;
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.total_events, 0);
}

#[tokio::test]
async fn local_manifest_image_clears_remote_images() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, store, enricher) = setup(tmp.path());
    std::fs::create_dir_all(tmp.path().join("images")).unwrap();
    std::fs::write(
        tmp.path().join("images").join("manifest.json"),
        r#"{"1969-07-20|https://a.test/moon": "moon.jpg"}"#,
    )
    .unwrap();
    write_source(
        tmp.path(),
        "a.tsv",
        "date\turl\timage\n1969-07-20\thttps://a.test/moon\thttps://img.test/moon.jpg\n",
    );

    ingestor.run_ingest().await;
    let ev = store
        .get(&event_id("1969-07-20", "https://a.test/moon"))
        .await
        .unwrap()
        .unwrap();
    assert!(ev.thumbnail_url.is_none());
    assert!(ev.preview_blob.is_none());

    // The image column must not keep re-triggering enrichment.
    ingestor.run_ingest().await;
    assert_eq!(enricher.calls(), 1);
}

/// Serves a thumbnail for every url; downloads of `broken` images fail.
#[derive(Default)]
struct ThumbEnricher {
    calls: AtomicUsize,
    downloads: AtomicUsize,
}

#[async_trait]
impl Enricher for ThumbEnricher {
    async fn enrich(&self, url: &str) -> EnrichOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let slug = url.rsplit('/').next().unwrap_or_default();
        EnrichOutcome::Success(EnrichData {
            thumbnail_url: Some(format!("https://img.test/{slug}.jpg")),
            ..Default::default()
        })
    }
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if url.contains("broken") {
            anyhow::bail!("404 for {url}");
        }
        Ok(vec![1, 2, 3, 4])
    }
    fn name(&self) -> &'static str {
        "thumbs"
    }
}

/// Keeps the first half of the bytes.
struct HalvingPreview;

#[async_trait]
impl PreviewGenerator for HalvingPreview {
    async fn downsize(&self, image: &[u8], _max_dim: u32) -> Result<Vec<u8>> {
        Ok(image[..image.len() / 2].to_vec())
    }
}

#[tokio::test]
async fn previews_are_built_kept_and_optional() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = IngestConfig {
        sources_dir: tmp.path().join("sources"),
        manifest_path: tmp.path().join("manifest.json"),
        images_dir: tmp.path().join("images"),
        ..Default::default()
    };
    std::fs::create_dir_all(&cfg.sources_dir).unwrap();
    let store = MemoryStore::new();
    let enricher = Arc::new(ThumbEnricher::default());
    let ingestor = Ingestor::new(
        cfg,
        Arc::new(store.clone()),
        enricher.clone(),
        Arc::new(HalvingPreview),
    );
    write_source(
        tmp.path(),
        "a.tsv",
        "date\turl\n1969-07-20\thttps://a.test/moon\n1989-11-09\thttps://a.test/broken\n",
    );

    let report = ingestor.run_ingest().await;
    assert_eq!(report.enriched, 2);
    assert_eq!(report.enrich_failures, 0);

    let moon_id = event_id("1969-07-20", "https://a.test/moon");
    let moon = store.get(&moon_id).await.unwrap().unwrap();
    assert_eq!(moon.preview_blob, Some(vec![1, 2]));
    assert_eq!(moon.thumbnail_url.as_deref(), Some("https://img.test/moon.jpg"));

    // A failed download leaves the event on its remote thumbnail.
    let broken = store
        .get(&event_id("1989-11-09", "https://a.test/broken"))
        .await
        .unwrap()
        .unwrap();
    assert!(broken.preview_blob.is_none());
    assert_eq!(broken.thumbnail_url.as_deref(), Some("https://img.test/broken.jpg"));
    assert_eq!(broken.enrich_version, ENRICH_VERSION);

    // Unchanged re-run: no calls, no downloads, preview kept.
    let again = ingestor.run_ingest().await;
    assert_eq!(again.touched(), 0);
    assert_eq!(enricher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(enricher.downloads.load(Ordering::SeqCst), 2);
    let moon = store.get(&moon_id).await.unwrap().unwrap();
    assert_eq!(moon.preview_blob, Some(vec![1, 2]));
}

#[tokio::test]
async fn one_unreadable_file_does_not_stop_the_others() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, store, _enricher) = setup(tmp.path());
    std::fs::write(
        tmp.path().join("sources").join("a_bad.tsv"),
        [0x64, 0x61, 0xff, 0xfe, 0x0a, 0xc3, 0x28],
    )
    .unwrap();
    write_source(tmp.path(), "b_good.tsv", "date\turl\n1969-07-20\thttps://a.test/moon\n");

    let report = ingestor.run_ingest().await;
    assert_eq!(report.files_seen, 2);
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.total_events, 1);
    assert!(store
        .get(&event_id("1969-07-20", "https://a.test/moon"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn row_edits_apply_while_the_service_is_down() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, store, enricher) = setup(tmp.path());
    write_source(tmp.path(), "a.tsv", "date\turl\ttitle\n1914-07-28\thttps://a.test/ww1\tGreat War\n");
    ingestor.run_ingest().await;
    let id = event_id("1914-07-28", "https://a.test/ww1");
    let before = store.get(&id).await.unwrap().unwrap();

    enricher.fail.store(true, Ordering::SeqCst);
    write_source(
        tmp.path(),
        "a.tsv",
        "date\turl\ttitle\tlang\n# moved\n1914-07-28\thttps://a.test/ww1\tWorld War I\tde\n",
    );
    let report = ingestor.run_ingest().await;
    assert_eq!(report.enriched, 0);
    assert_eq!(report.enrich_failures, 1);
    assert_eq!(report.row_only_updates, 1);

    let after = store.get(&id).await.unwrap().unwrap();
    assert_eq!(after.title, "World War I");
    assert_eq!(after.lang, "de");
    assert_eq!(after.source_line, 3);
    assert_eq!(after.summary, before.summary);
    assert_eq!(after.enrich_version, before.enrich_version);

    // The row now matches the record, so nothing is retried.
    ingestor.run_ingest().await;
    assert_eq!(enricher.calls(), 2);
}

#[tokio::test]
async fn pair_listed_in_two_files_belongs_to_the_first() {
    let tmp = tempfile::tempdir().unwrap();
    let (ingestor, store, enricher) = setup(tmp.path());
    write_source(tmp.path(), "b.tsv", "date\turl\ttitle\n1969-07-20\thttps://a.test/moon\tBeta\n");
    write_source(
        tmp.path(),
        "a.tsv",
        "date\turl\ttitle\n# first\n1969-07-20\thttps://a.test/moon\tAlpha\n",
    );
    let id = event_id("1969-07-20", "https://a.test/moon");

    ingestor.run_ingest().await;
    let ev = store.get(&id).await.unwrap().unwrap();
    assert_eq!(ev.source_file, "a.tsv");
    assert_eq!(ev.source_line, 3);
    assert_eq!(ev.title, "Alpha");

    let again = ingestor.run_ingest().await;
    assert_eq!(again.touched(), 0);
    assert_eq!(enricher.calls(), 1);

    // Once the first file drops the pair, the other file takes it over.
    write_source(tmp.path(), "a.tsv", "date\turl\n");
    ingestor.run_ingest().await;
    let ev = store.get(&id).await.unwrap().unwrap();
    assert_eq!(ev.source_file, "b.tsv");
    assert_eq!(ev.title, "Beta");
}

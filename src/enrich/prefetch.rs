// src/enrich/prefetch.rs
//! Offline image prefetch: download one image per `(date, url)` into the
//! bundled image directory and record it in the manifest. Pairs whose
//! manifest entry already points at an existing file are skipped.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::Enricher;
use crate::event::manifest_key;
use crate::ingest::list_sources;
use crate::ingest::parser::{parse_tsv, SourceRow};
use crate::ingest::runner::run_bounded;
use crate::manifest::ImageManifest;

const KNOWN_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg"];

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PrefetchReport {
    pub rows: usize,
    pub parse_errors: usize,
    pub skipped: usize,
    pub downloaded: usize,
    pub no_image: usize,
    pub failed: usize,
}

/// Stable file name for a pair: short SHA-256 of `date|url` + image extension.
pub fn image_file_name(date: &str, url: &str, image_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manifest_key(date, url).as_bytes());
    let digest = hasher.finalize();
    let mut stem = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut stem, "{:02x}", b);
    }

    let ext = image_url
        .split(['?', '#'])
        .next()
        .and_then(|p| p.rsplit('/').next())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, e)| e.to_ascii_lowercase())
        .filter(|e| KNOWN_EXTS.contains(&e.as_str()))
        .unwrap_or_else(|| "jpg".to_string());
    format!("{date}_{stem}.{ext}")
}

enum Fetched {
    Saved { row: SourceRow, file: String },
    NoImage,
}

async fn fetch_one(enricher: &dyn Enricher, images_dir: &Path, row: SourceRow) -> Result<Fetched> {
    let image_url = match row.explicit_image() {
        Some(img) => Some(img.to_string()),
        None => enricher
            .enrich(&row.url)
            .await
            .data()
            .and_then(|d| d.thumbnail_url.clone()),
    };
    let Some(image_url) = image_url else {
        return Ok(Fetched::NoImage);
    };

    let bytes = enricher.download(&image_url).await?;
    let file = image_file_name(&row.date, &row.url, &image_url);
    let dest: PathBuf = images_dir.join(&file);
    tokio::fs::write(&dest, bytes)
        .await
        .with_context(|| format!("writing {}", dest.display()))?;
    tracing::debug!(url = %row.url, file = %file, "image saved");
    Ok(Fetched::Saved { row, file })
}

/// Prefetch images for every row of every source file in `sources_dir`.
pub async fn prefetch_images(
    enricher: &dyn Enricher,
    sources_dir: &Path,
    manifest_path: &Path,
    images_dir: &Path,
    concurrency: usize,
) -> Result<PrefetchReport> {
    tokio::fs::create_dir_all(images_dir)
        .await
        .with_context(|| format!("creating {}", images_dir.display()))?;
    let mut manifest = ImageManifest::load(manifest_path, images_dir).await?;
    let mut report = PrefetchReport::default();

    let mut todo: Vec<SourceRow> = Vec::new();
    for path in list_sources(sources_dir).await? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(file = %name, error = ?e, "unreadable source; skipped");
                continue;
            }
        };
        let parsed = parse_tsv(&text, &name);
        report.rows += parsed.rows.len();
        report.parse_errors += parsed.errors;
        for row in parsed.rows {
            if manifest.has_existing_file(&row.date, &row.url)
                || todo.iter().any(|r| r.date == row.date && r.url == row.url)
            {
                report.skipped += 1;
                continue;
            }
            todo.push(row);
        }
    }

    let results = run_bounded(todo, concurrency, move |row| fetch_one(enricher, images_dir, row)).await;
    for res in results {
        match res {
            Some(Fetched::Saved { row, file }) => {
                manifest.insert(&row.date, &row.url, file);
                report.downloaded += 1;
            }
            Some(Fetched::NoImage) => report.no_image += 1,
            None => report.failed += 1,
        }
    }

    if report.downloaded > 0 {
        manifest.save(manifest_path).await?;
    }
    tracing::info!(
        downloaded = report.downloaded,
        skipped = report.skipped,
        failed = report.failed,
        no_image = report.no_image,
        "prefetch finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_stable_and_keep_known_extensions() {
        let a = image_file_name("1969-07-20", "https://w/x", "https://img/a/Foo.PNG?width=20");
        let b = image_file_name("1969-07-20", "https://w/x", "https://img/b/other.png");
        assert_eq!(a, b);
        assert!(a.starts_with("1969-07-20_"));
        assert!(a.ends_with(".png"));
        assert!(image_file_name("1969-07-20", "https://w/x", "https://img/noext").ends_with(".jpg"));
        assert_ne!(a, image_file_name("1969-07-21", "https://w/x", "https://img/a.png"));
    }
}

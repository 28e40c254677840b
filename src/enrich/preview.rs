// src/enrich/preview.rs
//! Downsized previews. Resizing itself lives behind [`PreviewGenerator`];
//! this module only downloads the source image and hands it over.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::Enricher;

/// Target longest edge of a generated preview, in pixels.
pub const DEFAULT_PREVIEW_MAX_DIM: u32 = 320;

#[async_trait]
pub trait PreviewGenerator: Send + Sync {
    /// Produce a smaller copy of `image`, or fail explicitly.
    async fn downsize(&self, image: &[u8], max_dim: u32) -> Result<Vec<u8>>;

    /// False when `downsize` can never succeed; callers skip the download.
    fn enabled(&self) -> bool {
        true
    }
}

pub type DynPreviewGenerator = Arc<dyn PreviewGenerator>;

/// No resizer wired in: every request fails, events keep the thumbnail url.
pub struct NoPreview;

#[async_trait]
impl PreviewGenerator for NoPreview {
    async fn downsize(&self, _image: &[u8], _max_dim: u32) -> Result<Vec<u8>> {
        anyhow::bail!("preview generation disabled")
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Download `thumbnail_url` and downsize it.
pub async fn build_preview(
    enricher: &dyn Enricher,
    generator: &dyn PreviewGenerator,
    thumbnail_url: &str,
    max_dim: u32,
) -> Result<Vec<u8>> {
    if !generator.enabled() {
        anyhow::bail!("preview generation disabled");
    }
    let original = enricher
        .download(thumbnail_url)
        .await
        .with_context(|| format!("fetching preview source {thumbnail_url}"))?;
    if original.is_empty() {
        anyhow::bail!("empty image at {thumbnail_url}");
    }
    let small = generator
        .downsize(&original, max_dim)
        .await
        .context("downsizing preview")?;
    if small.is_empty() {
        anyhow::bail!("preview generator returned no bytes");
    }
    Ok(small)
}

// src/manifest.rs
//! Local image manifest: `"date|url"` → file name inside a bundled image dir.
//! A hit here beats any remote thumbnail or generated preview.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::event::manifest_key;

#[derive(Debug, Clone, Default)]
pub struct ImageManifest {
    entries: BTreeMap<String, String>,
    images_dir: PathBuf,
}

impl ImageManifest {
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            entries: BTreeMap::new(),
            images_dir: images_dir.into(),
        }
    }

    /// A missing manifest file is an empty manifest.
    pub async fn load(path: &Path, images_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut m = Self::new(images_dir);
        match tokio::fs::read_to_string(path).await {
            Ok(s) => {
                m.entries = serde_json::from_str(&s)
                    .with_context(|| format!("parsing image manifest {}", path.display()))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(target: "ingest", path = %path.display(), "no image manifest");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading image manifest {}", path.display()))
            }
        }
        Ok(m)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let body = serde_json::to_vec_pretty(&self.entries)?;
        tokio::fs::write(path, body)
            .await
            .with_context(|| format!("writing image manifest {}", path.display()))
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn file_name(&self, date: &str, url: &str) -> Option<&str> {
        self.entries.get(&manifest_key(date, url)).map(String::as_str)
    }

    /// Full path of the bundled image, if one is mapped.
    pub fn resolve(&self, date: &str, url: &str) -> Option<PathBuf> {
        self.file_name(date, url).map(|f| self.images_dir.join(f))
    }

    pub fn has_local(&self, date: &str, url: &str) -> bool {
        self.file_name(date, url).is_some()
    }

    /// Mapped and actually present on disk.
    pub fn has_existing_file(&self, date: &str, url: &str) -> bool {
        self.resolve(date, url).is_some_and(|p| p.is_file())
    }

    pub fn insert(&mut self, date: &str, url: &str, file_name: impl Into<String>) {
        self.entries.insert(manifest_key(date, url), file_name.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

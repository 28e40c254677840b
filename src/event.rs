// src/event.rs
//! Historical event model and its content-addressed identity.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Number of display lanes. The last one is the overflow lane.
pub const MAX_LANES: u8 = 3;

/// Bump when the enrichment logic changes; older records get re-enriched.
pub const ENRICH_VERSION: u32 = 2;

pub const DEFAULT_IMPORTANCE: u8 = 3;
pub const DEFAULT_LANG: &str = "en";

/// Fixed `YYYY-MM-DD` format used for every event date.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// `hex(SHA1(date + "|" + url))`
pub fn event_id(date: &str, url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(date.as_bytes());
    hasher.update(b"|");
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(40);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Key used by the local image manifest.
pub fn manifest_key(date: &str, url: &str) -> String {
    format!("{date}|{url}")
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

fn default_importance() -> u8 {
    DEFAULT_IMPORTANCE
}

fn default_lang() -> String {
    DEFAULT_LANG.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalEvent {
    pub id: String,
    pub date: String,
    pub url: String,
    pub title: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Downsized image bytes, base64 in the stored record.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::schema::blob"
    )]
    pub preview_blob: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ru_url: Option<String>,
    #[serde(default = "default_importance")]
    pub importance: u8,
    pub source_file: String,
    pub source_line: usize,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub enrich_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane_index: Option<u8>,
}

/// Which image the rendering layer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    Preview(&'a [u8]),
    Thumbnail(&'a str),
    None,
}

impl HistoricalEvent {
    /// A preview blob wins over the remote thumbnail. Bundled local images are
    /// resolved through the manifest and leave both fields empty.
    pub fn image_source(&self) -> ImageSource<'_> {
        if let Some(blob) = self.preview_blob.as_deref() {
            return ImageSource::Preview(blob);
        }
        match self.thumbnail_url.as_deref() {
            Some(u) if !u.is_empty() => ImageSource::Thumbnail(u),
            _ => ImageSource::None,
        }
    }

    pub fn day(&self) -> Option<NaiveDate> {
        parse_date(&self.date)
    }
}

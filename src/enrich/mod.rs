// src/enrich/mod.rs
//! Remote enrichment: metadata for a single source url, as an explicit
//! success/failure outcome so one bad row never aborts a batch.

pub mod prefetch;
pub mod preview;
pub mod wikipedia;

use async_trait::async_trait;
use std::sync::Arc;

/// Metadata a remote service may supply. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichData {
    pub title: Option<String>,
    pub extract: Option<String>,
    pub thumbnail_url: Option<String>,
    pub ru_url: Option<String>,
}

impl EnrichData {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.extract.is_none()
            && self.thumbnail_url.is_none()
            && self.ru_url.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichOutcome {
    Success(EnrichData),
    Failure { reason: String },
}

impl EnrichOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// `None` means "leave the stored metadata alone".
    pub fn data(&self) -> Option<&EnrichData> {
        match self {
            Self::Success(d) => Some(d),
            Self::Failure { .. } => None,
        }
    }
}

#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, url: &str) -> EnrichOutcome;

    /// Raw bytes of an image, used to build previews.
    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>>;

    fn name(&self) -> &'static str;
}

pub type DynEnricher = Arc<dyn Enricher>;

/// Always succeeds with nothing. Useful when the network is off.
pub struct OfflineEnricher;

#[async_trait]
impl Enricher for OfflineEnricher {
    async fn enrich(&self, _url: &str) -> EnrichOutcome {
        EnrichOutcome::Success(EnrichData::default())
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("offline: not downloading {url}")
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

/// Clean a plain-text extract: decode entities, strip tags, collapse
/// whitespace, then cap at `max_chars` characters.
pub fn clean_extract(s: &str, max_chars: usize) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_extract_collapses_and_truncates() {
        let s = "  Apollo&nbsp;11 was\n\n the <b>first</b>   crewed landing.  ";
        assert_eq!(clean_extract(s, 300), "Apollo 11 was the first crewed landing.");
        assert_eq!(clean_extract("ábcdé", 3), "ábc");
    }

    #[test]
    fn failure_has_no_data() {
        assert!(EnrichOutcome::failure("timeout").data().is_none());
        let ok = EnrichOutcome::Success(EnrichData::default());
        assert!(ok.data().unwrap().is_empty());
    }
}

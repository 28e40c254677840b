// src/enrich/wikipedia.rs
//! Wikipedia enrichment via the MediaWiki action API: canonical title, intro
//! extract, thumbnail and the Russian interlanguage link.

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

use super::{EnrichData, EnrichOutcome, Enricher};

/// Interlanguage link we look for.
pub const TARGET_LANG: &str = "ru";
const THUMB_SIZE: u32 = 640;

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A url we know how to enrich: `https://<lang>.wikipedia.org/wiki/<Title>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiPage {
    pub host: String,
    /// Decoded page title as it appears in the url (underscores kept).
    pub title: String,
}

impl WikiPage {
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        if !(host == "wikipedia.org" || host.ends_with(".wikipedia.org")) {
            return None;
        }
        let raw = parsed.path().strip_prefix("/wiki/")?;
        let title = percent_decode_str(raw).decode_utf8().ok()?.trim().to_string();
        if title.is_empty() {
            return None;
        }
        // Mobile hosts serve the same wiki.
        let host = host.replace(".m.wikipedia.org", ".wikipedia.org");
        Some(Self { host, title })
    }

    /// Best-effort display title from the url slug.
    pub fn display_title(&self) -> String {
        self.title.replace('_', " ")
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    query: Option<ApiQuery>,
}

#[derive(Debug, Deserialize)]
struct ApiQuery {
    #[serde(default)]
    pages: Vec<ApiPage>,
}

#[derive(Debug, Deserialize)]
struct ApiPage {
    title: Option<String>,
    extract: Option<String>,
    thumbnail: Option<ApiThumb>,
    #[serde(default)]
    langlinks: Vec<ApiLangLink>,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
}

#[derive(Debug, Deserialize)]
struct ApiThumb {
    source: String,
}

#[derive(Debug, Deserialize)]
struct ApiLangLink {
    lang: String,
    url: Option<String>,
    title: Option<String>,
}

fn lang_link_url(link: &ApiLangLink) -> Option<String> {
    if let Some(u) = link.url.as_deref().filter(|u| !u.is_empty()) {
        return Some(u.to_string());
    }
    let title = link.title.as_deref()?.trim();
    if title.is_empty() {
        return None;
    }
    let slug = title.replace(' ', "_");
    Some(format!(
        "https://{}.wikipedia.org/wiki/{}",
        link.lang,
        utf8_percent_encode(&slug, PATH_SEGMENT)
    ))
}

/// Turn an action-API JSON body (formatversion=2) into enrichment data.
/// A missing page yields only the slug-derived title.
pub fn parse_query_response(body: &str, page: &WikiPage) -> Result<EnrichData> {
    let resp: ApiResponse = serde_json::from_str(body).context("parsing wikipedia response")?;
    let Some(p) = resp.query.and_then(|q| q.pages.into_iter().next()) else {
        return Ok(EnrichData {
            title: Some(page.display_title()),
            ..Default::default()
        });
    };
    if p.missing || p.invalid {
        return Ok(EnrichData {
            title: Some(page.display_title()),
            ..Default::default()
        });
    }

    let ru_url = p
        .langlinks
        .iter()
        .find(|l| l.lang == TARGET_LANG)
        .and_then(lang_link_url);

    Ok(EnrichData {
        title: p
            .title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| Some(page.display_title())),
        extract: p.extract.filter(|e| !e.trim().is_empty()),
        thumbnail_url: p.thumbnail.map(|t| t.source).filter(|s| !s.is_empty()),
        ru_url,
    })
}

pub struct WikipediaClient {
    http: reqwest::Client,
    /// Overrides `https://<host>/w/api.php` when set.
    api_base: Option<String>,
}

impl WikipediaClient {
    pub fn new(user_agent: &str, timeout_secs: u64, api_base: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .context("building wikipedia http client")?;
        Ok(Self {
            http,
            api_base: api_base.filter(|s| !s.trim().is_empty()),
        })
    }

    fn endpoint(&self, page: &WikiPage) -> String {
        match &self.api_base {
            Some(base) => base.clone(),
            None => format!("https://{}/w/api.php", page.host),
        }
    }

    async fn query(&self, page: &WikiPage) -> Result<EnrichData> {
        let thumb = THUMB_SIZE.to_string();
        let resp = self
            .http
            .get(self.endpoint(page))
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("formatversion", "2"),
                ("prop", "extracts|pageimages|langlinks"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("piprop", "thumbnail"),
                ("pithumbsize", thumb.as_str()),
                ("lllang", TARGET_LANG),
                ("llprop", "url"),
                ("titles", page.title.as_str()),
            ])
            .send()
            .await
            .context("wikipedia http get()")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("wikipedia returned {status}");
        }
        let body = resp.text().await.context("wikipedia .text()")?;
        parse_query_response(&body, page)
    }
}

#[async_trait]
impl Enricher for WikipediaClient {
    async fn enrich(&self, url: &str) -> EnrichOutcome {
        let Some(page) = WikiPage::from_url(url) else {
            return EnrichOutcome::Success(EnrichData::default());
        };
        counter!("ingest_enrich_calls_total").increment(1);
        match self.query(&page).await {
            Ok(data) => EnrichOutcome::Success(data),
            Err(e) => {
                tracing::warn!(target: "enrich", url, error = ?e, "wikipedia enrichment failed");
                counter!("ingest_enrich_failures_total").increment(1);
                EnrichOutcome::failure(format!("{e:#}"))
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("downloading {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("image download {url} returned {status}");
        }
        let bytes = resp.bytes().await.context("image body")?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "wikipedia"
    }
}

// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::enrich::preview::DEFAULT_PREVIEW_MAX_DIM;
use crate::ingest::runner::DEFAULT_CONCURRENCY;
use crate::lanes::DEFAULT_WINDOW_DAYS;

pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";
pub const ENV_SOURCES_DIR: &str = "INGEST_SOURCES_DIR";
pub const ENV_STORE_PATH: &str = "INGEST_STORE_PATH";
pub const ENV_CONCURRENCY: &str = "INGEST_CONCURRENCY";
pub const ENV_INTERVAL_SECS: &str = "INGEST_INTERVAL_SECS";

pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory scanned for `*.tsv` source files.
    pub sources_dir: PathBuf,
    pub store_path: PathBuf,
    pub manifest_path: PathBuf,
    pub images_dir: PathBuf,
    pub concurrency: usize,
    pub lane_window_days: i64,
    pub summary_max_chars: usize,
    pub preview_max_dim: u32,
    /// Empty = `https://<host>/w/api.php` derived from each url.
    pub api_base: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// 0 disables the background scheduler.
    pub interval_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sources_dir: PathBuf::from("data/sources"),
            store_path: PathBuf::from("state/events.json"),
            manifest_path: PathBuf::from("data/images/manifest.json"),
            images_dir: PathBuf::from("data/images"),
            concurrency: DEFAULT_CONCURRENCY,
            lane_window_days: DEFAULT_WINDOW_DAYS,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            preview_max_dim: DEFAULT_PREVIEW_MAX_DIM,
            api_base: String::new(),
            user_agent: format!(
                "chronicle-ingest/{} (timeline catalog ingest)",
                env!("CARGO_PKG_VERSION")
            ),
            http_timeout_secs: 10,
            interval_secs: 0,
        }
    }
}

impl IngestConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ingest config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing ingest config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $INGEST_CONFIG_PATH
    /// 2) config/ingest.toml
    /// 3) config/ingest.json
    /// 4) defaults
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("config/ingest.toml");
            let json_p = PathBuf::from("config/ingest.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };
        Ok(base.with_env_overrides().sanitized())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var(ENV_SOURCES_DIR) {
            if !v.trim().is_empty() {
                self.sources_dir = PathBuf::from(v.trim());
            }
        }
        if let Ok(v) = std::env::var(ENV_STORE_PATH) {
            if !v.trim().is_empty() {
                self.store_path = PathBuf::from(v.trim());
            }
        }
        if let Some(n) = parse_env_num::<usize>(ENV_CONCURRENCY) {
            self.concurrency = n;
        }
        if let Some(n) = parse_env_num::<u64>(ENV_INTERVAL_SECS) {
            self.interval_secs = n;
        }
        self
    }

    fn sanitized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self.lane_window_days = self.lane_window_days.max(1);
        if self.summary_max_chars == 0 {
            self.summary_max_chars = DEFAULT_SUMMARY_MAX_CHARS;
        }
        if self.preview_max_dim == 0 {
            self.preview_max_dim = DEFAULT_PREVIEW_MAX_DIM;
        }
        if self.user_agent.trim().is_empty() {
            self.user_agent = Self::default().user_agent;
        }
        self
    }

    pub fn api_base(&self) -> Option<String> {
        let b = self.api_base.trim();
        (!b.is_empty()).then(|| b.to_string())
    }
}

fn parse_env_num<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<IngestConfig> {
    if hint_ext == "json" {
        return Ok(serde_json::from_str(s)?);
    }
    match toml::from_str::<IngestConfig>(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => serde_json::from_str(s).map_err(|_| anyhow!(toml_err)),
    }
}

// src/store.rs
//! Persistent event store. The ingest core only needs a CRUD-style surface;
//! every record passes through [`crate::schema`] on the way in and out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::event::HistoricalEvent;
use crate::schema::{decode_record, encode_record};

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<HistoricalEvent>>;
    async fn get_all(&self) -> Result<Vec<HistoricalEvent>>;
    /// Events with `from <= date <= to` (both `YYYY-MM-DD`).
    async fn get_range(&self, from: &str, to: &str) -> Result<Vec<HistoricalEvent>>;
    /// Insert or replace each record by id as one write.
    async fn bulk_upsert(&self, events: Vec<HistoricalEvent>) -> Result<usize>;
    /// Returns the number of records actually removed.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize>;
}

pub type DynEventStore = Arc<dyn EventStore>;

/// Records are kept in their stored (whitelisted JSON) shape, keyed by id,
/// so reads go through the same decode path as the file-backed store.
#[derive(Debug, Default)]
struct Records {
    by_id: BTreeMap<String, Value>,
}

impl Records {
    fn decode_all(&self) -> Vec<HistoricalEvent> {
        let mut out = Vec::with_capacity(self.by_id.len());
        for (id, raw) in &self.by_id {
            match decode_record(raw.clone()) {
                Ok(ev) => out.push(ev),
                Err(e) => tracing::warn!(target: "store", id = %id, error = ?e, "skipping undecodable record"),
            }
        }
        out
    }

    fn upsert(&mut self, events: Vec<HistoricalEvent>) -> Result<usize> {
        let mut n = 0;
        for ev in events {
            let rec = encode_record(&ev)?;
            self.by_id.insert(ev.id, rec);
            n += 1;
        }
        Ok(n)
    }

    fn delete(&mut self, ids: &[String]) -> usize {
        ids.iter().filter(|id| self.by_id.remove(id.as_str()).is_some()).count()
    }
}

fn in_range(ev: &HistoricalEvent, from: &str, to: &str) -> bool {
    // Fixed-width dates compare correctly as strings.
    ev.date.as_str() >= from && ev.date.as_str() <= to
}

/// In-process store, used by tests and as a scratch backend.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Records>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw record, bypassing the schema layer on write.
    pub async fn insert_raw(&self, id: &str, raw: Value) {
        self.inner.write().await.by_id.insert(id.to_string(), raw);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<HistoricalEvent>> {
        let guard = self.inner.read().await;
        guard.by_id.get(id).cloned().map(decode_record).transpose()
    }

    async fn get_all(&self) -> Result<Vec<HistoricalEvent>> {
        Ok(self.inner.read().await.decode_all())
    }

    async fn get_range(&self, from: &str, to: &str) -> Result<Vec<HistoricalEvent>> {
        let mut v = self.get_all().await?;
        v.retain(|e| in_range(e, from, to));
        Ok(v)
    }

    async fn bulk_upsert(&self, events: Vec<HistoricalEvent>) -> Result<usize> {
        self.inner.write().await.upsert(events)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        Ok(self.inner.write().await.delete(ids))
    }
}

/// Whole-set JSON array on disk, loaded once on open and rewritten
/// (tmp file + rename) after every mutating call.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: Arc<RwLock<Records>>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut records = Records::default();
        match tokio::fs::read_to_string(&path).await {
            Ok(s) if !s.trim().is_empty() => {
                let items: Vec<Value> = serde_json::from_str(&s)
                    .with_context(|| format!("parsing event store {}", path.display()))?;
                for raw in items {
                    let id = raw.get("id").and_then(Value::as_str).map(str::to_string);
                    match id {
                        Some(id) => {
                            records.by_id.insert(id, raw);
                        }
                        None => tracing::warn!(target: "store", "dropping stored record without id"),
                    }
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("reading event store {}", path.display()))
            }
        }
        tracing::info!(target: "store", path = %path.display(), records = records.by_id.len(), "event store opened");
        Ok(Self {
            path,
            inner: Arc::new(RwLock::new(records)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, records: &Records) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let items: Vec<&Value> = records.by_id.values().collect();
        let body = serde_json::to_vec_pretty(&items).context("serializing event store")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for JsonFileStore {
    async fn get(&self, id: &str) -> Result<Option<HistoricalEvent>> {
        let guard = self.inner.read().await;
        guard.by_id.get(id).cloned().map(decode_record).transpose()
    }

    async fn get_all(&self) -> Result<Vec<HistoricalEvent>> {
        Ok(self.inner.read().await.decode_all())
    }

    async fn get_range(&self, from: &str, to: &str) -> Result<Vec<HistoricalEvent>> {
        let mut v = self.get_all().await?;
        v.retain(|e| in_range(e, from, to));
        Ok(v)
    }

    async fn bulk_upsert(&self, events: Vec<HistoricalEvent>) -> Result<usize> {
        let mut guard = self.inner.write().await;
        let n = guard.upsert(events)?;
        self.flush(&guard).await?;
        Ok(n)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        let mut guard = self.inner.write().await;
        let n = guard.delete(ids);
        if n > 0 {
            self.flush(&guard).await?;
        }
        Ok(n)
    }
}

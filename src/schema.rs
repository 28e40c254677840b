// src/schema.rs
//! Storage-boundary schema: the fixed field whitelist and the normalization
//! applied on every read and write path of the event store.

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::event::{HistoricalEvent, DEFAULT_IMPORTANCE, MAX_LANES};

/// Every field a persisted event may carry. Anything else is legacy.
pub const STORED_FIELDS: &[&str] = &[
    "id",
    "date",
    "url",
    "title",
    "lang",
    "thumbnailUrl",
    "previewBlob",
    "summary",
    "ruUrl",
    "importance",
    "sourceFile",
    "sourceLine",
    "updatedAt",
    "enrichVersion",
    "laneIndex",
];

/// Drop every key not in [`STORED_FIELDS`]. Returns how many were dropped.
pub fn strip_unknown(record: &mut Map<String, Value>) -> usize {
    let before = record.len();
    record.retain(|k, _| STORED_FIELDS.contains(&k.as_str()));
    before - record.len()
}

/// Turn a raw stored record into a domain event.
///
/// Legacy keys are removed, `importance` is clamped into 1..=5 and an
/// out-of-range `laneIndex` is discarded so it gets reassigned on the next run.
pub fn decode_record(raw: Value) -> Result<HistoricalEvent> {
    let mut map = match raw {
        Value::Object(m) => m,
        other => anyhow::bail!("stored record is not an object: {other}"),
    };
    let dropped = strip_unknown(&mut map);
    if dropped > 0 {
        tracing::debug!(target: "store", dropped, "stripped legacy fields on read");
    }

    let mut ev: HistoricalEvent =
        serde_json::from_value(Value::Object(map)).context("decoding stored event")?;
    sanitize(&mut ev);
    Ok(ev)
}

/// Serialize a domain event into its whitelisted stored shape.
pub fn encode_record(ev: &HistoricalEvent) -> Result<Value> {
    let mut ev = ev.clone();
    sanitize(&mut ev);
    let mut value = serde_json::to_value(&ev).context("encoding event")?;
    if let Value::Object(map) = &mut value {
        strip_unknown(map);
    }
    Ok(value)
}

fn sanitize(ev: &mut HistoricalEvent) {
    if ev.importance == 0 {
        ev.importance = DEFAULT_IMPORTANCE;
    }
    ev.importance = ev.importance.clamp(1, 5);
    if ev.lane_index.is_some_and(|l| l >= MAX_LANES) {
        ev.lane_index = None;
    }
    if ev.thumbnail_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
        ev.thumbnail_url = None;
    }
    if ev.preview_blob.as_ref().is_some_and(|b| b.is_empty()) {
        ev.preview_blob = None;
    }
}

/// Base64 (standard alphabet) encoding for `previewBlob`.
pub mod blob {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(s) if !s.is_empty() => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

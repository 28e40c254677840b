// src/lanes.rs
//! Lane assignment: spreads events over `MAX_LANES` display tracks so that
//! events close in time do not collide. Runs at ingest time only; the stored
//! `laneIndex` is what renderers read.

use chrono::NaiveDate;

use crate::event::{HistoricalEvent, MAX_LANES};

/// Canonical collision window in days, independent of any zoom level.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

const OVERFLOW_LANE: u8 = MAX_LANES - 1;
const COLLIDABLE: usize = (MAX_LANES - 1) as usize;

/// Multiplicative string hash (`h = h * 31 + byte`, wrapping).
pub fn string_hash(s: &str) -> u32 {
    s.bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)))
}

pub fn base_lane(id: &str) -> usize {
    string_hash(id) as usize % COLLIDABLE
}

/// Half-open `[s1,e1)` vs `[s2,e2)`.
pub fn overlaps(a: (i64, i64), b: (i64, i64)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

fn day_number(ev: &HistoricalEvent) -> i64 {
    // Unparseable dates were rejected by the parser; treat any stragglers
    // as the earliest date so they still get a lane.
    ev.day()
        .unwrap_or(NaiveDate::MIN)
        .signed_duration_since(NaiveDate::MIN)
        .num_days()
}

#[derive(Debug, Clone)]
pub struct LaneAssigner {
    window_days: i64,
}

impl Default for LaneAssigner {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_DAYS)
    }
}

impl LaneAssigner {
    pub fn new(window_days: i64) -> Self {
        Self {
            window_days: window_days.max(1),
        }
    }

    fn interval(&self, ev: &HistoricalEvent) -> (i64, i64) {
        let d = day_number(ev);
        let half = self.window_days / 2;
        (d - half, d + (self.window_days - half))
    }

    /// Tag every event with a lane in `[0, MAX_LANES)`.
    ///
    /// Events are visited by `(date, id)`, so the result depends only on the
    /// set of events and never on the input order. Among free collidable lanes
    /// the least loaded wins; equal loads go to the one reached first when
    /// probing cyclically from the id's base lane. With no free collidable
    /// lane the event lands on the overflow lane, which is not collision
    /// tracked.
    pub fn assign(&self, mut events: Vec<HistoricalEvent>) -> Vec<HistoricalEvent> {
        events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

        let mut placed: Vec<Vec<(i64, i64)>> = vec![Vec::new(); COLLIDABLE];

        for ev in events.iter_mut() {
            let span = self.interval(ev);
            let base = base_lane(&ev.id);

            let mut chosen: Option<usize> = None;
            for step in 0..COLLIDABLE {
                let lane = (base + step) % COLLIDABLE;
                if placed[lane].iter().any(|iv| overlaps(*iv, span)) {
                    continue;
                }
                chosen = match chosen {
                    Some(prev) if placed[prev].len() <= placed[lane].len() => Some(prev),
                    _ => Some(lane),
                };
            }

            match chosen {
                Some(lane) => {
                    placed[lane].push(span);
                    ev.lane_index = Some(lane as u8);
                }
                None => ev.lane_index = Some(OVERFLOW_LANE),
            }
        }

        let overflow = events
            .iter()
            .filter(|e| e.lane_index == Some(OVERFLOW_LANE))
            .count();
        tracing::debug!(target: "ingest", total = events.len(), overflow, "lanes assigned");
        events
    }
}

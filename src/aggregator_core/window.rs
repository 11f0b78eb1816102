//! Tumbling window aggregation keyed by event time

use super::normalizer::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Half-open interval `[start, end)` in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowKey {
    pub start: i64,
    pub end: i64,
}

impl WindowKey {
    pub fn for_event_time(event_time: i64, window_length_ms: i64) -> Self {
        let start = event_time.div_euclid(window_length_ms) * window_length_ms;
        Self {
            start,
            end: start + window_length_ms,
        }
    }

    pub fn contains(&self, event_time: i64) -> bool {
        event_time >= self.start && event_time < self.end
    }
}

/// Running statistics for one open window
///
/// Close price mean and variance use Welford's update so long windows do not
/// lose precision the way a raw sum of squares does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    pub count: u64,
    pub mean_close: f64,
    m2_close: f64,
    pub min_close: f64,
    pub max_close: f64,
    pub sum_volume: f64,
}

impl WindowState {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean_close: 0.0,
            m2_close: 0.0,
            min_close: f64::INFINITY,
            max_close: f64::NEG_INFINITY,
            sum_volume: 0.0,
        }
    }

    /// Fold a record in; refused (state untouched) if any aggregate would
    /// stop being finite
    pub fn merge(&mut self, record: &Record) -> bool {
        let count = self.count + 1;
        let delta = record.close - self.mean_close;
        let mean_close = self.mean_close + delta / count as f64;
        let m2_close = self.m2_close + delta * (record.close - mean_close);
        let sum_volume = self.sum_volume + record.volume;

        if !(mean_close.is_finite() && m2_close.is_finite() && sum_volume.is_finite()) {
            return false;
        }

        self.count = count;
        self.mean_close = mean_close;
        self.m2_close = m2_close;
        self.min_close = self.min_close.min(record.close);
        self.max_close = self.max_close.max(record.close);
        self.sum_volume = sum_volume;
        true
    }

    /// Population variance of close; 0 below two records
    pub fn population_variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2_close / self.count as f64).max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for WindowState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only snapshot of a window the watermark has closed
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedWindow {
    pub key: WindowKey,
    pub state: WindowState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Merged(WindowKey),
    /// The record's window had already closed; nothing was merged
    LateDropped(WindowKey),
    /// Merging would overflow the window's aggregates; nothing was merged
    Overflowed(WindowKey),
}

/// Live window states plus windows sealed by the watermark but not yet drained
///
/// `live` only holds windows with `end > watermark`, which keeps it within
/// `max_live_windows()` regardless of how far the input is skewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStore {
    window_length_ms: i64,
    allowed_lateness_ms: i64,
    live: BTreeMap<i64, WindowState>,
    sealed: Vec<(WindowKey, WindowState)>,
    merged_records: u64,
    late_dropped: u64,
    #[serde(default)]
    overflowed: u64,
}

impl WindowStore {
    pub fn new(window_length_ms: i64, allowed_lateness_ms: i64) -> Self {
        Self {
            window_length_ms,
            allowed_lateness_ms: allowed_lateness_ms.max(0),
            live: BTreeMap::new(),
            sealed: Vec::new(),
            merged_records: 0,
            late_dropped: 0,
            overflowed: 0,
        }
    }

    /// Merge a record into its window unless the watermark already closed it
    pub fn ingest(&mut self, record: &Record, watermark: i64) -> IngestOutcome {
        self.seal_closed(watermark);

        let key = WindowKey::for_event_time(record.event_time, self.window_length_ms);
        if key.end <= watermark {
            self.late_dropped += 1;
            return IngestOutcome::LateDropped(key);
        }

        // A refused first record must not leave an empty window behind
        let merged = match self.live.get_mut(&key.start) {
            Some(state) => state.merge(record),
            None => {
                let mut state = WindowState::new();
                let merged = state.merge(record);
                if merged {
                    self.live.insert(key.start, state);
                }
                merged
            }
        };
        if !merged {
            self.overflowed += 1;
            return IngestOutcome::Overflowed(key);
        }
        self.merged_records += 1;

        IngestOutcome::Merged(key)
    }

    /// Return and evict every window with `end <= watermark`, ascending by start
    pub fn drain_finalized(&mut self, watermark: i64) -> Vec<FinalizedWindow> {
        self.seal_closed(watermark);

        let mut finalized: Vec<FinalizedWindow> = std::mem::take(&mut self.sealed)
            .into_iter()
            .filter(|(_, state)| !state.is_empty())
            .map(|(key, state)| FinalizedWindow { key, state })
            .collect();
        finalized.sort_by_key(|w| w.key.start);
        finalized
    }

    fn seal_closed(&mut self, watermark: i64) {
        while let Some(entry) = self.live.first_entry() {
            let start = *entry.key();
            let key = WindowKey {
                start,
                end: start + self.window_length_ms,
            };
            if key.end > watermark {
                break;
            }
            let state = entry.remove();
            log::debug!("🔒 Sealed window [{}, {}) with {} records", key.start, key.end, state.count);
            self.sealed.push((key, state));
        }
    }

    /// Upper bound on open windows: `ceil(lateness / length) + 1`
    pub fn max_live_windows(&self) -> usize {
        let spans = self
            .allowed_lateness_ms
            .saturating_add(self.window_length_ms - 1)
            / self.window_length_ms;
        spans as usize + 1
    }

    pub fn live_windows(&self) -> usize {
        self.live.len()
    }

    pub fn get(&self, key: &WindowKey) -> Option<&WindowState> {
        self.live.get(&key.start)
    }

    pub fn merged_records(&self) -> u64 {
        self.merged_records
    }

    pub fn late_dropped(&self) -> u64 {
        self.late_dropped
    }

    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    pub fn window_length_ms(&self) -> i64 {
        self.window_length_ms
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness_ms
    }
}

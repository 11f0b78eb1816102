//! Stream Engine - watermark, window store and alert rule as one owned value
//!
//! ```text
//! Record
//!     ↓
//! StreamEngine::process_record()
//!     ├─ WatermarkTracker::observe
//!     └─ WindowStore::ingest
//!     ↓
//! StreamEngine::finalize()
//!     ↓
//! Vec<AlertedWindow>
//! ```
//!
//! The engine is plain data: the driver clones it at the start of a cycle and
//! only keeps the clone once the cycle's checkpoint commits.

use super::checkpoint::CheckpointError;
use crate::aggregator_core::{
    AlertRule, AlertedWindow, IngestOutcome, Record, WatermarkTracker, WindowStore,
};
use crate::config::EngineConfig;
use serde::{Deserialize, Serialize};

/// Persisted engine state, stored alongside the source cursor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub window_length_ms: i64,
    pub allowed_lateness_ms: i64,
    pub max_event_time_seen: Option<i64>,
    pub store: WindowStore,
}

/// Per-batch ingestion counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub merged: usize,
    pub late_dropped: usize,
    /// Finite rows whose values would overflow their window's aggregates
    pub overflowed: usize,
}

#[derive(Debug, Clone)]
pub struct StreamEngine {
    tracker: WatermarkTracker,
    store: WindowStore,
    rule: AlertRule,
}

impl StreamEngine {
    pub fn new(window_length_ms: i64, allowed_lateness_ms: i64, rule: AlertRule) -> Self {
        Self {
            tracker: WatermarkTracker::new(allowed_lateness_ms),
            store: WindowStore::new(window_length_ms, allowed_lateness_ms),
            rule,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.window_length_ms(),
            config.allowed_lateness_ms(),
            AlertRule::new(config.spike_threshold_ratio),
        )
    }

    /// Rebuild from a checkpoint taken with the same window geometry
    ///
    /// A different window length or lateness would reinterpret persisted
    /// windows and could move the watermark backwards, so both must match.
    pub fn restore(
        snapshot: EngineSnapshot,
        config: &EngineConfig,
    ) -> Result<Self, CheckpointError> {
        if snapshot.window_length_ms != config.window_length_ms()
            || snapshot.allowed_lateness_ms != config.allowed_lateness_ms()
        {
            return Err(CheckpointError::Incompatible(format!(
                "checkpoint was written with window={}ms lateness={}ms, configuration has window={}ms lateness={}ms",
                snapshot.window_length_ms,
                snapshot.allowed_lateness_ms,
                config.window_length_ms(),
                config.allowed_lateness_ms(),
            )));
        }

        if snapshot.store.window_length_ms() != snapshot.window_length_ms {
            return Err(CheckpointError::Corrupt(
                "window store geometry does not match snapshot header".to_string(),
            ));
        }

        Ok(Self {
            tracker: WatermarkTracker::restore(
                snapshot.allowed_lateness_ms,
                snapshot.max_event_time_seen,
            ),
            store: snapshot.store,
            rule: AlertRule::new(config.spike_threshold_ratio),
        })
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            window_length_ms: self.store.window_length_ms(),
            allowed_lateness_ms: self.tracker.allowed_lateness_ms(),
            max_event_time_seen: self.tracker.max_event_time_seen(),
            store: self.store.clone(),
        }
    }

    /// Advance the watermark with the record, then merge it into its window
    pub fn process_record(&mut self, record: &Record) -> IngestOutcome {
        let watermark = self.tracker.observe(record.event_time);
        let outcome = self.store.ingest(record, watermark);

        match outcome {
            IngestOutcome::LateDropped(key) => log::debug!(
                "⏰ Late record dropped: event_time={} window=[{}, {}) watermark={}",
                record.event_time,
                key.start,
                key.end,
                watermark
            ),
            IngestOutcome::Overflowed(key) => log::warn!(
                "⚠️  Record rejected, aggregates of window [{}, {}) would overflow: close={} volume={}",
                key.start,
                key.end,
                record.close,
                record.volume
            ),
            IngestOutcome::Merged(_) => {}
        }

        outcome
    }

    pub fn ingest_batch(&mut self, records: &[Record]) -> IngestStats {
        let mut stats = IngestStats::default();
        for record in records {
            match self.process_record(record) {
                IngestOutcome::Merged(_) => stats.merged += 1,
                IngestOutcome::LateDropped(_) => stats.late_dropped += 1,
                IngestOutcome::Overflowed(_) => stats.overflowed += 1,
            }
        }
        stats
    }

    /// Drain closed windows and evaluate the alert rule on each
    pub fn finalize(&mut self) -> Vec<AlertedWindow> {
        let watermark = self.tracker.watermark();
        self.store
            .drain_finalized(watermark)
            .iter()
            .filter_map(|window| self.rule.evaluate(window))
            .collect()
    }

    pub fn watermark(&self) -> i64 {
        self.tracker.watermark()
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }
}

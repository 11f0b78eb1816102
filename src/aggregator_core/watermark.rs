//! Event-time watermark tracking
//!
//! The watermark is `max_event_time_seen - allowed_lateness` and only ever
//! moves forward. Before the first observation it sits at `WATERMARK_MIN`.

use serde::{Deserialize, Serialize};

pub const WATERMARK_MIN: i64 = i64::MIN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkTracker {
    max_event_time_seen: Option<i64>,
    allowed_lateness_ms: i64,
}

impl WatermarkTracker {
    pub fn new(allowed_lateness_ms: i64) -> Self {
        Self {
            max_event_time_seen: None,
            allowed_lateness_ms: allowed_lateness_ms.max(0),
        }
    }

    /// Rebuild a tracker from a persisted max event time
    pub fn restore(allowed_lateness_ms: i64, max_event_time_seen: Option<i64>) -> Self {
        Self {
            max_event_time_seen,
            allowed_lateness_ms: allowed_lateness_ms.max(0),
        }
    }

    /// Record an event time and return the resulting watermark
    ///
    /// Late arrivals (event_time below the current max) leave it unchanged.
    pub fn observe(&mut self, event_time: i64) -> i64 {
        self.max_event_time_seen = Some(match self.max_event_time_seen {
            Some(max) => max.max(event_time),
            None => event_time,
        });
        self.watermark()
    }

    pub fn watermark(&self) -> i64 {
        match self.max_event_time_seen {
            Some(max) => max.saturating_sub(self.allowed_lateness_ms),
            None => WATERMARK_MIN,
        }
    }

    pub fn max_event_time_seen(&self) -> Option<i64> {
        self.max_event_time_seen
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness_ms
    }
}

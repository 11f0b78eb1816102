//! Price-spike alert evaluation with a configurable threshold

use super::window::FinalizedWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alert {
    #[serde(rename = "NOMINAL")]
    Nominal,
    #[serde(rename = "PRICE_SPIKE")]
    PriceSpike,
}

impl Alert {
    pub fn as_str(&self) -> &'static str {
        match self {
            Alert::Nominal => "NOMINAL",
            Alert::PriceSpike => "PRICE_SPIKE",
        }
    }

    pub fn is_nominal(&self) -> bool {
        matches!(self, Alert::Nominal)
    }
}

/// One output row per finalized window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertedWindow {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub volatility: f64,
    pub total_volume: f64,
    pub record_count: u64,
    pub alert: Alert,
}

impl AlertedWindow {
    /// Idempotency key used by the sinks
    pub fn window_end_ms(&self) -> i64 {
        self.window_end.timestamp_millis()
    }
}

#[derive(Debug, Clone)]
pub struct AlertRule {
    spike_threshold_ratio: f64,
}

impl AlertRule {
    pub fn new(spike_threshold_ratio: f64) -> Self {
        Self { spike_threshold_ratio }
    }

    pub fn with_defaults() -> Self {
        Self::new(1.02)
    }

    pub fn spike_threshold_ratio(&self) -> f64 {
        self.spike_threshold_ratio
    }

    /// PriceSpike when the window max exceeds the average by the ratio
    pub fn classify(&self, avg_price: f64, max_price: f64) -> Alert {
        if max_price > avg_price * self.spike_threshold_ratio {
            Alert::PriceSpike
        } else {
            Alert::Nominal
        }
    }

    /// Compute output statistics and the alert verdict for a closed window
    ///
    /// Returns `None` for a window with no records, or one whose bounds chrono
    /// cannot represent; such windows are never emitted.
    pub fn evaluate(&self, window: &FinalizedWindow) -> Option<AlertedWindow> {
        let state = &window.state;
        if state.is_empty() {
            return None;
        }

        let (Some(window_start), Some(window_end)) = (
            DateTime::from_timestamp_millis(window.key.start),
            DateTime::from_timestamp_millis(window.key.end),
        ) else {
            log::warn!(
                "⚠️  Dropping window [{}, {}) with {} records: bounds outside the representable date range",
                window.key.start,
                window.key.end,
                state.count
            );
            return None;
        };

        let avg_price = state.mean_close;
        let max_price = state.max_close;

        Some(AlertedWindow {
            window_start,
            window_end,
            avg_price,
            min_price: state.min_close,
            max_price,
            volatility: state.population_variance().sqrt(),
            total_volume: state.sum_volume,
            record_count: state.count,
            alert: self.classify(avg_price, max_price),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator_core::normalizer::Record;
    use crate::aggregator_core::window::{WindowKey, WindowState};

    const BASE: i64 = 1_700_000_400_000;

    fn window_with_closes(closes: &[f64]) -> FinalizedWindow {
        let mut state = WindowState::new();
        for (i, close) in closes.iter().enumerate() {
            state.merge(&Record {
                event_time: BASE + i as i64 * 60_000,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: 1.5,
            });
        }
        FinalizedWindow {
            key: WindowKey::for_event_time(BASE, 600_000),
            state,
        }
    }

    #[test]
    fn test_price_spike_signal() {
        let rule = AlertRule::with_defaults();
        let out = rule.evaluate(&window_with_closes(&[100.0, 101.0, 99.0, 102.0, 150.0])).unwrap();

        assert!((out.avg_price - 110.4).abs() < 1e-9);
        assert_eq!(out.max_price, 150.0);
        assert_eq!(out.min_price, 99.0);
        assert_eq!(out.total_volume, 7.5);
        assert_eq!(out.record_count, 5);
        assert_eq!(out.alert, Alert::PriceSpike);
    }

    #[test]
    fn test_nominal_signal() {
        let rule = AlertRule::with_defaults();
        let out = rule.evaluate(&window_with_closes(&[100.0, 101.0, 99.0, 102.0])).unwrap();

        assert!((out.avg_price - 100.5).abs() < 1e-9);
        assert_eq!(out.max_price, 102.0);
        assert_eq!(out.alert, Alert::Nominal);
    }

    #[test]
    fn test_volatility_is_population_stddev() {
        let rule = AlertRule::with_defaults();
        let out = rule.evaluate(&window_with_closes(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0])).unwrap();
        assert!((out.volatility - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_record_window() {
        let rule = AlertRule::with_defaults();
        let out = rule.evaluate(&window_with_closes(&[100.0])).unwrap();
        assert_eq!(out.volatility, 0.0);
        assert_eq!(out.alert, Alert::Nominal);
    }

    #[test]
    fn test_empty_window_not_emitted() {
        let rule = AlertRule::with_defaults();
        assert!(rule.evaluate(&window_with_closes(&[])).is_none());
    }

    #[test]
    fn test_unrepresentable_window_not_emitted() {
        let mut window = window_with_closes(&[100.0]);
        window.key = WindowKey {
            start: i64::MAX - 600_000,
            end: i64::MAX,
        };
        assert!(AlertRule::with_defaults().evaluate(&window).is_none());

        let latest = WindowKey::for_event_time(crate::aggregator_core::normalizer::MAX_EVENT_TIME_MS, 366 * 86_400_000);
        window.key = latest;
        assert!(AlertRule::with_defaults().evaluate(&window).is_some());
    }

    #[test]
    fn test_threshold_is_tunable() {
        let strict = AlertRule::new(1.001);
        let loose = AlertRule::new(1.5);
        let window = window_with_closes(&[100.0, 101.0, 99.0, 102.0]);

        assert_eq!(strict.evaluate(&window).unwrap().alert, Alert::PriceSpike);
        assert_eq!(loose.evaluate(&window).unwrap().alert, Alert::Nominal);
    }

    #[test]
    fn test_output_serialization() {
        let rule = AlertRule::with_defaults();
        let out = rule.evaluate(&window_with_closes(&[100.0, 150.0])).unwrap();
        let json = serde_json::to_string(&out).unwrap();

        assert!(json.contains("\"alert\":\"PRICE_SPIKE\""));
        assert!(json.contains("\"window_start\":\"2023-11-14T22:20:00Z\""));
        assert_eq!(out.window_end_ms(), BASE + 600_000);
    }
}

//! Integration tests for event-time windowing through the public engine API
//!
//! - Spike and nominal windows (5-record and 4-record closes)
//! - Late data for a finalized window is dropped and never reopens it
//! - Shuffled arrival orders: every emitted window matches the records that
//!   were accepted for it

#[cfg(test)]
mod window_scenario_tests {
    use ohlcflow::aggregator_core::{decode_batch, encode_batch, Alert, Record, WindowKey};
    use ohlcflow::config::EngineConfig;
    use ohlcflow::pipeline::StreamEngine;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    const BASE: i64 = 1_700_000_400_000;
    const MINUTE: i64 = 60_000;
    const WINDOW: i64 = 10 * MINUTE;
    const LATENESS: i64 = 5 * MINUTE;

    fn record(event_time: i64, close: f64, volume: f64) -> Record {
        Record {
            event_time,
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    fn engine() -> StreamEngine {
        StreamEngine::from_config(&EngineConfig::default())
    }

    #[test]
    fn test_spike_window_from_csv_batch() {
        let raw = b"Timestamp,Open,High,Low,Close,Volume\n\
                    1700000400,100,100,100,100,1\n\
                    1700000460,101,101,101,101,1\n\
                    1700000520,99,99,99,99,1\n\
                    1700000580,102,102,102,102,1\n\
                    1700000640,150,150,150,150,1\n\
                    1700001360,100,100,100,100,1\n";

        let batch = decode_batch(raw);
        assert!(batch.errors.is_empty());

        let mut engine = engine();
        engine.ingest_batch(&batch.records);
        let windows = engine.finalize();

        assert_eq!(windows.len(), 1);
        let window = &windows[0];
        assert_eq!(window.window_start.timestamp_millis(), BASE);
        assert_eq!(window.window_end.timestamp_millis(), BASE + WINDOW);
        assert!((window.avg_price - 110.4).abs() < 1e-9);
        assert_eq!(window.max_price, 150.0);
        assert_eq!(window.min_price, 99.0);
        assert_eq!(window.record_count, 5);
        assert_eq!(window.total_volume, 5.0);
        assert_eq!(window.alert, Alert::PriceSpike);
    }

    #[test]
    fn test_nominal_window() {
        let mut engine = engine();
        let closes = [100.0, 101.0, 99.0, 102.0];
        let mut records: Vec<Record> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| record(BASE + i as i64 * MINUTE, *c, 2.0))
            .collect();
        records.push(record(BASE + 20 * MINUTE, 100.0, 1.0));

        engine.ingest_batch(&records);
        let windows = engine.finalize();

        assert_eq!(windows.len(), 1);
        assert!((windows[0].avg_price - 100.5).abs() < 1e-9);
        assert_eq!(windows[0].max_price, 102.0);
        assert_eq!(windows[0].total_volume, 8.0);
        assert_eq!(windows[0].alert, Alert::Nominal);
    }

    #[test]
    fn test_late_record_after_finalization_is_dropped() {
        let mut engine = engine();
        engine.ingest_batch(&[record(BASE + MINUTE, 100.0, 1.0), record(BASE + 16 * MINUTE, 100.0, 1.0)]);

        let first = engine.finalize();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].record_count, 1);

        // Would turn the window into a spike if it were reopened
        let stats = engine.ingest_batch(&[record(BASE + 2 * MINUTE, 1_000.0, 1.0)]);
        assert_eq!(stats.late_dropped, 1);
        assert_eq!(engine.store().late_dropped(), 1);

        engine.ingest_batch(&[record(BASE + 60 * MINUTE, 100.0, 1.0)]);
        let later = engine.finalize();
        assert!(later.iter().all(|w| w.window_start.timestamp_millis() != BASE));
        assert!(later.iter().all(|w| w.max_price < 1_000.0));
    }

    #[test]
    fn test_record_inside_lateness_still_counts() {
        let mut engine = engine();
        // Watermark = BASE + 14min - 5min = BASE + 9min < window end
        engine.ingest_batch(&[record(BASE + 14 * MINUTE, 100.0, 1.0)]);
        let stats = engine.ingest_batch(&[record(BASE + 9 * MINUTE, 100.0, 1.0)]);
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.late_dropped, 0);
    }

    #[test]
    fn test_batch_wire_round_trip_feeds_same_windows() {
        let records: Vec<Record> = (0..30)
            .map(|i| record(BASE + i * MINUTE, 100.0 + (i % 7) as f64 * 0.25, 0.5))
            .collect();

        let raw = encode_batch(&records).unwrap();
        let decoded = decode_batch(&raw);
        assert_eq!(decoded.records, records);

        let mut direct = engine();
        direct.ingest_batch(&records);
        let mut via_wire = engine();
        via_wire.ingest_batch(&decoded.records);
        assert_eq!(direct.finalize(), via_wire.finalize());
    }

    #[derive(Default)]
    struct Expected {
        count: u64,
        sum_close: f64,
        min_close: f64,
        max_close: f64,
        sum_volume: f64,
    }

    /// Replays arrival order with the watermark rule to find the accepted records
    fn expected_windows(arrivals: &[Record]) -> BTreeMap<i64, Expected> {
        let mut max_seen = i64::MIN;
        let mut expected: BTreeMap<i64, Expected> = BTreeMap::new();

        for r in arrivals {
            max_seen = max_seen.max(r.event_time);
            let watermark = max_seen.saturating_sub(LATENESS);
            let key = WindowKey::for_event_time(r.event_time, WINDOW);
            if key.end <= watermark {
                continue;
            }

            let entry = expected.entry(key.start).or_insert_with(|| Expected {
                min_close: f64::INFINITY,
                max_close: f64::NEG_INFINITY,
                ..Expected::default()
            });
            entry.count += 1;
            entry.sum_close += r.close;
            entry.min_close = entry.min_close.min(r.close);
            entry.max_close = entry.max_close.max(r.close);
            entry.sum_volume += r.volume;
        }

        expected
    }

    #[test]
    fn test_shuffled_arrivals_match_accepted_records() {
        for seed in 0..20u64 {
            let mut rng = StdRng::seed_from_u64(seed);

            let mut records: Vec<Record> = (0..240)
                .map(|i| {
                    let event_time = BASE + i * 15_000 + rng.gen_range(0..15_000);
                    record(event_time, rng.gen_range(90.0..110.0), rng.gen_range(0.1..3.0))
                })
                .collect();

            // Local disorder: shuffle inside blocks, then swap a few far apart
            for block in records.chunks_mut(12) {
                block.shuffle(&mut rng);
            }
            for _ in 0..10 {
                let a = rng.gen_range(0..records.len());
                let b = rng.gen_range(0..records.len());
                records.swap(a, b);
            }

            // Far-future record flushes every earlier window
            records.push(record(BASE + 24 * 60 * MINUTE, 100.0, 1.0));

            let mut engine = engine();
            let mut emitted = Vec::new();
            for cycle in records.chunks(17) {
                engine.ingest_batch(cycle);
                emitted.extend(engine.finalize());
            }

            let expected = expected_windows(&records);
            let flush_window = WindowKey::for_event_time(BASE + 24 * 60 * MINUTE, WINDOW).start;

            let mut seen = std::collections::BTreeSet::new();
            for window in &emitted {
                let start = window.window_start.timestamp_millis();
                assert!(seen.insert(start), "seed {}: window {} emitted twice", seed, start);

                let exp = expected.get(&start).unwrap_or_else(|| panic!("seed {}: unexpected window {}", seed, start));
                assert_eq!(window.record_count, exp.count, "seed {}", seed);
                assert!((window.avg_price - exp.sum_close / exp.count as f64).abs() < 1e-9, "seed {}", seed);
                assert_eq!(window.min_price, exp.min_close);
                assert_eq!(window.max_price, exp.max_close);
                assert!((window.total_volume - exp.sum_volume).abs() < 1e-9);
            }

            for start in expected.keys().filter(|s| **s != flush_window) {
                assert!(seen.contains(start), "seed {}: window {} never emitted", seed, start);
            }
            assert!(!seen.contains(&flush_window));

            let late = records.len() as u64 - expected.values().map(|e| e.count).sum::<u64>();
            assert_eq!(engine.store().late_dropped(), late, "seed {}", seed);
        }
    }

    #[test]
    fn test_live_windows_stay_bounded() {
        let mut engine = engine();
        let bound = engine.store().max_live_windows();

        for i in 0..500 {
            engine.ingest_batch(&[record(BASE + i * 30_000, 100.0, 1.0)]);
            engine.finalize();
            assert!(engine.store().live_windows() <= bound);
        }
    }
}

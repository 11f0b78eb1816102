//! Engine configuration from environment variables
//!
//! Every setting has a default, so an empty environment yields a runnable
//! configuration.

use std::env;
use std::path::PathBuf;

/// Upper bound for window length and allowed lateness (366 days)
pub const MAX_DURATION_SECS: i64 = 366 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Jsonl,
    Sqlite,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Jsonl => "jsonl",
            BackendType::Sqlite => "sqlite",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "jsonl" => Some(BackendType::Jsonl),
            "sqlite" => Some(BackendType::Sqlite),
            _ => None,
        }
    }

    /// Look for `--backend <jsonl|sqlite>` in command-line arguments
    pub fn from_args(args: &[String]) -> Option<Self> {
        let idx = args.iter().position(|x| x == "--backend")?;
        args.get(idx + 1).and_then(|s| Self::from_str(s))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Bounded retry policy shared by batch fetches and sink writes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            max_attempts: 5,
        }
    }
}

/// Configuration for the streaming pipeline runtime
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory the batch producer drops CSV files into
    pub source_dir: PathBuf,

    /// Output location for every finalized window
    pub results_data_path: PathBuf,

    /// Output location for windows whose alert is not nominal
    pub results_alerts_path: PathBuf,

    /// SQLite checkpoint database (cursor, engine snapshot, sink commits)
    pub checkpoint_path: PathBuf,

    pub backend: BackendType,

    /// Tumbling window length in seconds
    pub window_length_secs: i64,

    /// Grace period subtracted from the max event time to form the watermark
    pub allowed_lateness_secs: i64,

    /// Micro-batch trigger interval in milliseconds
    pub trigger_interval_ms: u64,

    /// PriceSpike fires when max_price > avg_price * ratio
    pub spike_threshold_ratio: f64,

    /// Upper bound on batches consumed per cycle
    pub max_batches_per_cycle: usize,

    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("streaming_data"),
            results_data_path: PathBuf::from("results_data"),
            results_alerts_path: PathBuf::from("results_alerts"),
            checkpoint_path: PathBuf::from("checkpoints/pipeline.db"),
            backend: BackendType::Jsonl,
            window_length_secs: 10 * 60,
            allowed_lateness_secs: 5 * 60,
            trigger_interval_ms: 3_000,
            spike_threshold_ratio: 1.02,
            max_batches_per_cycle: 1,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `STREAM_SOURCE_DIR` (default: streaming_data)
    /// - `RESULTS_DATA_PATH` (default: results_data)
    /// - `RESULTS_ALERTS_PATH` (default: results_alerts)
    /// - `CHECKPOINT_PATH` (default: checkpoints/pipeline.db)
    /// - `SINK_BACKEND` (default: jsonl)
    /// - `WINDOW_LENGTH_SECS` (default: 600)
    /// - `ALLOWED_LATENESS_SECS` (default: 300)
    /// - `TRIGGER_INTERVAL_MS` (default: 3000)
    /// - `SPIKE_THRESHOLD_RATIO` (default: 1.02)
    /// - `MAX_BATCHES_PER_CYCLE` (default: 1)
    /// - `RETRY_INITIAL_DELAY_MS` / `RETRY_MAX_DELAY_MS` / `RETRY_MAX_ATTEMPTS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("SINK_BACKEND") {
            Some(raw) => BackendType::from_str(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(format!("SINK_BACKEND must be jsonl or sqlite, got '{}'", raw))
            })?,
            None => defaults.backend,
        };

        let config = Self {
            source_dir: lookup("STREAM_SOURCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.source_dir),
            results_data_path: lookup("RESULTS_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_data_path),
            results_alerts_path: lookup("RESULTS_ALERTS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_alerts_path),
            checkpoint_path: lookup("CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint_path),
            backend,
            window_length_secs: parse_or(&lookup, "WINDOW_LENGTH_SECS", defaults.window_length_secs)?,
            allowed_lateness_secs: parse_or(&lookup, "ALLOWED_LATENESS_SECS", defaults.allowed_lateness_secs)?,
            trigger_interval_ms: parse_or(&lookup, "TRIGGER_INTERVAL_MS", defaults.trigger_interval_ms)?,
            spike_threshold_ratio: parse_or(&lookup, "SPIKE_THRESHOLD_RATIO", defaults.spike_threshold_ratio)?,
            max_batches_per_cycle: parse_or(&lookup, "MAX_BATCHES_PER_CYCLE", defaults.max_batches_per_cycle)?,
            retry: RetryPolicy {
                initial_delay_ms: parse_or(&lookup, "RETRY_INITIAL_DELAY_MS", defaults.retry.initial_delay_ms)?,
                max_delay_ms: parse_or(&lookup, "RETRY_MAX_DELAY_MS", defaults.retry.max_delay_ms)?,
                max_attempts: parse_or(&lookup, "RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_length_secs <= 0 {
            return Err(ConfigError::InvalidValue(format!(
                "WINDOW_LENGTH_SECS must be positive, got {}",
                self.window_length_secs
            )));
        }

        if self.allowed_lateness_secs < 0 {
            return Err(ConfigError::InvalidValue(format!(
                "ALLOWED_LATENESS_SECS cannot be negative, got {}",
                self.allowed_lateness_secs
            )));
        }

        for (name, value) in [
            ("WINDOW_LENGTH_SECS", self.window_length_secs),
            ("ALLOWED_LATENESS_SECS", self.allowed_lateness_secs),
        ] {
            if value > MAX_DURATION_SECS {
                return Err(ConfigError::InvalidValue(format!(
                    "{} cannot exceed {} seconds, got {}",
                    name, MAX_DURATION_SECS, value
                )));
            }
        }

        if self.trigger_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "TRIGGER_INTERVAL_MS must be positive".to_string(),
            ));
        }

        if !self.spike_threshold_ratio.is_finite() || self.spike_threshold_ratio <= 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "SPIKE_THRESHOLD_RATIO must be a positive number, got {}",
                self.spike_threshold_ratio
            )));
        }

        if self.max_batches_per_cycle == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_BATCHES_PER_CYCLE must be at least 1".to_string(),
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidValue(
                "RETRY_INITIAL_DELAY_MS cannot exceed RETRY_MAX_DELAY_MS".to_string(),
            ));
        }

        Ok(())
    }

    pub fn window_length_ms(&self) -> i64 {
        self.window_length_secs.saturating_mul(1_000)
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness_secs.saturating_mul(1_000)
    }
}

/// Settings for the batch replay producer
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Historical CSV split into batches
    pub source_csv: PathBuf,

    /// Directory the pipeline reads batches from
    pub target_dir: PathBuf,

    pub chunk_size: usize,

    /// Pause between two batches in milliseconds
    pub delay_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            source_csv: PathBuf::from("bitcoin_data_sorted.csv"),
            target_dir: PathBuf::from("streaming_data"),
            chunk_size: 100,
            delay_ms: 2_000,
        }
    }
}

impl ReplayConfig {
    /// Environment variables:
    /// - `REPLAY_SOURCE_CSV` (default: bitcoin_data_sorted.csv)
    /// - `STREAM_SOURCE_DIR` (default: streaming_data)
    /// - `REPLAY_CHUNK_SIZE` (default: 100)
    /// - `REPLAY_DELAY_MS` (default: 2000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            source_csv: lookup("REPLAY_SOURCE_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.source_csv),
            target_dir: lookup("STREAM_SOURCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.target_dir),
            chunk_size: parse_or(&lookup, "REPLAY_CHUNK_SIZE", defaults.chunk_size)?,
            delay_ms: parse_or(&lookup, "REPLAY_DELAY_MS", defaults.delay_ms)?,
        };

        if config.chunk_size == 0 {
            return Err(ConfigError::InvalidValue(
                "REPLAY_CHUNK_SIZE must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} is not a valid value: '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.source_dir, PathBuf::from("streaming_data"));
        assert_eq!(config.results_data_path, PathBuf::from("results_data"));
        assert_eq!(config.results_alerts_path, PathBuf::from("results_alerts"));
        assert_eq!(config.backend, BackendType::Jsonl);
        assert_eq!(config.window_length_ms(), 600_000);
        assert_eq!(config.allowed_lateness_ms(), 300_000);
        assert_eq!(config.trigger_interval_ms, 3_000);
        assert_eq!(config.spike_threshold_ratio, 1.02);
        assert_eq!(config.max_batches_per_cycle, 1);
    }

    #[test]
    fn test_custom_config() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("STREAM_SOURCE_DIR", "/tmp/in"),
            ("SINK_BACKEND", "SQLite"),
            ("WINDOW_LENGTH_SECS", "60"),
            ("ALLOWED_LATENESS_SECS", "0"),
            ("SPIKE_THRESHOLD_RATIO", "1.05"),
            ("RETRY_MAX_ATTEMPTS", "2"),
        ]))
        .unwrap();

        assert_eq!(config.source_dir, PathBuf::from("/tmp/in"));
        assert_eq!(config.backend, BackendType::Sqlite);
        assert_eq!(config.window_length_ms(), 60_000);
        assert_eq!(config.allowed_lateness_ms(), 0);
        assert_eq!(config.spike_threshold_ratio, 1.05);
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn test_unparsable_value_is_rejected() {
        let err = EngineConfig::from_lookup(lookup_from(&[("WINDOW_LENGTH_SECS", "ten")]))
            .unwrap_err();
        assert!(err.to_string().contains("WINDOW_LENGTH_SECS"));
    }

    #[test]
    fn test_validation_rejects_non_positive_window() {
        assert!(EngineConfig::from_lookup(lookup_from(&[("WINDOW_LENGTH_SECS", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup_from(&[("SPIKE_THRESHOLD_RATIO", "NaN")])).is_err());
        assert!(EngineConfig::from_lookup(lookup_from(&[("MAX_BATCHES_PER_CYCLE", "0")])).is_err());
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let huge = i64::MAX.to_string();
        let err = EngineConfig::from_lookup(lookup_from(&[("WINDOW_LENGTH_SECS", huge.as_str())])).unwrap_err();
        assert!(err.to_string().contains("WINDOW_LENGTH_SECS"));

        let err = EngineConfig::from_lookup(lookup_from(&[("ALLOWED_LATENESS_SECS", huge.as_str())])).unwrap_err();
        assert!(err.to_string().contains("ALLOWED_LATENESS_SECS"));

        let at_limit = MAX_DURATION_SECS.to_string();
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("WINDOW_LENGTH_SECS", at_limit.as_str()),
            ("ALLOWED_LATENESS_SECS", at_limit.as_str()),
        ]))
        .unwrap();
        assert_eq!(config.window_length_ms(), MAX_DURATION_SECS * 1_000);

        let store = crate::aggregator_core::WindowStore::new(config.window_length_ms(), config.allowed_lateness_ms());
        assert_eq!(store.max_live_windows(), 2);

        let unchecked = EngineConfig {
            window_length_secs: i64::MAX,
            ..EngineConfig::default()
        };
        assert_eq!(unchecked.window_length_ms(), i64::MAX);
    }

    #[test]
    fn test_replay_config() {
        let defaults = ReplayConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(defaults.chunk_size, 100);
        assert_eq!(defaults.delay_ms, 2_000);
        assert_eq!(defaults.target_dir, PathBuf::from("streaming_data"));

        let custom = ReplayConfig::from_lookup(lookup_from(&[
            ("REPLAY_SOURCE_CSV", "btc.csv"),
            ("REPLAY_CHUNK_SIZE", "25"),
        ]))
        .unwrap();
        assert_eq!(custom.source_csv, PathBuf::from("btc.csv"));
        assert_eq!(custom.chunk_size, 25);

        assert!(ReplayConfig::from_lookup(lookup_from(&[("REPLAY_CHUNK_SIZE", "0")])).is_err());
    }

    #[test]
    fn test_backend_from_args() {
        let args: Vec<String> = ["stream_pipeline", "--backend", "sqlite"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(BackendType::from_args(&args), Some(BackendType::Sqlite));
        assert_eq!(BackendType::from_args(&args[..1]), None);
    }
}

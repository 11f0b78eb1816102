//! Stream Pipeline - micro-batch OHLCV window aggregation
//!
//! Picks up CSV batches from the source directory, aggregates closes into
//! tumbling windows behind an event-time watermark and writes every finalized
//! window to `results_data` and price spikes to `results_alerts`.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin stream_pipeline -- --backend sqlite
//! ```
//!
//! ## Environment Variables
//!
//! - STREAM_SOURCE_DIR - Batch directory (default: streaming_data)
//! - RESULTS_DATA_PATH / RESULTS_ALERTS_PATH - Sink locations (default: results_data / results_alerts)
//! - CHECKPOINT_PATH - Checkpoint database (default: checkpoints/pipeline.db)
//! - SINK_BACKEND - jsonl or sqlite, overridden by --backend (default: jsonl)
//! - WINDOW_LENGTH_SECS (default: 600), ALLOWED_LATENESS_SECS (default: 300)
//! - TRIGGER_INTERVAL_MS (default: 3000), MAX_BATCHES_PER_CYCLE (default: 1)
//! - SPIKE_THRESHOLD_RATIO (default: 1.02)
//! - RETRY_INITIAL_DELAY_MS / RETRY_MAX_DELAY_MS / RETRY_MAX_ATTEMPTS
//! - RUST_LOG - Logging level (optional, default: info)

use ohlcflow::config::{BackendType, EngineConfig};
use ohlcflow::pipeline::{CheckpointStore, DirectoryBatchSource, PipelineDriver, PipelineError};
use ohlcflow::sink_core::{open_backend, CheckpointedSinkWriter, SinkError, SinkFilter};
use std::env;
use tokio::sync::watch;

async fn open_sink(
    name: &str,
    filter: SinkFilter,
    backend: BackendType,
    path: &std::path::Path,
    checkpoint: &mut CheckpointStore,
) -> Result<CheckpointedSinkWriter, SinkError> {
    let storage = open_backend(backend, path)?;
    CheckpointedSinkWriter::open(name, filter, storage, checkpoint).await
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = EngineConfig::from_env().map_err(PipelineError::from)?;

    let args: Vec<String> = env::args().collect();
    if let Some(backend) = BackendType::from_args(&args) {
        config.backend = backend;
    }

    log::info!("🚀 Starting Stream Pipeline");
    log::info!("   Source: {}", config.source_dir.display());
    log::info!("   Results: {}", config.results_data_path.display());
    log::info!("   Alerts: {}", config.results_alerts_path.display());
    log::info!("   Checkpoint: {}", config.checkpoint_path.display());
    log::info!("   Backend: {}", config.backend.as_str());
    log::info!(
        "   Window: {}s, lateness: {}s, spike ratio: {}",
        config.window_length_secs,
        config.allowed_lateness_secs,
        config.spike_threshold_ratio
    );

    let mut checkpoint = CheckpointStore::open(&config.checkpoint_path).map_err(PipelineError::from)?;

    let sinks = vec![
        open_sink(
            "results_data",
            SinkFilter::All,
            config.backend,
            &config.results_data_path,
            &mut checkpoint,
        )
        .await?,
        open_sink(
            "results_alerts",
            SinkFilter::AlertsOnly,
            config.backend,
            &config.results_alerts_path,
            &mut checkpoint,
        )
        .await?,
    ];

    let source = DirectoryBatchSource::new(&config.source_dir).map_err(PipelineError::from)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut driver = PipelineDriver::new(&config, Box::new(source), sinks, checkpoint, shutdown_rx)?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("🛑 Ctrl+C received, finishing current stage"),
            Err(e) => log::error!("❌ Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    driver.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = run().await {
        log::error!("❌ Pipeline stopped: {}", e);
        std::process::exit(1);
    }
}

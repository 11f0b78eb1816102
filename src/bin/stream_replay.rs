//! Stream Replay - feeds a historical CSV to the pipeline in timed batches
//!
//! Splits the source CSV into `data_batch_NNNNN.csv` files of
//! `REPLAY_CHUNK_SIZE` rows, one every `REPLAY_DELAY_MS`. Numbering continues
//! after the highest batch already present unless `--fresh` is given, which
//! clears existing batches first.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin stream_replay -- --fresh
//! ```
//!
//! ## Environment Variables
//!
//! - REPLAY_SOURCE_CSV - Historical OHLCV CSV (default: bitcoin_data_sorted.csv)
//! - STREAM_SOURCE_DIR - Batch directory (default: streaming_data)
//! - REPLAY_CHUNK_SIZE - Rows per batch (default: 100)
//! - REPLAY_DELAY_MS - Delay between batches (default: 2000)
//! - RUST_LOG - Logging level (optional, default: info)

use ohlcflow::aggregator_core::RecordDecoder;
use ohlcflow::config::ReplayConfig;
use ohlcflow::replay::{clear_batches, next_batch_index, write_batch};
use std::env;
use std::fs::File;
use std::io::BufReader;
use tokio::time::{sleep, Duration};

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ReplayConfig::from_env()?;
    let fresh = env::args().any(|arg| arg == "--fresh");

    log::info!("🚀 Starting Stream Replay");
    log::info!("   Source CSV: {}", config.source_csv.display());
    log::info!("   Batch dir: {}", config.target_dir.display());
    log::info!("   Chunk size: {} rows every {}ms", config.chunk_size, config.delay_ms);

    std::fs::create_dir_all(&config.target_dir)?;
    if fresh {
        let removed = clear_batches(&config.target_dir)?;
        log::info!("🧹 Removed {} existing batches", removed);
    }

    let file = File::open(&config.source_csv).map_err(|e| {
        format!("cannot open {}: {}", config.source_csv.display(), e)
    })?;
    let mut decoder = RecordDecoder::new(BufReader::new(file));
    let mut index = next_batch_index(&config.target_dir)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut chunk = Vec::with_capacity(config.chunk_size);
    let mut batches_written = 0u64;
    let mut rows_skipped = 0u64;
    let mut exhausted = false;

    while !exhausted {
        chunk.clear();
        while chunk.len() < config.chunk_size {
            match decoder.next() {
                Some(Ok(record)) => chunk.push(record),
                Some(Err(e)) => {
                    log::warn!("⚠️  Skipping source row, {}", e);
                    rows_skipped += 1;
                }
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        if chunk.is_empty() {
            break;
        }

        let path = write_batch(&config.target_dir, index, &chunk)?;
        log::info!("📦 Wrote {} ({} records)", path.display(), chunk.len());
        index += 1;
        batches_written += 1;

        if exhausted {
            break;
        }

        tokio::select! {
            _ = sleep(Duration::from_millis(config.delay_ms)) => {}
            _ = &mut ctrl_c => {
                log::info!("🛑 Ctrl+C received, stopping replay");
                break;
            }
        }
    }

    log::info!(
        "✅ Replay finished: {} batches written, {} rows skipped",
        batches_written,
        rows_skipped
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = run().await {
        log::error!("❌ Replay failed: {}", e);
        std::process::exit(1);
    }
}

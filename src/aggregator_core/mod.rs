//! Aggregator Core - event-time windowing over OHLCV records
//!
//! # Architecture
//!
//! ```text
//! CSV batch → RecordDecoder → Record
//!     ↓
//! WatermarkTracker::observe (max event time - allowed lateness)
//!     ↓
//! WindowStore::ingest (tumbling windows, late records dropped)
//!     ↓
//! WindowStore::drain_finalized (windows with end <= watermark)
//!     ↓
//! AlertRule::evaluate → AlertedWindow
//! ```

pub mod detector;
pub mod normalizer;
pub mod watermark;
pub mod window;

pub use detector::{Alert, AlertRule, AlertedWindow};
pub use normalizer::{decode_batch, encode_batch, DecodedBatch, Record, RecordDecoder, RowError};
pub use watermark::{WatermarkTracker, WATERMARK_MIN};
pub use window::{FinalizedWindow, IngestOutcome, WindowKey, WindowState, WindowStore};

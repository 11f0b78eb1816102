//! # Micro-batch Pipeline
//!
//! Drives the aggregation engine over a directory of CSV batches and delivers
//! finalized windows to the configured sinks.
//!
//! ## Cycle
//!
//! ```text
//! DirectoryBatchSource::list_new_batches(cursor)
//!     ↓
//! StreamEngine (clone) ← decode + ingest every batch
//!     ↓
//! StreamEngine::finalize → Vec<AlertedWindow>
//!     ↓
//! CheckpointedSinkWriter::write (each sink, bounded retry)
//!     ↓
//! CheckpointStore::commit_cycle (cursor + engine snapshot)
//! ```
//!
//! ## Recovery
//!
//! The checkpoint holds the last consumed batch name, the engine snapshot and
//! the highest committed window end of each sink. After a crash the driver resumes
//! from the persisted cursor and state; windows a sink committed before the
//! crash are skipped on replay.
//!
//! ## Module Organization
//!
//! - `checkpoint` - SQLite checkpoint store (exclusive lock, cursor, sink commits)
//! - `driver` - cycle state machine and trigger loop
//! - `engine` - watermark + window store + alert rule
//! - `error` - pipeline-level errors
//! - `error_handler` - exponential backoff for retried steps
//! - `source` - batch source trait and directory implementation

pub mod checkpoint;
pub mod driver;
pub mod engine;
pub mod error;
pub mod error_handler;
pub mod source;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
pub use driver::{CycleOutcome, CycleReport, CycleStage, PipelineDriver, PipelineMetrics};
pub use engine::{EngineSnapshot, IngestStats, StreamEngine};
pub use error::PipelineError;
pub use error_handler::{ExponentialBackoff, MaxRetriesExceeded};
pub use source::{BatchId, BatchSource, DirectoryBatchSource, SourceError};

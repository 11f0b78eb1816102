//! Sink Core - exactly-once delivery of finalized windows
//!
//! ```text
//! Vec<AlertedWindow>
//!     ↓
//! CheckpointedSinkWriter (filter, skip committed)
//!     ├─ SinkBackend::commit_unit (JSONL part file | SQLite transaction)
//!     └─ CheckpointStore::mark_committed
//! ```

pub mod jsonl_writer;
pub mod sqlite_writer;
pub mod writer;
pub mod writer_backend;

pub use jsonl_writer::JsonlSinkWriter;
pub use sqlite_writer::SqliteSinkWriter;
pub use writer::{open_backend, CheckpointedSinkWriter, SinkFilter, SinkReport};
pub use writer_backend::{SinkBackend, SinkError};

//! Checkpoint store backed by SQLite
//!
//! Holds the source cursor, the engine snapshot and, per sink, the highest
//! committed window end. Finalized windows leave the engine in increasing end
//! order, so that one value answers "already written?" for every earlier end;
//! older ledger rows are pruned as the mark advances. The connection runs in `locking_mode=EXCLUSIVE` and
//! takes the write lock at open, so a second pipeline instance pointed at the
//! same checkpoint fails fast. The OS drops the lock with the process, so a
//! crashed instance never blocks its own restart.

use super::engine::EngineSnapshot;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pipeline_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        source_cursor TEXT,
        engine_state TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS sink_commits (
        sink TEXT NOT NULL,
        window_end INTEGER NOT NULL,
        committed_at INTEGER NOT NULL,
        PRIMARY KEY (sink, window_end)
    );
";

#[derive(Debug)]
pub enum CheckpointError {
    /// Another instance holds the checkpoint
    Locked(String),
    /// Persisted state is unreadable; refusing to guess a cursor
    Corrupt(String),
    /// Persisted state was written under a different window configuration
    Incompatible(String),
    Io(std::io::Error),
    Database(String),
}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        CheckpointError::Io(err)
    }
}

impl From<rusqlite::Error> for CheckpointError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    CheckpointError::Locked(err.to_string())
                }
                ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt => {
                    CheckpointError::Corrupt(err.to_string())
                }
                _ => CheckpointError::Database(err.to_string()),
            },
            rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::FromSqlConversionFailure(..) => {
                CheckpointError::Corrupt(err.to_string())
            }
            _ => CheckpointError::Database(err.to_string()),
        }
    }
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::Locked(e) => write!(f, "Checkpoint is locked by another instance: {}", e),
            CheckpointError::Corrupt(e) => write!(f, "Corrupt checkpoint: {}", e),
            CheckpointError::Incompatible(e) => write!(f, "Incompatible checkpoint: {}", e),
            CheckpointError::Io(e) => write!(f, "IO error: {}", e),
            CheckpointError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for CheckpointError {}

/// Everything read back from the store at startup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    pub source_cursor: Option<String>,
    pub engine: Option<EngineSnapshot>,
    /// Highest committed window end per sink
    pub committed: BTreeMap<String, i64>,
}

pub struct CheckpointStore {
    conn: Connection,
    path: PathBuf,
}

impl CheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::ZERO)?;

        let mode: String =
            conn.pragma_update_and_check(None, "locking_mode", "EXCLUSIVE", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        conn.execute_batch(&format!("BEGIN EXCLUSIVE; {} COMMIT;", SCHEMA))?;

        log::info!("🔐 Checkpoint opened: {} (locking_mode={})", path.display(), mode);

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Checkpoint, CheckpointError> {
        let row: Option<(Option<String>, String)> = self
            .conn
            .query_row(
                "SELECT source_cursor, engine_state FROM pipeline_state WHERE id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let (source_cursor, engine) = match row {
            Some((cursor, state)) => {
                let snapshot: EngineSnapshot = serde_json::from_str(&state).map_err(|e| {
                    CheckpointError::Corrupt(format!("engine_state is not a valid snapshot: {}", e))
                })?;
                (cursor, Some(snapshot))
            }
            None => (None, None),
        };

        let mut committed = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT sink, MAX(window_end) FROM sink_commits GROUP BY sink")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (sink, window_end) = row?;
            committed.insert(sink, window_end);
        }

        Ok(Checkpoint {
            source_cursor,
            engine,
            committed,
        })
    }

    /// Highest window end the sink has committed, if any
    pub fn committed_through(&self, sink: &str) -> Result<Option<i64>, CheckpointError> {
        let end = self.conn.query_row(
            "SELECT MAX(window_end) FROM sink_commits WHERE sink = ?1",
            params![sink],
            |r| r.get::<_, Option<i64>>(0),
        )?;
        Ok(end)
    }

    /// Advance the sink's committed mark to `window_end` (never moves it back)
    pub fn mark_committed(&mut self, sink: &str, window_end: i64) -> Result<(), CheckpointError> {
        let now = chrono::Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO sink_commits (sink, window_end, committed_at) VALUES (?1, ?2, ?3)",
            params![sink, window_end, now],
        )?;
        let pruned = tx.execute(
            "DELETE FROM sink_commits
             WHERE sink = ?1
               AND window_end < (SELECT MAX(window_end) FROM sink_commits WHERE sink = ?1)",
            params![sink],
        )?;
        tx.commit()?;

        log::debug!(
            "📌 Sink {} committed through window end {} ({} ledger rows pruned)",
            sink,
            window_end,
            pruned
        );
        Ok(())
    }

    /// Persist the cycle boundary: cursor and engine state in one transaction
    pub fn commit_cycle(
        &mut self,
        source_cursor: Option<&str>,
        engine: &EngineSnapshot,
    ) -> Result<(), CheckpointError> {
        let state = serde_json::to_string(engine)
            .map_err(|e| CheckpointError::Database(format!("failed to serialize engine snapshot: {}", e)))?;
        let now = chrono::Utc::now().timestamp();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO pipeline_state (id, source_cursor, engine_state, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                source_cursor = excluded.source_cursor,
                engine_state = excluded.engine_state,
                updated_at = excluded.updated_at",
            params![source_cursor, state, now],
        )?;
        tx.commit()?;

        Ok(())
    }
}

//! SQLite sink - one transaction per committed unit
//!
//! Rows are keyed by window end, so re-committing a unit after a crash is a
//! no-op (`INSERT OR IGNORE`).

use super::writer_backend::{SinkBackend, SinkError};
use crate::aggregator_core::{Alert, AlertedWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;

pub struct SqliteSinkWriter {
    conn: Connection,
}

impl SqliteSinkWriter {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SinkError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create database directory {}: {}", parent.display(), e),
                ))
            })?;
        }

        let conn = Connection::open(db_path)?;

        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS window_results (
                window_end_ms INTEGER PRIMARY KEY,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                avg_price REAL NOT NULL,
                min_price REAL NOT NULL,
                max_price REAL NOT NULL,
                volatility REAL NOT NULL,
                total_volume REAL NOT NULL,
                record_count INTEGER NOT NULL,
                alert TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_alert ON window_results(alert, window_end_ms)",
            [],
        )?;

        log::info!(
            "✅ SQLite sink initialized: {} (journal_mode={})",
            db_path.display(),
            journal
        );

        Ok(Self { conn })
    }

    /// All stored windows ordered by window end
    pub fn read_all(&self) -> Result<Vec<AlertedWindow>, SinkError> {
        let mut stmt = self.conn.prepare(
            "SELECT window_start, window_end, avg_price, min_price, max_price,
                    volatility, total_volume, record_count, alert
             FROM window_results ORDER BY window_end_ms",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut windows = Vec::new();
        for row in rows {
            let (start, end, avg, min, max, volatility, volume, count, alert) = row?;
            let window_start = DateTime::parse_from_rfc3339(&start)
                .map_err(|e| SinkError::Database(format!("bad window_start {}: {}", start, e)))?;
            let window_end = DateTime::parse_from_rfc3339(&end)
                .map_err(|e| SinkError::Database(format!("bad window_end {}: {}", end, e)))?;

            windows.push(AlertedWindow {
                window_start: window_start.with_timezone(&Utc),
                window_end: window_end.with_timezone(&Utc),
                avg_price: avg,
                min_price: min,
                max_price: max,
                volatility,
                total_volume: volume,
                record_count: count as u64,
                alert: if alert == Alert::PriceSpike.as_str() {
                    Alert::PriceSpike
                } else {
                    Alert::Nominal
                },
            });
        }
        Ok(windows)
    }
}

#[async_trait]
impl SinkBackend for SqliteSinkWriter {
    async fn commit_unit(&mut self, windows: &[AlertedWindow]) -> Result<(), SinkError> {
        if windows.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO window_results
                 (window_end_ms, window_start, window_end, avg_price, min_price, max_price,
                  volatility, total_volume, record_count, alert)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            for window in windows {
                stmt.execute(params![
                    window.window_end_ms(),
                    window.window_start.to_rfc3339(),
                    window.window_end.to_rfc3339(),
                    window.avg_price,
                    window.min_price,
                    window.max_price,
                    window.volatility,
                    window.total_volume,
                    window.record_count as i64,
                    window.alert.as_str(),
                ])?;
            }
        }
        tx.commit()?;

        log::debug!("✅ Committed {} windows to SQLite", windows.len());
        Ok(())
    }

    async fn committed_through(&mut self) -> Result<Option<i64>, SinkError> {
        let end = self
            .conn
            .query_row("SELECT MAX(window_end_ms) FROM window_results", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?;
        Ok(end)
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BASE: i64 = 1_700_000_400_000;
    const WINDOW: i64 = 600_000;

    fn window(index: i64, max_price: f64) -> AlertedWindow {
        let start = BASE + index * WINDOW;
        AlertedWindow {
            window_start: DateTime::from_timestamp_millis(start).unwrap(),
            window_end: DateTime::from_timestamp_millis(start + WINDOW).unwrap(),
            avg_price: 100.0,
            min_price: 99.0,
            max_price,
            volatility: 0.25,
            total_volume: 8.0,
            record_count: 3,
            alert: if max_price > 102.0 { Alert::PriceSpike } else { Alert::Nominal },
        }
    }

    #[tokio::test]
    async fn test_commit_and_read_back() {
        let dir = tempdir().unwrap();
        let mut writer = SqliteSinkWriter::new(dir.path().join("sink/windows.db")).unwrap();

        let unit = vec![window(0, 101.0), window(1, 150.0)];
        writer.commit_unit(&unit).await.unwrap();

        let stored = writer.read_all().unwrap();
        assert_eq!(stored, unit);
    }

    #[tokio::test]
    async fn test_recommit_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut writer = SqliteSinkWriter::new(dir.path().join("windows.db")).unwrap();

        let unit = vec![window(0, 101.0), window(1, 101.0)];
        writer.commit_unit(&unit).await.unwrap();
        writer.commit_unit(&unit).await.unwrap();

        assert_eq!(writer.read_all().unwrap().len(), 2);
        assert_eq!(writer.committed_through().await.unwrap(), Some(BASE + 2 * WINDOW));
    }

    #[tokio::test]
    async fn test_empty_table_has_no_committed_end() {
        let dir = tempdir().unwrap();
        let mut writer = SqliteSinkWriter::new(dir.path().join("windows.db")).unwrap();
        assert_eq!(writer.committed_through().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_alert_column_values() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("windows.db");
        let mut writer = SqliteSinkWriter::new(&db_path).unwrap();
        writer.commit_unit(&[window(0, 150.0)]).await.unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let alert: String = conn
            .query_row("SELECT alert FROM window_results", [], |row| row.get(0))
            .unwrap();
        assert_eq!(alert, "PRICE_SPIKE");
    }
}

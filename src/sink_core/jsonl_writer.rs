//! JSONL sink - one part file per committed unit
//!
//! Each unit lands as `part-{first_end}-{last_end}.jsonl` in the sink
//! directory. Lines are written to a hidden temp file, synced, then renamed
//! into place, so readers only ever see complete part files. Recovery reads
//! the highest end from part names and never parses their contents.

use super::writer_backend::{SinkBackend, SinkError};
use crate::aggregator_core::AlertedWindow;
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".jsonl";
const TMP_SUFFIX: &str = ".tmp";

pub struct JsonlSinkWriter {
    dir: PathBuf,
}

impl JsonlSinkWriter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        // Leftovers from a crash mid-write were never renamed, so never committed
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let name = file_name(&path);
            if name.starts_with('.') && name.ends_with(TMP_SUFFIX) {
                log::warn!("🧹 Removing incomplete part file: {}", path.display());
                fs::remove_file(&path)?;
            }
        }

        log::info!("📝 Writing JSONL parts to: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Committed part files in name order
    pub fn part_files(&self) -> Result<Vec<PathBuf>, SinkError> {
        let mut parts = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = file_name(&path);
            if name.starts_with(PART_PREFIX) && name.ends_with(PART_SUFFIX) {
                parts.push(path);
            }
        }
        parts.sort();
        Ok(parts)
    }

    /// All windows currently stored, across part files
    pub fn read_all(&self) -> Result<Vec<AlertedWindow>, SinkError> {
        let mut windows = Vec::new();
        for part in self.part_files()? {
            let reader = BufReader::new(File::open(&part)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AlertedWindow>(&line) {
                    Ok(window) => windows.push(window),
                    Err(e) => log::warn!("⚠️  Unreadable line in {}: {}", part.display(), e),
                }
            }
        }
        Ok(windows)
    }

    fn write_part(&self, windows: &[AlertedWindow]) -> Result<PathBuf, SinkError> {
        let first = windows.iter().map(|w| w.window_end_ms()).min().unwrap_or_default();
        let last = windows.iter().map(|w| w.window_end_ms()).max().unwrap_or_default();

        let part_name = format!("{}{}-{}{}", PART_PREFIX, first, last, PART_SUFFIX);
        let final_path = self.dir.join(&part_name);
        let tmp_path = self.dir.join(format!(".{}{}", part_name, TMP_SUFFIX));

        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for window in windows {
                let json = serde_json::to_string(window)?;
                writeln!(writer, "{}", json)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &final_path)?;
        sync_dir(&self.dir)?;

        Ok(final_path)
    }
}

/// `last_end` from `part-{first_end}-{last_end}.jsonl`; ends may be negative
fn part_last_end(name: &str) -> Option<i64> {
    let body = name.strip_prefix(PART_PREFIX)?.strip_suffix(PART_SUFFIX)?;
    let bytes = body.as_bytes();
    let split = (1..bytes.len()).find(|&i| bytes[i] == b'-' && bytes[i - 1].is_ascii_digit())?;
    body[..split].parse::<i64>().ok()?;
    body[split + 1..].parse().ok()
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl SinkBackend for JsonlSinkWriter {
    async fn commit_unit(&mut self, windows: &[AlertedWindow]) -> Result<(), SinkError> {
        if windows.is_empty() {
            return Ok(());
        }

        let path = self.write_part(windows)?;
        log::debug!("✅ {} windows committed to {}", windows.len(), path.display());
        Ok(())
    }

    async fn committed_through(&mut self) -> Result<Option<i64>, SinkError> {
        let mut highest = None;
        for part in self.part_files()? {
            let name = file_name(&part);
            match part_last_end(name) {
                Some(end) => highest = highest.max(Some(end)),
                None => log::warn!("⚠️  Ignoring part file with unexpected name: {}", part.display()),
            }
        }
        Ok(highest)
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}

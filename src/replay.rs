//! Batch replay - splits a historical CSV into numbered batch files
//!
//! Batches are named `data_batch_NNNNN.csv`; the pipeline orders them by the
//! number, so indexes past 99999 simply grow a digit.
//! Each file is written hidden, synced and renamed, so the pipeline never
//! lists a half-written batch.

use crate::aggregator_core::{encode_batch, Record};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const BATCH_PREFIX: &str = "data_batch_";
const BATCH_SUFFIX: &str = ".csv";

pub fn batch_file_name(index: u32) -> String {
    format!("{}{:05}{}", BATCH_PREFIX, index, BATCH_SUFFIX)
}

fn batch_index(name: &str) -> Option<u32> {
    name.strip_prefix(BATCH_PREFIX)?
        .strip_suffix(BATCH_SUFFIX)?
        .parse()
        .ok()
}

/// Index after the highest batch already in `dir` (1 when empty)
pub fn next_batch_index(dir: &Path) -> std::io::Result<u32> {
    let mut highest = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(index) = entry.file_name().to_str().and_then(batch_index) {
            highest = highest.max(index);
        }
    }
    Ok(highest + 1)
}

/// Remove batch files (and leftover temp files) from `dir`
pub fn clear_batches(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let visible = name.trim_start_matches('.');
        if visible.starts_with(BATCH_PREFIX) {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn write_batch(dir: &Path, index: u32, records: &[Record]) -> std::io::Result<PathBuf> {
    let name = batch_file_name(index);
    let final_path = dir.join(&name);
    let tmp_path = dir.join(format!(".{}.tmp", name));

    let encoded = encode_batch(records)?;
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, &final_path)?;

    Ok(final_path)
}

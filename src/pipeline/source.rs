//! Batch source - a directory of CSV batch files ordered by name
//!
//! The cursor is the name of the last batch folded into a committed cycle;
//! anything ordering after it is new. Batch ids order by the number before the
//! extension, so `data_batch_100000.csv` follows `data_batch_99999.csv` however
//! the producer pads. Hidden files are in-flight writes from the producer and
//! are never listed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// (prefix, sequence digits without leading zeros) of the file stem
    fn sequence(&self) -> (&str, &str) {
        let stem = self.0.rsplit_once('.').map_or(self.0.as_str(), |(stem, _)| stem);
        let prefix = stem.trim_end_matches(|c: char| c.is_ascii_digit());
        let digits = stem[prefix.len()..].trim_start_matches('0');
        (prefix, digits)
    }
}

impl Ord for BatchId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let (prefix, digits) = self.sequence();
        let (other_prefix, other_digits) = other.sequence();

        prefix
            .cmp(other_prefix)
            .then(digits.len().cmp(&other_digits.len()))
            .then(digits.cmp(other_digits))
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for BatchId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub enum SourceError {
    Io(std::io::Error),
    MissingBatch(BatchId),
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err)
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Io(e) => write!(f, "IO error: {}", e),
            SourceError::MissingBatch(id) => write!(f, "Batch disappeared before it was read: {}", id),
        }
    }
}

impl std::error::Error for SourceError {}

#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Batches after `cursor`, in processing order
    async fn list_new_batches(&self, cursor: Option<&BatchId>) -> Result<Vec<BatchId>, SourceError>;

    async fn read_batch(&self, id: &BatchId) -> Result<Vec<u8>, SourceError>;
}

pub struct DirectoryBatchSource {
    dir: PathBuf,
}

impl DirectoryBatchSource {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        log::info!("📂 Watching batch directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_batch_file(name: &str) -> bool {
    !name.starts_with('.') && name.ends_with(".csv")
}

#[async_trait]
impl BatchSource for DirectoryBatchSource {
    async fn list_new_batches(&self, cursor: Option<&BatchId>) -> Result<Vec<BatchId>, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut batches = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                log::warn!("⚠️  Skipping non UTF-8 file name in {}", self.dir.display());
                continue;
            };
            if !is_batch_file(&name) {
                continue;
            }

            let id = BatchId(name);
            if cursor.map_or(true, |c| &id > c) {
                batches.push(id);
            }
        }

        batches.sort();
        Ok(batches)
    }

    async fn read_batch(&self, id: &BatchId) -> Result<Vec<u8>, SourceError> {
        match tokio::fs::read(self.dir.join(id.as_str())).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SourceError::MissingBatch(id.clone())),
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}

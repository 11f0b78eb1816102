//! Record decoding from raw CSV batches into typed OHLCV records
//!
//! Wire format: `Timestamp,Open,High,Low,Close,Volume` with a header row.
//! Timestamp is Unix epoch seconds, fractional allowed. Event time is kept
//! internally as epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;

pub const HEADER: [&str; 6] = ["Timestamp", "Open", "High", "Low", "Close", "Volume"];

const FIELD_COUNT: usize = HEADER.len();

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Event time in epoch milliseconds
    pub event_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A row that failed structural validation
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    /// 1-based line in the batch (0 when unknown)
    pub line: u64,
    pub reason: String,
}

impl RowError {
    fn new(line: u64, reason: String) -> Self {
        Self { line, reason }
    }
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for RowError {}

impl Record {
    fn from_row(row: &csv::ByteRecord, line: u64) -> Result<Self, RowError> {
        if row.len() != FIELD_COUNT {
            return Err(RowError::new(
                line,
                format!("expected {} fields, got {}", FIELD_COUNT, row.len()),
            ));
        }

        let timestamp = parse_field(row, 0, line)?;
        let event_time = epoch_secs_to_millis(timestamp).ok_or_else(|| {
            RowError::new(line, format!("Timestamp out of range: {}", timestamp))
        })?;

        Ok(Self {
            event_time,
            open: parse_field(row, 1, line)?,
            high: parse_field(row, 2, line)?,
            low: parse_field(row, 3, line)?,
            close: parse_field(row, 4, line)?,
            volume: parse_field(row, 5, line)?,
        })
    }

    pub fn event_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.event_time)
    }
}

fn parse_field(row: &csv::ByteRecord, idx: usize, line: u64) -> Result<f64, RowError> {
    let name = HEADER[idx];
    let raw = std::str::from_utf8(&row[idx])
        .map_err(|_| RowError::new(line, format!("{} is not valid UTF-8", name)))?
        .trim();

    let value: f64 = raw
        .parse()
        .map_err(|_| RowError::new(line, format!("{} is not numeric: '{}'", name, raw)))?;

    if !value.is_finite() {
        return Err(RowError::new(line, format!("{} is not finite: '{}'", name, raw)));
    }

    Ok(value)
}

/// 0001-01-01T00:00:00Z
pub const MIN_EVENT_TIME_MS: i64 = -62_135_596_800_000;

/// 9999-12-31T23:59:59.999Z
pub const MAX_EVENT_TIME_MS: i64 = 253_402_300_799_999;

/// Convert fractional epoch seconds to milliseconds within years 1..=9999
///
/// Output rows carry RFC 3339 timestamps, which need a four-digit year; the
/// margin to chrono's own limit also keeps any window end representable.
pub fn epoch_secs_to_millis(secs: f64) -> Option<i64> {
    let millis = (secs * 1_000.0).round();
    if !millis.is_finite() {
        return None;
    }
    let millis = millis as i64;
    if !(MIN_EVENT_TIME_MS..=MAX_EVENT_TIME_MS).contains(&millis) {
        return None;
    }
    DateTime::from_timestamp_millis(millis).map(|_| millis)
}

fn format_epoch_secs(millis: i64) -> String {
    if millis % 1_000 == 0 {
        (millis / 1_000).to_string()
    } else {
        (millis as f64 / 1_000.0).to_string()
    }
}

fn is_header(row: &csv::ByteRecord) -> bool {
    row.len() == FIELD_COUNT
        && row.iter().zip(HEADER.iter()).all(|(field, name)| {
            std::str::from_utf8(field)
                .map(|s| s.trim().eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
}

/// Streaming decoder yielding one result per data row, in input order
///
/// The header row is skipped when present. A bad row yields an `Err` and
/// decoding continues with the next row.
pub struct RecordDecoder<R: Read> {
    reader: csv::Reader<R>,
    row: csv::ByteRecord,
    seen_first: bool,
    done: bool,
}

impl<R: Read> RecordDecoder<R> {
    pub fn new(input: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input);

        Self {
            reader,
            row: csv::ByteRecord::new(),
            seen_first: false,
            done: false,
        }
    }
}

impl<R: Read> Iterator for RecordDecoder<R> {
    type Item = Result<Record, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.reader.read_byte_record(&mut self.row) {
                Ok(false) => self.done = true,
                Ok(true) => {
                    let line = self.row.position().map(|p| p.line()).unwrap_or(0);
                    let first = !self.seen_first;
                    self.seen_first = true;

                    if first && is_header(&self.row) {
                        continue;
                    }

                    return Some(Record::from_row(&self.row, line));
                }
                Err(e) => {
                    // Only I/O failures reach here with a flexible reader; stop
                    self.done = true;
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    return Some(Err(RowError::new(line, e.to_string())));
                }
            }
        }
        None
    }
}

/// Records and row errors decoded from one batch
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub records: Vec<Record>,
    pub errors: Vec<RowError>,
}

pub fn decode_batch(raw: &[u8]) -> DecodedBatch {
    let mut batch = DecodedBatch::default();

    for result in RecordDecoder::new(raw) {
        match result {
            Ok(record) => batch.records.push(record),
            Err(e) => batch.errors.push(e),
        }
    }

    batch
}

/// Encode records in the wire format, header included
pub fn encode_batch(records: &[Record]) -> std::io::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;

    for record in records {
        writer.write_record(&[
            format_epoch_secs(record.event_time),
            record.open.to_string(),
            record.high.to_string(),
            record.low.to_string(),
            record.close.to_string(),
            record.volume.to_string(),
        ])?;
    }

    writer.into_inner().map_err(|e| e.into_error())
}

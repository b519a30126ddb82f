//! Append-only JSON Lines logs for telemetry and orders.

use crate::activity::RobotActivity;
use crate::error::AppResult;
use crate::observation::RobotTelemetry;
use crate::orders::Order;
use crate::session::RecordingPhase;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// One line of `states.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Frame index within the phase
    pub index: u64,
    /// When the observation was sampled
    pub timestamp: DateTime<Utc>,
    /// When the recorder persisted it
    pub recorded_at: DateTime<Utc>,
    /// Episode number
    pub episode: u64,
    /// Part of the episode the record belongs to
    pub phase: RecordingPhase,
    /// Activity when the observation was captured
    pub activity: RobotActivity,
    /// Order in progress, for captures pushed after an order
    pub order: Option<Order>,
    /// Robot state
    pub telemetry: RobotTelemetry,
    /// Clip the frames of this record were written to
    pub clip: u32,
    /// Sequence number of the observation in the shared slot
    pub observation: u64,
}

/// Buffered appender for one JSON Lines file.
pub struct JsonLinesWriter<T> {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    _record: PhantomData<fn(&T)>,
}

impl<T: Serialize> JsonLinesWriter<T> {
    /// Opened lazily: no file exists until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            _record: PhantomData,
        }
    }

    /// Append one record, opening the file in append mode if needed.
    pub fn append(&mut self, record: &T) -> AppResult<()> {
        if self.writer.is_none() {
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.writer = Some(BufWriter::new(file));
        }
        if let Some(writer) = self.writer.as_mut() {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Flush buffered lines to the file.
    pub fn flush(&mut self) -> AppResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Flush and release the file. Safe to call repeatedly.
    pub fn close(&mut self) -> AppResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Read every record of a JSON Lines file. A missing file reads as empty.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> AppResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

//! # Window Export
//!
//! Sinks receive closed windows in row form (`WindowExport`) and persist them. The
//! receiver writes one CSV file per closed cycle; `MemorySink` keeps windows in memory
//! for tests.
//!
//! ## CSV Layout
//!
//! Files land at `<output>/<alias|serial>/<dirs>/<serial>__<start>__<end>.csv`, where
//! `<dirs>` are the last `depth` parent directories of the cycle's first frame path and
//! `<end>` is the last second of the cycle. The file holds the header, one line per
//! sub-sample slot (empty fields for missing seconds), a blank line, then optional
//! sections for duplicate and misplaced records.

use arrow::csv::WriterBuilder;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::aliases::AliasTable;
use crate::backup::sanitize;
use crate::projector::{rows_to_batch, Row, WindowExport, HEADER};
use crate::sync_output::common::CodecError;

pub const DUPLICATES_LABEL: &str =
    "Duplicate records (entries for same times exist in this CSV file):";
pub const MISPLACED_LABEL: &str = "Misplaced records (should be in earlier CSV file):";

const FILE_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Export task failed: {0}")]
    Join(String),
}

#[async_trait]
pub trait WindowSink: Send + Sync {
    /// Persists one closed window.
    async fn write_window(&self, export: WindowExport) -> Result<(), ExportError>;

    /// Sink name for logging.
    fn sink_type(&self) -> &'static str;
}

/// Writes each window to its own CSV file.
#[derive(Debug, Clone)]
pub struct CsvSink {
    output_dir: PathBuf,
    depth: usize,
    aliases: Arc<AliasTable>,
}

impl CsvSink {
    /// # Parameters
    ///
    /// * `output_dir`: Root of the CSV tree.
    /// * `depth`: Number of parent directories of the incoming file path mirrored below
    ///   the device directory.
    /// * `aliases`: Serial aliases; the alias names the device directory when known.
    pub fn new(output_dir: impl Into<PathBuf>, depth: usize, aliases: Arc<AliasTable>) -> Self {
        CsvSink {
            output_dir: output_dir.into(),
            depth,
            aliases,
        }
    }

    /// Destination file of a window.
    pub fn path_for(&self, export: &WindowExport) -> PathBuf {
        let mut dir = self
            .output_dir
            .join(sanitize(self.aliases.directory_name(&export.serial_number)));
        if let Some(frame_path) = &export.first_frame_path {
            let parents = parent_dirs(frame_path, self.depth);
            if parents.len() < self.depth {
                warn!("Filepath {} has insufficient depth", frame_path);
            }
            for part in parents {
                dir.push(part);
            }
        }
        dir.join(file_name(
            &export.serial_number,
            export.cycle_start,
            export.cycle_end,
        ))
    }
}

#[async_trait]
impl WindowSink for CsvSink {
    async fn write_window(&self, export: WindowExport) -> Result<(), ExportError> {
        let path = self.path_for(&export);
        let written = path.clone();
        tokio::task::spawn_blocking(move || write_csv(&path, &export))
            .await
            .map_err(|e| ExportError::Join(e.to_string()))??;
        info!("Successfully wrote file {}", written.display());
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "csv"
    }
}

/// `<serial>__<cycle start>__<last second of cycle>.csv`, with the serial reduced to a
/// single path component.
pub fn file_name(serial_number: &str, cycle_start: DateTime<Utc>, cycle_end: DateTime<Utc>) -> String {
    let last = cycle_end - Duration::seconds(1);
    format!(
        "{}__{}__{}.csv",
        sanitize(serial_number),
        cycle_start.format(FILE_TIME_FORMAT),
        last.format(FILE_TIME_FORMAT)
    )
}

/// The last `depth` directory components of `frame_path`, file name excluded.
pub fn parent_dirs(frame_path: &str, depth: usize) -> Vec<String> {
    let mut parts: Vec<String> = Path::new(frame_path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    parts.pop();
    let skip = parts.len().saturating_sub(depth);
    parts.split_off(skip)
}

/// Writes a window to `path`, creating parent directories as needed.
pub fn write_csv(path: &Path, export: &WindowExport) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);

    writeln!(out, "{}", HEADER.join(","))?;
    out = write_batch(out, &export.rows_batch()?)?;
    writeln!(out)?;

    if !export.duplicate_rows.is_empty() {
        writeln!(out, "{}", DUPLICATES_LABEL)?;
        out = write_batch(out, &export.duplicates_batch()?)?;
        writeln!(out)?;
    }
    if !export.early_rows.is_empty() {
        writeln!(out, "{}", MISPLACED_LABEL)?;
        out = write_batch(out, &export.early_batch()?)?;
    }
    out.flush()?;
    Ok(())
}

/// Writes rows under a header line, without window sections.
pub fn write_rows_csv(path: &Path, rows: &[Row]) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", HEADER.join(","))?;
    let rows: Vec<Option<Row>> = rows.iter().copied().map(Some).collect();
    out = write_batch(out, &rows_to_batch(&rows)?)?;
    out.flush()?;
    Ok(())
}

fn write_batch<W: Write>(out: W, batch: &RecordBatch) -> Result<W, ExportError> {
    let mut writer = WriterBuilder::new().with_header(false).build(out);
    writer.write(batch)?;
    Ok(writer.into_inner())
}

/// Keeps exported windows in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    windows: Mutex<Vec<WindowExport>>,
    fail: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// Makes every following export fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn windows(&self) -> Vec<WindowExport> {
        self.windows.lock().clone()
    }
}

#[async_trait]
impl WindowSink for MemorySink {
    async fn write_window(&self, export: WindowExport) -> Result<(), ExportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExportError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "sink unavailable",
            )));
        }
        self.windows.lock().push(export);
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "memory"
    }
}

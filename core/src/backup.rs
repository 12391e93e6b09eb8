//! Local backup of raw payloads that could not be stored.
//!
//! Files are written to `<dir>/<serial>/<sequence>.dat`. The sequence is a per-process
//! counter seeded with the current Unix time in milliseconds, so restarts do not reuse
//! names.

use chrono::Utc;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct BackupWriter {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl BackupWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        BackupWriter::with_sequence(dir, Utc::now().timestamp_millis().max(0) as u64)
    }

    pub fn with_sequence(dir: impl Into<PathBuf>, first: u64) -> Self {
        BackupWriter {
            dir: dir.into(),
            sequence: AtomicU64::new(first),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `payload` to the next backup file for `serial_number`.
    ///
    /// # Returns
    ///
    /// * `Ok(PathBuf)`: Path of the written file.
    /// * `Err(std::io::Error)`: If the directory or file could not be written.
    pub async fn write(&self, serial_number: &str, payload: &[u8]) -> std::io::Result<PathBuf> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let dir = self.dir.join(sanitize(serial_number));
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.dat", sequence));
        tokio::fs::write(&path, payload).await?;
        info!("Backed up {} bytes for {} to {}", payload.len(), serial_number, path.display());
        Ok(path)
    }
}

/// Reduces a device-supplied name to a single safe path component.
pub fn sanitize(serial_number: &str) -> String {
    let cleaned: String = serial_number
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        warn!("Empty serial number, using \"unknown\" as its directory");
        "unknown".to_string()
    } else {
        cleaned
    }
}

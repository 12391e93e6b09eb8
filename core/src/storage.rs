//! # Storage Collaborator
//!
//! The receiver persists every raw frame before acknowledging it, tracks when each device
//! was last heard from, and keeps an append-only log of anomalies and cycle summaries. The
//! backing store is opaque to the core: anything that implements `Storage` can be plugged
//! into a `Session`.
//!
//! ## Key Components
//!
//! - `Storage`: Async trait shared by all connection tasks (`Arc<dyn Storage>`).
//! - `RawFrame` / `FrameId`: A stored frame and the handle used to mark it published.
//! - `MemoryStore`: In-process implementation used by tests and the receive-only demo.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::window::anomaly::{Anomaly, CycleSummary};

/// Handle of a stored raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FrameId(pub i64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A frame as received, before any decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub path: String,
    pub serial_number: String,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame {0} not found")]
    NotFound(FrameId),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Persists a raw frame and returns its handle.
    async fn insert_raw_frame(&self, frame: RawFrame) -> Result<FrameId, StorageError>;

    /// Marks a frame as exported.
    async fn mark_published(&self, id: FrameId) -> Result<(), StorageError>;

    async fn upsert_last_seen(
        &self,
        serial_number: &str,
        time: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    async fn find_last_seen(&self, serial_number: &str)
        -> Result<Option<DateTime<Utc>>, StorageError>;

    async fn append_anomaly(&self, anomaly: &Anomaly) -> Result<(), StorageError>;

    async fn append_summary(&self, summary: &CycleSummary) -> Result<(), StorageError>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFrame {
    pub id: FrameId,
    pub frame: RawFrame,
    pub published: bool,
}

#[derive(Debug, Default)]
struct MemoryInner {
    frames: Vec<StoredFrame>,
    last_seen: HashMap<String, DateTime<Utc>>,
    anomalies: Vec<Anomaly>,
    summaries: Vec<CycleSummary>,
}

/// Thread-safe in-memory storage.
///
/// `set_fail_inserts(true)` makes `insert_raw_frame` fail, which exercises the failure-ack
/// and backup paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<StoredFrame> {
        self.inner.lock().frames.clone()
    }

    pub fn frame_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn published_count(&self) -> usize {
        self.inner.lock().frames.iter().filter(|f| f.published).count()
    }

    pub fn is_published(&self, id: FrameId) -> Option<bool> {
        self.inner
            .lock()
            .frames
            .iter()
            .find(|f| f.id == id)
            .map(|f| f.published)
    }

    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.inner.lock().anomalies.clone()
    }

    pub fn summaries(&self) -> Vec<CycleSummary> {
        self.inner.lock().summaries.clone()
    }

    pub fn last_seen(&self, serial_number: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().last_seen.get(serial_number).copied()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn insert_raw_frame(&self, frame: RawFrame) -> Result<FrameId, StorageError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::Database("insert rejected".to_string()));
        }
        let mut inner = self.inner.lock();
        let id = FrameId(inner.frames.len() as i64 + 1);
        inner.frames.push(StoredFrame {
            id,
            frame,
            published: false,
        });
        Ok(id)
    }

    async fn mark_published(&self, id: FrameId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let stored = inner
            .frames
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(StorageError::NotFound(id))?;
        stored.published = true;
        Ok(())
    }

    async fn upsert_last_seen(
        &self,
        serial_number: &str,
        time: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.inner
            .lock()
            .last_seen
            .insert(serial_number.to_string(), time);
        Ok(())
    }

    async fn find_last_seen(
        &self,
        serial_number: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.last_seen(serial_number))
    }

    async fn append_anomaly(&self, anomaly: &Anomaly) -> Result<(), StorageError> {
        self.inner.lock().anomalies.push(anomaly.clone());
        Ok(())
    }

    async fn append_summary(&self, summary: &CycleSummary) -> Result<(), StorageError> {
        self.inner.lock().summaries.push(summary.clone());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

//! # Connection Sessions
//!
//! A `Session` handles the frames of one device connection in order: it stores each raw
//! frame, decides the acknowledgment, feeds decoded records to the device's
//! `WindowAggregator` and exports the windows that close. When the connection ends, the
//! aggregator state is parked in the shared `PendingStates` map so the next connection
//! for the same serial number continues the same cycle.
//!
//! ## Key Components
//!
//! - `SessionContext`: Collaborators shared by all connections (storage, sink, aliases,
//!   backup writer, pending states, cycle duration).
//! - `Session`: Per-connection state machine.
//! - `StagedFrame`: A stored and acknowledged frame waiting to be windowed.
//!
//! ## Usage
//!
//! ```ignore
//! let (ack, staged) = session.accept_frame(frame).await;
//! socket.write_all(&ack).await?;
//! if let Some(staged) = staged {
//!     session.ingest(staged).await;
//! }
//! ```
//!
//! The acknowledgment is sent after the frame is stored and before windowing, so the
//! device is never held up by CSV writes.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::aliases::AliasTable;
use crate::backup::BackupWriter;
use crate::export::WindowSink;
use crate::framing::{Frame, FAILURE_ACK};
use crate::projector::WindowExport;
use crate::storage::{FrameId, RawFrame, Storage};
use crate::sync_output::common::{CodecError, RECORD_SIZE};
use crate::sync_output::record::{decode_all, SyncOutput};
use crate::window::aggregator::{ClosedCycle, DeviceState, WindowAggregator};

/// Device states of closed connections, keyed by serial number.
pub type PendingStates = Arc<Mutex<HashMap<String, DeviceState>>>;

pub fn new_pending_states() -> PendingStates {
    Arc::new(Mutex::new(HashMap::new()))
}

#[derive(Clone)]
pub struct SessionContext {
    pub storage: Arc<dyn Storage>,
    pub pending: PendingStates,
    pub aliases: Arc<AliasTable>,
    /// `None` runs the receiver in receive-only mode.
    pub cycle_seconds: Option<u32>,
    pub sink: Option<Arc<dyn WindowSink>>,
    pub backup: Option<Arc<BackupWriter>>,
}

impl SessionContext {
    /// A receive-only context: frames are stored and acknowledged, nothing is windowed.
    pub fn new(storage: Arc<dyn Storage>, pending: PendingStates) -> Self {
        SessionContext {
            storage,
            pending,
            aliases: Arc::new(AliasTable::new()),
            cycle_seconds: None,
            sink: None,
            backup: None,
        }
    }

    pub fn with_windowing(mut self, cycle_seconds: u32, sink: Arc<dyn WindowSink>) -> Self {
        self.cycle_seconds = Some(cycle_seconds);
        self.sink = Some(sink);
        self
    }

    pub fn with_aliases(mut self, aliases: Arc<AliasTable>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_backup(mut self, backup: Arc<BackupWriter>) -> Self {
        self.backup = Some(backup);
        self
    }

    fn windowing(&self) -> bool {
        self.cycle_seconds.is_some() && self.sink.is_some()
    }
}

/// A frame that has been stored and acknowledged, waiting to be windowed.
#[derive(Debug, Clone)]
pub struct StagedFrame {
    pub path: String,
    pub serial_number: String,
    pub records: Vec<SyncOutput>,
    pub frame_id: FrameId,
}

pub struct Session {
    ctx: SessionContext,
    peer: String,
    serial_number: Option<String>,
    aggregator: Option<WindowAggregator>,
    last_seen_checked: bool,
    frames_accepted: u64,
    frames_rejected: u64,
}

impl Session {
    pub fn new(ctx: SessionContext, peer: impl Into<String>) -> Self {
        Session {
            ctx,
            peer: peer.into(),
            serial_number: None,
            aggregator: None,
            last_seen_checked: false,
            frames_accepted: 0,
            frames_rejected: 0,
        }
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn frames_accepted(&self) -> u64 {
        self.frames_accepted
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    pub fn cycle_start(&self) -> Option<DateTime<Utc>> {
        self.aggregator.as_ref().and_then(|a| a.cycle_start())
    }

    /// Stores a frame and decides its acknowledgment.
    ///
    /// # Returns
    ///
    /// * `([u8; 4], Option<StagedFrame>)`: The ack to send (the frame's ack id on success,
    ///   `FAILURE_ACK` otherwise) and, when windowing is enabled and the frame was accepted,
    ///   the decoded records to pass to `ingest` once the ack is sent.
    pub async fn accept_frame(&mut self, frame: Frame) -> ([u8; 4], Option<StagedFrame>) {
        let received_at = Utc::now();
        info!(
            "Received {}: serial number is {} ({}), length is {}",
            frame.path,
            frame.serial_number,
            self.ctx.aliases.describe(&frame.serial_number),
            frame.payload.len()
        );

        self.switch_device(&frame.serial_number);
        self.restore_pending(&frame.serial_number);
        self.check_last_seen(&frame.serial_number, received_at).await;

        if let Err(e) = self
            .ctx
            .storage
            .upsert_last_seen(&frame.serial_number, received_at)
            .await
        {
            warn!(
                "Cannot update last seen time for serial number {} ({}): {}",
                frame.serial_number, frame.path, e
            );
        }

        let decoded = self.decode(&frame.payload);

        let raw = RawFrame {
            path: frame.path.clone(),
            serial_number: frame.serial_number.clone(),
            payload: frame.payload.clone(),
            received_at,
        };
        let frame_id = match self.ctx.storage.insert_raw_frame(raw).await {
            Ok(id) => {
                info!("Successfully added {} to {} storage", frame.path, self.ctx.storage.backend_type());
                id
            }
            Err(e) => {
                warn!("Could not store {}: {}", frame.path, e);
                self.back_up(&frame).await;
                self.frames_rejected += 1;
                return (FAILURE_ACK, None);
            }
        };

        match decoded {
            Ok(records) => {
                self.frames_accepted += 1;
                let staged = self.aggregator.as_ref().map(|_| StagedFrame {
                    path: frame.path,
                    serial_number: frame.serial_number,
                    records,
                    frame_id,
                });
                (frame.ack_id, staged)
            }
            Err(e) => {
                error!("File {} rejected: {}", frame.path, e);
                self.frames_rejected += 1;
                (FAILURE_ACK, None)
            }
        }
    }

    /// Feeds a staged frame to the aggregator and finishes every cycle it closes.
    pub async fn ingest(&mut self, staged: StagedFrame) -> Vec<ClosedCycle> {
        let closed = match self.aggregator.as_mut() {
            Some(aggregator) => {
                aggregator.ingest_frame(&staged.path, staged.records, Some(staged.frame_id))
            }
            None => return Vec::new(),
        };
        for cycle in &closed {
            self.finish_cycle(cycle).await;
        }
        closed
    }

    /// `accept_frame` followed by `ingest`, for callers that do not need to send the ack
    /// in between.
    pub async fn handle_frame(&mut self, frame: Frame) -> [u8; 4] {
        let (ack, staged) = self.accept_frame(frame).await;
        if let Some(staged) = staged {
            self.ingest(staged).await;
        }
        ack
    }

    /// Ends the session, parking the device state for the next connection.
    pub fn close(mut self) {
        info!(
            "Connection lost: {} ({} frames accepted, {} rejected)",
            self.peer, self.frames_accepted, self.frames_rejected
        );
        self.park();
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<SyncOutput>, CodecError> {
        if self.ctx.windowing() {
            return decode_all(payload);
        }
        match payload.len() % RECORD_SIZE {
            0 => Ok(Vec::new()),
            extra_bytes => Err(CodecError::LengthMismatch {
                extra_bytes,
                record_size: RECORD_SIZE,
            }),
        }
    }

    fn switch_device(&mut self, serial_number: &str) {
        if self.serial_number.as_deref() == Some(serial_number) {
            return;
        }
        if let Some(previous) = self.serial_number.as_deref() {
            warn!(
                "{}: serial number changed from {} to {}",
                self.peer, previous, serial_number
            );
            self.park();
        }
        self.serial_number = Some(serial_number.to_string());
        self.last_seen_checked = false;

        if let Some(cycle_seconds) = self.ctx.cycle_seconds.filter(|_| self.ctx.windowing()) {
            match WindowAggregator::new(serial_number, cycle_seconds) {
                Ok(aggregator) => self.aggregator = Some(aggregator),
                Err(e) => error!("{}: windowing disabled: {}", serial_number, e),
            }
        }
    }

    fn restore_pending(&mut self, serial_number: &str) {
        let Some(aggregator) = self.aggregator.as_mut() else {
            return;
        };
        if let Some(restored) = self.ctx.pending.lock().remove(serial_number) {
            debug!(
                "{}: restoring {} buffered records from a previous connection",
                serial_number,
                restored.buffer.len()
            );
            aggregator.merge(restored);
        }
    }

    fn park(&mut self) {
        let Some(aggregator) = self.aggregator.take() else {
            return;
        };
        let serial_number = aggregator.serial_number().to_string();
        let state = aggregator.into_state();
        if state.cycle_start.is_none() && state.is_empty() {
            return;
        }
        let mut pending = self.ctx.pending.lock();
        match pending.get_mut(&serial_number) {
            Some(existing) => {
                warn!(
                    "{}: multiple uPMUs with the same serial number appear to be connected simultaneously",
                    serial_number
                );
                existing.merge(state);
            }
            None => {
                pending.insert(serial_number, state);
            }
        }
    }

    async fn check_last_seen(&mut self, serial_number: &str, now: DateTime<Utc>) {
        if self.last_seen_checked {
            return;
        }
        self.last_seen_checked = true;
        match self.ctx.storage.find_last_seen(serial_number).await {
            Ok(Some(previous)) => info!(
                "{}: last seen at {} ({} seconds ago)",
                serial_number,
                previous,
                (now - previous).num_seconds()
            ),
            Ok(None) => info!("{}: first connection", serial_number),
            Err(e) => warn!("{}: could not look up last seen time: {}", serial_number, e),
        }
    }

    async fn back_up(&self, frame: &Frame) {
        let Some(backup) = &self.ctx.backup else {
            warn!("No backup directory configured, payload of {} is lost", frame.path);
            return;
        };
        if let Err(e) = backup.write(&frame.serial_number, &frame.payload).await {
            error!("Could not back up {}: {}", frame.path, e);
        }
    }

    async fn finish_cycle(&self, cycle: &ClosedCycle) {
        let storage = &self.ctx.storage;
        for anomaly in &cycle.anomalies {
            if let Err(e) = storage.append_anomaly(anomaly).await {
                warn!("Could not record anomaly ({}): {}", anomaly, e);
            }
        }
        if let Err(e) = storage.append_summary(&cycle.summary).await {
            warn!("Could not record cycle summary for {}: {}", cycle.cycle_start, e);
        }

        let (Some(window), Some(sink)) = (&cycle.window, &self.ctx.sink) else {
            return;
        };
        let result = match WindowExport::from_window(window) {
            Ok(export) => sink.write_window(export).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => {
                for id in window.frame_ids() {
                    if let Err(e) = storage.mark_published(id).await {
                        warn!("Could not mark frame {} published: {}", id, e);
                    }
                }
            }
            Err(e) => error!(
                "{}: could not write window {} to {}, data for this cycle is lost: {}",
                window.serial_number,
                window.cycle_start,
                sink.sink_type(),
                e
            ),
        }
    }
}

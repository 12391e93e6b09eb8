//! # Per-Device Cycle Windowing
//!
//! This module provides `WindowAggregator`, the per-device engine that turns an unordered
//! stream of one-second records into fixed-duration, wall-clock-aligned windows and
//! reports duplicate, missing and misplaced records along the way.
//!
//! ## Key Components
//!
//! - `DeviceState`: Everything that must survive a reconnect (cycle start, first frame
//!   path, buffered records with their storage handles).
//! - `WindowAggregator`: Buffers records and closes cycles once the newest buffered record
//!   is at least one cycle past `cycle_start`.
//! - `Window`: One closed cycle: one slot per second plus duplicate and early records.
//! - `ClosedCycle`: A closed cycle's window (if any records fell inside it), anomalies and
//!   summary.
//!
//! ## Cycle Closing
//!
//! The buffer is sorted by record time and split into early (before `cycle_start`),
//! in-window and leftover (at or after `cycle_end`) records. `cycle_start` always advances
//! by at least one cycle, even when no record fell inside the window, so a silent device
//! still makes progress. A run of silent cycles before the next buffered record closes as
//! a single empty cycle with one `missing` anomaly. The aggregator performs no I/O; storing anomalies and exporting
//! windows is left to the caller.

use chrono::{DateTime, Duration, DurationRound, Utc};
use log::{debug, warn};

use super::anomaly::{Anomaly, CycleSummary};
use crate::storage::FrameId;
use crate::sync_output::common::{CodecError, SAMPLES_PER_RECORD};
use crate::sync_output::record::SyncOutput;

/// A decoded record waiting in a device buffer.
///
/// `frame` is set on the latest record of each stored frame; the frame is marked published
/// once that record has been exported.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedRecord {
    pub time: DateTime<Utc>,
    pub record: SyncOutput,
    pub frame: Option<FrameId>,
}

impl BufferedRecord {
    pub fn new(record: SyncOutput, frame: Option<FrameId>) -> Result<Self, CodecError> {
        Ok(BufferedRecord {
            time: record.timestamp()?,
            record,
            frame,
        })
    }
}

/// Per-device state that outlives a single connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub cycle_start: Option<DateTime<Utc>>,
    pub first_frame_path: Option<String>,
    pub last_frame_path: Option<String>,
    pub buffer: Vec<BufferedRecord>,
}

impl DeviceState {
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Storage handles of frames whose records are still buffered.
    pub fn pending_frame_ids(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.buffer.iter().filter_map(|r| r.frame)
    }

    /// Folds a restored state into this one.
    ///
    /// The restored cycle start and first frame path win when present; buffered records
    /// from both are kept and ordered when the next cycle closes.
    pub fn merge(&mut self, restored: DeviceState) {
        if restored.cycle_start.is_some() {
            self.cycle_start = restored.cycle_start;
        }
        if restored.first_frame_path.is_some() {
            self.first_frame_path = restored.first_frame_path;
        }
        if self.last_frame_path.is_none() {
            self.last_frame_path = restored.last_frame_path;
        }
        self.buffer.extend(restored.buffer);
    }

    fn latest_time(&self) -> Option<DateTime<Utc>> {
        self.buffer.iter().map(|r| r.time).max()
    }
}

/// One closed cycle of a device.
///
/// # Fields
///
/// * `slots`: One entry per second of the cycle; each expands to 120 rows on export.
/// * `duplicates`: In-window records whose second was already occupied.
/// * `early`: Records older than `cycle_start` that were still buffered.
/// * `first_frame_path`: Path of the first frame received for this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub serial_number: String,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub first_frame_path: Option<String>,
    pub slots: Vec<Option<BufferedRecord>>,
    pub duplicates: Vec<BufferedRecord>,
    pub early: Vec<BufferedRecord>,
}

impl Window {
    /// Number of exported rows covering the cycle (`120 x cycle seconds`).
    pub fn slot_rows(&self) -> usize {
        self.slots.len() * SAMPLES_PER_RECORD
    }

    pub fn populated_seconds(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Storage handles of every frame whose latest record was consumed by this window.
    pub fn frame_ids(&self) -> Vec<FrameId> {
        let mut ids: Vec<FrameId> = self
            .slots
            .iter()
            .flatten()
            .chain(self.duplicates.iter())
            .chain(self.early.iter())
            .filter_map(|r| r.frame)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedCycle {
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub window: Option<Window>,
    pub anomalies: Vec<Anomaly>,
    pub summary: CycleSummary,
}

/// Orders the records of one device and closes fixed-duration cycles.
#[derive(Debug)]
pub struct WindowAggregator {
    serial_number: String,
    cycle_seconds: i64,
    state: DeviceState,
}

impl WindowAggregator {
    /// Creates an aggregator with an empty state.
    ///
    /// # Parameters
    ///
    /// * `serial_number`: Device serial used in anomalies and windows.
    /// * `cycle_seconds`: Cycle duration; must be greater than zero.
    pub fn new(serial_number: impl Into<String>, cycle_seconds: u32) -> Result<Self, String> {
        WindowAggregator::with_state(serial_number, cycle_seconds, DeviceState::default())
    }

    /// Creates an aggregator that continues from a previously saved `DeviceState`.
    pub fn with_state(
        serial_number: impl Into<String>,
        cycle_seconds: u32,
        state: DeviceState,
    ) -> Result<Self, String> {
        if cycle_seconds == 0 {
            return Err("Cycle duration must be greater than 0 seconds".to_string());
        }
        Ok(WindowAggregator {
            serial_number: serial_number.into(),
            cycle_seconds: cycle_seconds as i64,
            state,
        })
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn cycle_seconds(&self) -> i64 {
        self.cycle_seconds
    }

    pub fn cycle_start(&self) -> Option<DateTime<Utc>> {
        self.state.cycle_start
    }

    pub fn buffered(&self) -> usize {
        self.state.buffer.len()
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn into_state(self) -> DeviceState {
        self.state
    }

    /// Merges state handed over by another connection for the same serial number.
    pub fn merge(&mut self, restored: DeviceState) {
        if !self.state.is_empty() {
            warn!(
                "{}: multiple uPMUs with the same serial number appear to be connected simultaneously; merging {} buffered records",
                self.serial_number,
                restored.buffer.len()
            );
        }
        self.state.merge(restored);
    }

    /// Start of the cycle containing `time`: the hour boundary at or before `time`,
    /// advanced by whole cycles.
    pub fn align(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let hour = time
            .duration_trunc(Duration::hours(1))
            .unwrap_or(time);
        let offset = (time - hour).num_seconds();
        hour + Duration::seconds(offset - offset % self.cycle_seconds)
    }

    /// Buffers a single record and closes every cycle it completes.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<ClosedCycle>)`: Cycles closed by this record, oldest first.
    /// * `Err(CodecError::InvalidTimestamp)`: If the record's `times` field is invalid; the
    ///   record is not buffered.
    pub fn ingest(
        &mut self,
        record: SyncOutput,
        frame: Option<FrameId>,
    ) -> Result<Vec<ClosedCycle>, CodecError> {
        let buffered = BufferedRecord::new(record, frame)?;
        self.push(vec![buffered]);
        Ok(self.close_ready_cycles())
    }

    /// Buffers all records of one stored frame and closes every cycle they complete.
    ///
    /// Records with invalid timestamps are dropped with a warning. The frame handle is
    /// attached to the frame's latest record.
    pub fn ingest_frame(
        &mut self,
        path: &str,
        records: Vec<SyncOutput>,
        frame: Option<FrameId>,
    ) -> Vec<ClosedCycle> {
        if self.state.first_frame_path.is_none() {
            self.state.first_frame_path = Some(path.to_string());
        }
        self.state.last_frame_path = Some(path.to_string());

        let mut buffered: Vec<BufferedRecord> = Vec::with_capacity(records.len());
        for record in records {
            match BufferedRecord::new(record, None) {
                Ok(r) => buffered.push(r),
                Err(e) => warn!("{}: {} has an invalid date: {}", self.serial_number, path, e),
            }
        }
        if let Some(latest) = buffered
            .iter_mut()
            .enumerate()
            .max_by_key(|(i, r)| (r.time, *i))
            .map(|(_, r)| r)
        {
            latest.frame = frame;
        }

        self.push(buffered);
        self.close_ready_cycles()
    }

    fn push(&mut self, records: Vec<BufferedRecord>) {
        if self.state.cycle_start.is_none() {
            if let Some(earliest) = records.iter().map(|r| r.time).min() {
                let start = self.align(earliest);
                debug!("{}: first cycle starts at {}", self.serial_number, start);
                self.state.cycle_start = Some(start);
            }
        }
        self.state.buffer.extend(records);
    }

    fn close_ready_cycles(&mut self) -> Vec<ClosedCycle> {
        let mut closed = Vec::new();
        while let (Some(start), Some(latest)) = (self.state.cycle_start, self.state.latest_time()) {
            if (latest - start).num_seconds() < self.cycle_seconds {
                break;
            }
            match self.close_cycle() {
                Some(cycle) => closed.push(cycle),
                None => break,
            }
        }
        closed
    }

    /// Closes the current cycle regardless of how much data is buffered.
    ///
    /// # Returns
    ///
    /// * `Some(ClosedCycle)`: The closed cycle; `window` is `None` when no record fell
    ///   inside it.
    /// * `None`: If no cycle has started yet.
    pub fn close_cycle(&mut self) -> Option<ClosedCycle> {
        let cycle_start = self.state.cycle_start?;
        let cycle_end = cycle_start + Duration::seconds(self.cycle_seconds);
        let last_second = cycle_end - Duration::seconds(1);
        let detected_at = Utc::now();

        let mut records = std::mem::take(&mut self.state.buffer);
        // Stable sort keeps arrival order among equal times, so the first-seen record wins a slot.
        records.sort_by_key(|r| r.time);
        let leftover = records.split_off(records.partition_point(|r| r.time < cycle_end));
        let in_window = records.split_off(records.partition_point(|r| r.time < cycle_start));
        let early = records;

        self.state.buffer = leftover;
        self.state.cycle_start = Some(cycle_end);

        let mut anomalies = Vec::new();
        if let (Some(first), Some(last)) = (early.first(), early.last()) {
            let anomaly = Anomaly::misplaced(
                &self.serial_number,
                first.time,
                last.time,
                cycle_start,
                detected_at,
            );
            warn!("{}", anomaly);
            anomalies.push(anomaly);
        }

        let (first, last) = match (in_window.first(), in_window.last()) {
            (Some(first), Some(last)) => (first.time, last.time),
            _ => {
                // Consecutive silent cycles collapse into one closure ending where the next
                // buffered record's cycle begins.
                let cycle_end = self
                    .state
                    .buffer
                    .first()
                    .map(|next| self.align(next.time))
                    .filter(|next_start| *next_start > cycle_end)
                    .unwrap_or(cycle_end);
                self.state.cycle_start = Some(cycle_end);
                let anomaly = Anomaly::missing(
                    &self.serial_number,
                    cycle_start,
                    cycle_end - Duration::seconds(1),
                    detected_at,
                );
                warn!("{}, no window written", anomaly);
                anomalies.push(anomaly);
                if !early.is_empty() {
                    warn!(
                        "{}: dropping {} misplaced records with no window to attach to",
                        self.serial_number,
                        early.len()
                    );
                }
                return Some(ClosedCycle {
                    cycle_start,
                    cycle_end,
                    window: None,
                    summary: self.summary(cycle_start, cycle_end, anomalies.len(), false, detected_at),
                    anomalies,
                });
            }
        };

        let one = Duration::seconds(1);
        if first > cycle_start {
            anomalies.push(Anomaly::missing(&self.serial_number, cycle_start, first - one, detected_at));
        }
        for pair in in_window.windows(2) {
            let (a, b) = (pair[0].time, pair[1].time);
            match (b - a).num_seconds() {
                0 => anomalies.push(Anomaly::duplicate(&self.serial_number, b, detected_at)),
                1 => {}
                _ => anomalies.push(Anomaly::missing(&self.serial_number, a + one, b - one, detected_at)),
            }
        }
        if last < last_second {
            anomalies.push(Anomaly::missing(&self.serial_number, last + one, last_second, detected_at));
        }
        for anomaly in anomalies.iter().skip(usize::from(!early.is_empty())) {
            warn!("{}", anomaly);
        }

        let mut slots: Vec<Option<BufferedRecord>> =
            (0..self.cycle_seconds).map(|_| None).collect();
        let mut duplicates = Vec::new();
        for record in in_window {
            let slot = &mut slots[(record.time - cycle_start).num_seconds() as usize];
            if slot.is_some() {
                duplicates.push(record);
            } else {
                *slot = Some(record);
            }
        }

        let first_frame_path = std::mem::replace(
            &mut self.state.first_frame_path,
            self.state.last_frame_path.clone(),
        );
        let window = Window {
            serial_number: self.serial_number.clone(),
            cycle_start,
            cycle_end,
            first_frame_path,
            slots,
            duplicates,
            early,
        };
        debug!(
            "{}: closed cycle {} with {} populated seconds",
            self.serial_number,
            cycle_start,
            window.populated_seconds()
        );

        Some(ClosedCycle {
            cycle_start,
            cycle_end,
            window: Some(window),
            summary: self.summary(cycle_start, cycle_end, anomalies.len(), true, detected_at),
            anomalies,
        })
    }

    fn summary(
        &self,
        cycle_start: DateTime<Utc>,
        next_cycle_start: DateTime<Utc>,
        anomaly_count: usize,
        written: bool,
        detected_at: DateTime<Utc>,
    ) -> CycleSummary {
        CycleSummary {
            serial_number: self.serial_number.clone(),
            detected_at,
            cycle_start,
            next_cycle_start,
            anomaly_count,
            written,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_output::random::sine_sync_output;
    use crate::window::anomaly::AnomalyKind;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap()
    }

    fn at(seconds: i64) -> SyncOutput {
        sine_sync_output(&(t0() + Duration::seconds(seconds)))
    }

    fn kinds(cycle: &ClosedCycle) -> Vec<AnomalyKind> {
        cycle.anomalies.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_zero_cycle_rejected() {
        assert!(WindowAggregator::new("P1", 0).is_err());
    }

    #[test]
    fn test_align_to_hour_and_cycle() {
        let agg = WindowAggregator::new("P1", 900).unwrap();
        let time = Utc.with_ymd_and_hms(2016, 6, 1, 12, 37, 12).unwrap();
        assert_eq!(agg.align(time), Utc.with_ymd_and_hms(2016, 6, 1, 12, 30, 0).unwrap());

        let agg = WindowAggregator::new("P1", 7200).unwrap();
        assert_eq!(agg.align(time), Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_no_close_before_cycle_elapsed() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        for s in 0..10 {
            assert!(agg.ingest(at(s), None).unwrap().is_empty());
        }
        assert_eq!(agg.buffered(), 10);
        assert_eq!(agg.cycle_start(), Some(t0()));
    }

    #[test]
    fn test_complete_cycle() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        let records: Vec<SyncOutput> = (0..11).map(at).collect();
        let closed = agg.ingest_frame("/f.dat", records, Some(FrameId(4)));

        assert_eq!(closed.len(), 1);
        let cycle = &closed[0];
        assert!(cycle.anomalies.is_empty());
        let window = cycle.window.as_ref().unwrap();
        assert_eq!(window.populated_seconds(), 10);
        assert_eq!(window.slot_rows(), 1200);
        // The handle rides on the latest record, which is still buffered.
        assert!(window.frame_ids().is_empty());
        assert_eq!(agg.state().pending_frame_ids().collect::<Vec<_>>(), vec![FrameId(4)]);
        assert_eq!(agg.cycle_start(), Some(t0() + Duration::seconds(10)));
        assert_eq!(agg.buffered(), 1);
        assert!(cycle.summary.written);
        assert_eq!(cycle.summary.anomaly_count, 0);
    }

    #[test]
    fn test_two_records_then_boundary() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        assert!(agg.ingest(at(0), Some(FrameId(1))).unwrap().is_empty());
        assert!(agg.ingest(at(1), Some(FrameId(2))).unwrap().is_empty());
        let closed = agg.ingest(at(10), None).unwrap();

        assert_eq!(closed.len(), 1);
        let cycle = &closed[0];
        let window = cycle.window.as_ref().unwrap();
        assert_eq!(window.populated_seconds(), 2);
        assert_eq!(window.frame_ids(), vec![FrameId(1), FrameId(2)]);

        assert_eq!(kinds(cycle), vec![AnomalyKind::Missing]);
        assert_eq!(cycle.anomalies[0].start_time, t0() + Duration::seconds(2));
        assert_eq!(cycle.anomalies[0].end_time, Some(t0() + Duration::seconds(9)));
        assert_eq!(agg.cycle_start(), Some(t0() + Duration::seconds(10)));
    }

    #[test]
    fn test_duplicate_keeps_first_seen() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        let mut first = at(3);
        first.pll.state = 1;
        let mut second = at(3);
        second.pll.state = 2;

        let mut records: Vec<SyncOutput> = (0..10).filter(|&s| s != 3).map(at).collect();
        records.insert(2, first);
        records.push(second);
        records.push(at(10));
        let closed = agg.ingest_frame("/f.dat", records, None);

        let cycle = &closed[0];
        assert_eq!(kinds(cycle), vec![AnomalyKind::Duplicate]);
        assert_eq!(cycle.anomalies[0].start_time, t0() + Duration::seconds(3));
        let window = cycle.window.as_ref().unwrap();
        assert_eq!(window.slots[3].as_ref().unwrap().record.pll.state, 1);
        assert_eq!(window.duplicates.len(), 1);
        assert_eq!(window.duplicates[0].record.pll.state, 2);
        assert_eq!(window.populated_seconds(), 10);
    }

    #[test]
    fn test_interior_gap() {
        let mut agg = WindowAggregator::new("P1", 4).unwrap();
        agg.ingest(at(0), None).unwrap();
        agg.ingest(at(3), None).unwrap();
        let closed = agg.ingest(at(4), None).unwrap();

        let cycle = &closed[0];
        assert_eq!(kinds(cycle), vec![AnomalyKind::Missing]);
        assert_eq!(cycle.anomalies[0].start_time, t0() + Duration::seconds(1));
        assert_eq!(cycle.anomalies[0].end_time, Some(t0() + Duration::seconds(2)));
    }

    #[test]
    fn test_leading_gap() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        let closed = agg.ingest_frame("/f.dat", (5..11).map(at).collect(), None);
        let cycle = &closed[0];
        assert_eq!(kinds(cycle), vec![AnomalyKind::Missing]);
        assert_eq!(cycle.anomalies[0].start_time, t0());
        assert_eq!(cycle.anomalies[0].end_time, Some(t0() + Duration::seconds(4)));
    }

    #[test]
    fn test_late_record_is_misplaced() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        agg.ingest_frame("/a.dat", (0..11).map(at).collect(), None);
        assert_eq!(agg.cycle_start(), Some(t0() + Duration::seconds(10)));

        // Second 4 arrives after its cycle has closed.
        let mut records = vec![at(4)];
        records.extend((11..21).map(at));
        let closed = agg.ingest_frame("/b.dat", records, None);

        let cycle = &closed[0];
        assert_eq!(kinds(cycle), vec![AnomalyKind::Misplaced]);
        let anomaly = &cycle.anomalies[0];
        assert_eq!(anomaly.start_time, t0() + Duration::seconds(4));
        assert_eq!(anomaly.reference_cycle_start, Some(t0() + Duration::seconds(10)));

        let window = cycle.window.as_ref().unwrap();
        assert_eq!(window.early.len(), 1);
        assert_eq!(window.populated_seconds(), 10);
        assert!(window
            .slots
            .iter()
            .flatten()
            .all(|r| r.time >= t0() + Duration::seconds(10)));
    }

    #[test]
    fn test_silent_cycles_advance() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        agg.ingest(at(0), None).unwrap();
        // Jump 35 seconds ahead: cycle 0 closes with data, cycles 10 and 20 are empty.
        let closed = agg.ingest(at(35), None).unwrap();

        assert_eq!(closed.len(), 2);
        assert!(closed[0].window.is_some());
        let silent = &closed[1];
        assert!(silent.window.is_none());
        assert_eq!(kinds(silent), vec![AnomalyKind::Missing]);
        assert_eq!(silent.cycle_start, t0() + Duration::seconds(10));
        assert_eq!(silent.cycle_end, t0() + Duration::seconds(30));
        assert_eq!(silent.anomalies[0].end_time, Some(t0() + Duration::seconds(29)));
        assert!(!silent.summary.written);
        assert_eq!(silent.summary.anomaly_count, 1);
        assert_eq!(agg.cycle_start(), Some(t0() + Duration::seconds(30)));
    }

    #[test]
    fn test_single_empty_cycle_keeps_length() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        agg.ingest(at(0), None).unwrap();
        let closed = agg.ingest(at(25), None).unwrap();

        assert_eq!(closed.len(), 2);
        assert_eq!(closed[1].cycle_start, t0() + Duration::seconds(10));
        assert_eq!(closed[1].cycle_end, t0() + Duration::seconds(20));
        assert_eq!(agg.cycle_start(), Some(t0() + Duration::seconds(20)));
    }

    #[test]
    fn test_far_future_record_closes_once() {
        let mut agg = WindowAggregator::new("P1", 1).unwrap();
        agg.ingest(at(0), None).unwrap();
        let ahead = Duration::days(30).num_seconds();
        let closed = agg.ingest(at(ahead), None).unwrap();

        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].window.as_ref().unwrap().populated_seconds(), 1);
        let silent = &closed[1];
        assert!(silent.window.is_none());
        assert_eq!(silent.anomalies.len(), 1);
        assert_eq!(silent.anomalies[0].start_time, t0() + Duration::seconds(1));
        assert_eq!(silent.anomalies[0].end_time, Some(t0() + Duration::seconds(ahead - 1)));
        assert_eq!(agg.cycle_start(), Some(t0() + Duration::seconds(ahead)));
        assert_eq!(agg.buffered(), 1);
    }

    #[test]
    fn test_reversed_first_frame_fills_window() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        let records: Vec<SyncOutput> = (0..11).rev().map(at).collect();
        let closed = agg.ingest_frame("/f.dat", records, Some(FrameId(1)));

        assert_eq!(closed.len(), 1);
        let cycle = &closed[0];
        assert_eq!(cycle.cycle_start, t0());
        assert!(cycle.anomalies.is_empty());
        let window = cycle.window.as_ref().unwrap();
        assert!(window.early.is_empty());
        assert_eq!(window.populated_seconds(), 10);
        assert_eq!(agg.cycle_start(), Some(t0() + Duration::seconds(10)));
    }

    #[test]
    fn test_close_cycle_always_advances() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        assert!(agg.close_cycle().is_none());
        agg.ingest(at(0), None).unwrap();
        for n in 1..4 {
            agg.close_cycle().unwrap();
            assert_eq!(agg.cycle_start(), Some(t0() + Duration::seconds(10 * n)));
        }
    }

    #[test]
    fn test_first_frame_path_rolls_over() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        agg.ingest_frame("/a.dat", (0..5).map(at).collect(), None);
        let closed = agg.ingest_frame("/b.dat", (5..12).map(at).collect(), None);
        let window = closed[0].window.as_ref().unwrap();
        assert_eq!(window.first_frame_path.as_deref(), Some("/a.dat"));
        assert_eq!(agg.state().first_frame_path.as_deref(), Some("/b.dat"));
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        let mut record = at(0);
        record.data.times = [2016, 2, 31, 0, 0, 0];
        assert!(agg.ingest(record.clone(), None).is_err());
        assert!(agg.ingest_frame("/f.dat", vec![record], None).is_empty());
        assert_eq!(agg.buffered(), 0);
        assert_eq!(agg.cycle_start(), None);
    }

    #[test]
    fn test_restore_and_merge() {
        let mut first = WindowAggregator::new("P1", 10).unwrap();
        first.ingest_frame("/a.dat", (0..4).map(at).collect(), Some(FrameId(1)));
        let saved = first.into_state();

        let mut second = WindowAggregator::with_state("P1", 10, saved.clone()).unwrap();
        assert_eq!(second.cycle_start(), Some(t0()));
        assert_eq!(second.buffered(), 4);

        // A live connection that already buffered data absorbs the handed-over state.
        let mut live = WindowAggregator::new("P1", 10).unwrap();
        live.ingest_frame("/c.dat", (4..6).map(at).collect(), None);
        live.merge(saved);
        assert_eq!(live.buffered(), 6);
        assert_eq!(live.state().first_frame_path.as_deref(), Some("/a.dat"));

        let closed = second.ingest_frame("/b.dat", (4..11).map(at).collect(), None);
        let window = closed[0].window.as_ref().unwrap();
        assert_eq!(window.populated_seconds(), 10);
        assert_eq!(window.frame_ids(), vec![FrameId(1)]);
    }
}

//! # uPMU `sync_output` Record Codec
//!
//! This module decodes and encodes the fixed-layout binary record written by uPMU
//! devices once per wall-clock second. All fields are little-endian.
//!
//! ## Layout
//!
//! | Offset | Size     | Field                                        |
//! |--------|----------|----------------------------------------------|
//! | 0      | 4        | sample rate in milliseconds (`f32`)          |
//! | 4      | 24       | `times`: year, month, day, hour, min, second |
//! | 28     | 480      | `lockstate`: 120 x `i32`                     |
//! | 508    | 6 x 960  | `L1`..`C3`: 120 x (angle `f32`, mag `f32`)   |
//! | 6268   | 16       | PLL stats: `u32`, `u32`, `i32`, `i32`        |
//! | 6284   | 28       | GPS stats: 7 x `f32`                         |
//!
//! ## Usage
//!
//! `decode_all` is applied to the payload of a complete frame; partial records are never
//! decoded. `encode_one` is the structural inverse and is used for backup files, the
//! device simulator and round-trip tests.

use bytes::{Buf, BufMut};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use super::common::{
    Channel, CodecError, CHANNEL_COUNT, RECORD_SIZE, SAMPLES_PER_RECORD,
};

/// One phasor sub-sample: angle and magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncPoint {
    pub angle: f32,
    pub magnitude: f32,
}

/// The measurement block of a record (`sync_output_msgq`).
///
/// # Fields
///
/// * `sample_rate_ms`: Milliseconds between consecutive sub-samples.
/// * `times`: UTC year, month, day, hour, minute and second of the first sub-sample.
/// * `lockstate`: Time-lock status per sub-sample.
/// * `channels`: Phasor sub-samples, indexed by `Channel::index()`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutputRecord {
    pub sample_rate_ms: f32,
    pub times: [i32; 6],
    pub lockstate: [i32; SAMPLES_PER_RECORD],
    pub channels: [[SyncPoint; SAMPLES_PER_RECORD]; CHANNEL_COUNT],
}

impl SyncOutputRecord {
    /// A record with every field zeroed.
    pub fn zeroed() -> Self {
        SyncOutputRecord {
            sample_rate_ms: 0.0,
            times: [0; 6],
            lockstate: [0; SAMPLES_PER_RECORD],
            channels: [[SyncPoint::default(); SAMPLES_PER_RECORD]; CHANNEL_COUNT],
        }
    }

    pub fn channel(&self, channel: Channel) -> &[SyncPoint; SAMPLES_PER_RECORD] {
        &self.channels[channel.index()]
    }

    pub fn channel_mut(&mut self, channel: Channel) -> &mut [SyncPoint; SAMPLES_PER_RECORD] {
        &mut self.channels[channel.index()]
    }
}

/// PLL statistics block (`sync_pll_stats_msgq`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PllStats {
    pub state: u32,
    pub pps_period: u32,
    pub curr_error: i32,
    pub center_freq_offset: i32,
}

/// GPS statistics block (`sync_gps_stats`). Every field is transmitted as `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpsStats {
    pub altitude: f32,
    pub latitude: f32,
    pub hdop: f32,
    pub longitude: f32,
    pub satellites: f32,
    pub state: f32,
    pub has_fix: f32,
}

/// One decoded record covering a single second at 120 sub-samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutput {
    pub data: SyncOutputRecord,
    pub pll: PllStats,
    pub gps: GpsStats,
}

impl SyncOutput {
    pub fn zeroed() -> Self {
        SyncOutput {
            data: SyncOutputRecord::zeroed(),
            pll: PllStats::default(),
            gps: GpsStats::default(),
        }
    }

    /// Converts the `times` field to a UTC timestamp.
    ///
    /// # Returns
    ///
    /// * `Ok(DateTime<Utc>)`: The second this record starts at.
    /// * `Err(CodecError::InvalidTimestamp)`: If `times` is not a valid calendar time.
    pub fn timestamp(&self) -> Result<DateTime<Utc>, CodecError> {
        times_to_datetime(&self.data.times)
    }

    /// Nanoseconds between consecutive sub-samples.
    pub fn sample_interval_nanos(&self) -> f64 {
        self.data.sample_rate_ms as f64 * 1_000_000.0
    }

    pub fn set_timestamp(&mut self, time: &DateTime<Utc>) {
        self.data.times = datetime_to_times(time);
    }
}

/// Interprets a `times` array as a UTC second.
pub fn times_to_datetime(times: &[i32; 6]) -> Result<DateTime<Utc>, CodecError> {
    let invalid = || CodecError::InvalidTimestamp { times: *times };
    let field = |v: i32| u32::try_from(v).map_err(|_| invalid());

    let (month, day) = (field(times[1])?, field(times[2])?);
    let (hour, minute, second) = (field(times[3])?, field(times[4])?, field(times[5])?);

    NaiveDate::from_ymd_opt(times[0], month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .map(|naive| naive.and_utc())
        .ok_or_else(invalid)
}

/// Builds the `times` array for a UTC timestamp, truncated to the second.
pub fn datetime_to_times(time: &DateTime<Utc>) -> [i32; 6] {
    [
        time.year(),
        time.month() as i32,
        time.day() as i32,
        time.hour() as i32,
        time.minute() as i32,
        time.second() as i32,
    ]
}

/// Decodes exactly one record from the front of `buffer`.
///
/// # Parameters
///
/// * `buffer`: Bytes starting at a record boundary; at least `RECORD_SIZE` long.
///
/// # Returns
///
/// * `Ok((SyncOutput, remainder))`: The record and the bytes following it.
/// * `Err(CodecError::Truncated)`: If fewer than `RECORD_SIZE` bytes are available.
pub fn decode_one(buffer: &[u8]) -> Result<(SyncOutput, &[u8]), CodecError> {
    if buffer.len() < RECORD_SIZE {
        return Err(CodecError::Truncated {
            needed: RECORD_SIZE,
            available: buffer.len(),
        });
    }
    let (mut cursor, remainder) = buffer.split_at(RECORD_SIZE);

    let mut data = SyncOutputRecord::zeroed();
    data.sample_rate_ms = cursor.get_f32_le();
    for t in data.times.iter_mut() {
        *t = cursor.get_i32_le();
    }
    for lock in data.lockstate.iter_mut() {
        *lock = cursor.get_i32_le();
    }
    for channel in data.channels.iter_mut() {
        for point in channel.iter_mut() {
            point.angle = cursor.get_f32_le();
            point.magnitude = cursor.get_f32_le();
        }
    }

    let pll = PllStats {
        state: cursor.get_u32_le(),
        pps_period: cursor.get_u32_le(),
        curr_error: cursor.get_i32_le(),
        center_freq_offset: cursor.get_i32_le(),
    };

    let gps = GpsStats {
        altitude: cursor.get_f32_le(),
        latitude: cursor.get_f32_le(),
        hdop: cursor.get_f32_le(),
        longitude: cursor.get_f32_le(),
        satellites: cursor.get_f32_le(),
        state: cursor.get_f32_le(),
        has_fix: cursor.get_f32_le(),
    };
    debug_assert!(cursor.is_empty());

    Ok((SyncOutput { data, pll, gps }, remainder))
}

/// Decodes a complete payload into records, in payload order.
///
/// # Returns
///
/// * `Ok(Vec<SyncOutput>)`: One entry per `RECORD_SIZE` bytes (empty for an empty payload).
/// * `Err(CodecError::LengthMismatch)`: If `buffer.len()` is not a multiple of
///   `RECORD_SIZE`; `extra_bytes` is the remainder.
pub fn decode_all(buffer: &[u8]) -> Result<Vec<SyncOutput>, CodecError> {
    let extra_bytes = buffer.len() % RECORD_SIZE;
    if extra_bytes != 0 {
        return Err(CodecError::LengthMismatch {
            extra_bytes,
            record_size: RECORD_SIZE,
        });
    }

    let mut records = Vec::with_capacity(buffer.len() / RECORD_SIZE);
    let mut rest = buffer;
    while !rest.is_empty() {
        let (record, remainder) = decode_one(rest)?;
        records.push(record);
        rest = remainder;
    }
    Ok(records)
}

/// Appends the encoded form of `record` to `out`.
pub fn encode_one<B: BufMut>(record: &SyncOutput, out: &mut B) {
    let data = &record.data;
    out.put_f32_le(data.sample_rate_ms);
    for t in data.times {
        out.put_i32_le(t);
    }
    for lock in data.lockstate {
        out.put_i32_le(lock);
    }
    for channel in data.channels.iter() {
        for point in channel.iter() {
            out.put_f32_le(point.angle);
            out.put_f32_le(point.magnitude);
        }
    }

    out.put_u32_le(record.pll.state);
    out.put_u32_le(record.pll.pps_period);
    out.put_i32_le(record.pll.curr_error);
    out.put_i32_le(record.pll.center_freq_offset);

    let gps = &record.gps;
    for value in [
        gps.altitude,
        gps.latitude,
        gps.hdop,
        gps.longitude,
        gps.satellites,
        gps.state,
        gps.has_fix,
    ] {
        out.put_f32_le(value);
    }
}

/// Encodes a sequence of records into one contiguous payload.
pub fn encode_all(records: &[SyncOutput]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * RECORD_SIZE);
    for record in records {
        encode_one(record, &mut out);
    }
    out
}

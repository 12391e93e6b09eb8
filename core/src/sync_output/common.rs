//! # uPMU Record Common Types
//!
//! This module defines the shared constants, channel enumeration and error types used
//! when decoding the fixed-layout `sync_output` records produced by uPMU devices and the
//! wire frames that carry them.
//!
//! ## Key Components
//!
//! - `Channel`: The six measured channels of a uPMU (three voltages, three currents).
//! - `CodecError`: Failures while decoding a record payload.
//! - `FramingError`: Invalid length geometry announced by a peer.
//! - Size constants (`SYNC_DATA_SIZE`, `PLL_STATS_SIZE`, `GPS_STATS_SIZE`, `RECORD_SIZE`).
//!
//! ## Usage
//!
//! The `record` module relies on these constants for offsets, the `framing` module returns
//! `FramingError`, and the session layer branches on both to decide which acknowledgment
//! to send back to the device.

use std::fmt;
use thiserror::Error;

/// Number of sub-samples carried by one record (one wall-clock second).
pub const SAMPLES_PER_RECORD: usize = 120;

/// Number of channels per record.
pub const CHANNEL_COUNT: usize = 6;

/// Size in bytes of one encoded `SyncPoint` (angle, magnitude).
pub const SYNC_POINT_SIZE: usize = 8;

/// Size of the sample rate, timestamp and lockstate prefix of the data block.
pub const SYNC_DATA_PREFIX_SIZE: usize = 4 + 6 * 4 + SAMPLES_PER_RECORD * 4;

/// Size of the `sync_output_msgq` block: 508 + 720 * 8 bytes.
pub const SYNC_DATA_SIZE: usize =
    SYNC_DATA_PREFIX_SIZE + CHANNEL_COUNT * SAMPLES_PER_RECORD * SYNC_POINT_SIZE;

/// Size of the PLL statistics block (4 x 32-bit integers).
pub const PLL_STATS_SIZE: usize = 16;

/// Size of the GPS statistics block (7 x 32-bit floats).
pub const GPS_STATS_SIZE: usize = 28;

/// Total size of one encoded `SyncOutput` record.
pub const RECORD_SIZE: usize = SYNC_DATA_SIZE + PLL_STATS_SIZE + GPS_STATS_SIZE;

/// Measured channel of a uPMU, in on-wire order.
///
/// `L1`-`L3` are the line voltages and `C1`-`C3` the currents. The discriminant is the
/// index into `SyncOutputRecord::channels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    L1 = 0,
    L2 = 1,
    L3 = 2,
    C1 = 3,
    C2 = 4,
    C3 = 5,
}

impl Channel {
    /// All channels in on-wire (and CSV column) order.
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::L1,
        Channel::L2,
        Channel::L3,
        Channel::C1,
        Channel::C2,
        Channel::C3,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::L1 => "L1",
            Channel::L2 => "L2",
            Channel::L3 => "L3",
            Channel::C1 => "C1",
            Channel::C2 => "C2",
            Channel::C3 => "C3",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while decoding record payloads.
///
/// # Variants
///
/// * `LengthMismatch`: The payload is not a whole number of records.
/// * `Truncated`: Fewer bytes than one record were handed to `decode_one`.
/// * `InvalidTimestamp`: The `times` field does not name a real UTC second.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error(
        "payload does not contain a whole number of sync_outputs ({extra_bytes} extra bytes, record size {record_size})"
    )]
    LengthMismatch {
        extra_bytes: usize,
        record_size: usize,
    },
    #[error("truncated record: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
    #[error("invalid record timestamp {times:?}")]
    InvalidTimestamp { times: [i32; 6] },
}

/// Invalid length geometry announced in a frame header.
///
/// Raised only for lengths that exceed the configured `FrameLimits`; short reads never
/// produce an error, the decoder simply waits for more bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("filepath length fails sanity check: {length} > {limit}")]
    PathTooLong { length: u32, limit: u32 },
    #[error("serial number length fails sanity check: {length} > {limit}")]
    SerialTooLong { length: u32, limit: u32 },
    #[error("data length fails sanity check: {length} > {limit}")]
    PayloadTooLong { length: u32, limit: u32 },
}

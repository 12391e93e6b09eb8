//! # uPMU Test Record Generator
//!
//! Utilities for generating synthetic `SyncOutput` records and payloads. They are used by
//! the codec tests, the decode benchmarks and the device simulator.
//!
//! ## Key Components
//!
//! - `random_sync_output`: A record at a given second with randomized measurements.
//! - `sine_sync_output`: A deterministic record with a 60 Hz shaped L1 magnitude.
//! - `random_payload`: `count` consecutive seconds encoded as one payload.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use super::common::{Channel, SAMPLES_PER_RECORD};
use super::record::{encode_all, GpsStats, PllStats, SyncOutput};

/// Devices report 120 samples per second.
pub const DEFAULT_SAMPLE_RATE_MS: f32 = 1000.0 / 120.0;

/// Generates a record for the second starting at `time` with random phasors.
pub fn random_sync_output(time: &DateTime<Utc>) -> SyncOutput {
    let mut rng = rand::rng();
    let mut record = SyncOutput::zeroed();
    record.data.sample_rate_ms = DEFAULT_SAMPLE_RATE_MS;
    record.set_timestamp(time);

    for lock in record.data.lockstate.iter_mut() {
        *lock = rng.random_range(0..2);
    }
    for channel in Channel::ALL {
        let nominal: f32 = match channel {
            Channel::L1 | Channel::L2 | Channel::L3 => 7200.0,
            _ => 40.0,
        };
        for point in record.data.channel_mut(channel).iter_mut() {
            point.angle = rng.random::<f32>() * 360.0 - 180.0;
            point.magnitude = nominal * (1.0 + (rng.random::<f32>() - 0.5) * 0.01);
        }
    }

    record.pll = PllStats {
        state: rng.random_range(0..4),
        pps_period: 100_000_000,
        curr_error: rng.random_range(-50..50),
        center_freq_offset: rng.random_range(-1000..1000),
    };
    record.gps = GpsStats {
        altitude: 52.0,
        latitude: 37.87,
        hdop: 0.9,
        longitude: -122.26,
        satellites: rng.random_range(4..12) as f32,
        state: 3.0,
        has_fix: 1.0,
    };
    record
}

/// Generates a deterministic record: a full sine period on the L1 magnitude.
pub fn sine_sync_output(time: &DateTime<Utc>) -> SyncOutput {
    let mut record = SyncOutput::zeroed();
    record.data.sample_rate_ms = DEFAULT_SAMPLE_RATE_MS;
    record.set_timestamp(time);
    for (i, point) in record.data.channel_mut(Channel::L1).iter_mut().enumerate() {
        point.magnitude = (i as f32 * 2.0 * std::f32::consts::PI / SAMPLES_PER_RECORD as f32).sin();
    }
    record
}

/// Encodes `count` consecutive seconds starting at `start` into one payload.
pub fn random_payload(start: &DateTime<Utc>, count: usize) -> Vec<u8> {
    let records: Vec<SyncOutput> = (0..count)
        .map(|i| random_sync_output(&(*start + Duration::seconds(i as i64))))
        .collect();
    encode_all(&records)
}

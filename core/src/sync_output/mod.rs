//! # uPMU Telemetry Records
//!
//! This module provides decoding and encoding of the fixed-format `sync_output` records
//! that uPMU devices emit once per second, along with the shared error types of the wire
//! protocol.
//!
//! ## Submodules
//!
//! - `common`: Size constants, the `Channel` enumeration, `CodecError` and `FramingError`.
//! - `record`: Record types (`SyncOutput`, `SyncPoint`, `PllStats`, `GpsStats`) and the
//!   `decode_one` / `decode_all` / `encode_one` codec.
//! - `random`: Synthetic records for tests, benches and the device simulator.

pub mod common;
pub mod random;
pub mod record;

pub use common::{Channel, CodecError, FramingError, RECORD_SIZE, SAMPLES_PER_RECORD};
pub use record::{
    decode_all, decode_one, encode_all, encode_one, GpsStats, PllStats, SyncOutput,
    SyncOutputRecord, SyncPoint,
};

#[cfg(test)]
mod tests;

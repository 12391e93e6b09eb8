//! # uPMU Telemetry Ingestion
//!
//! This crate provides the protocol and processing core of a receiver for micro
//! phasor measurement units (uPMUs). Devices stream binary files of one-second
//! `sync_output` records over TCP; the receiver stores every frame, acknowledges it,
//! groups records into fixed-duration wall-clock cycles per device and exports each
//! closed cycle as a table of 120 Hz rows.
//!
//! ## Submodules
//!
//! - `sync_output`: Record layout, codec and shared error types.
//!   - `common`: Size constants, `Channel`, `CodecError`, `FramingError`.
//!   - `record`: `SyncOutput` and the `decode_one` / `decode_all` / `encode_one` codec.
//!   - `random`: Synthetic records for tests, benches and the device simulator.
//! - `framing`: Incremental `FrameDecoder` for the length-prefixed wire protocol.
//! - `window`: Per-device cycle windowing.
//!   - `aggregator`: `WindowAggregator`, `DeviceState`, `Window`.
//!   - `anomaly`: Duplicate, missing and misplaced record reports, cycle summaries.
//! - `projector`: Record to row expansion and Arrow record batches.
//! - `storage`: The `Storage` collaborator trait and an in-memory implementation.
//! - `export`: The `WindowSink` trait and the CSV sink.
//! - `aliases`: Serial-number aliases.
//! - `backup`: Local backup of payloads that could not be stored.
//! - `session`: Per-connection orchestration and the shared pending-state map.
//!
//! ## Usage
//!
//! A server feeds socket bytes to a `FrameDecoder`, hands each `Frame` to a `Session`,
//! writes back the returned acknowledgment and then lets the session window the records.
//! The `upmu_receiver` crate provides such a server on top of tokio and SQLite.

pub mod sync_output;

pub mod framing;

pub mod window {
    pub mod aggregator;

    pub mod anomaly;
}

pub mod projector;

pub mod aliases;
pub mod backup;
pub mod export;
pub mod session;
pub mod storage;

//! # uPMU Receiver
//!
//! Network and persistence layer around `upmu_core`.
//!
//! ## Submodules
//!
//! - `config`: `ReceiverConfig` (command-line flags and environment variables).
//! - `server`: TCP listener, per-connection tasks and the acknowledgment protocol.
//! - `sqlite_store`: SQLite implementation of the `Storage` collaborator.
//! - `simulator`: A virtual uPMU that streams generated files.
//! - `dump`: Inspection of raw payload files.

pub mod config;
pub mod dump;
pub mod server;
pub mod simulator;
pub mod sqlite_store;

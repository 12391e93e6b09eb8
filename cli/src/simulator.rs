//! # Simulated uPMU
//!
//! Streams generated files to a receiver the way a device does: one frame per file,
//! waiting for the 4-byte acknowledgment before sending the next. Each file holds
//! `seconds_per_file` consecutive one-second records starting at a wall-clock aligned
//! second; the ack id is incremented per frame and checked against the echo.

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use clap::Args;
use log::{info, warn};
use rand::Rng;
use std::time::Duration;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use upmu_core::framing::{encode_frame, FAILURE_ACK};
use upmu_core::sync_output::random::{random_sync_output, sine_sync_output};
use upmu_core::sync_output::{encode_all, SyncOutput};

#[derive(Debug, Clone, Args)]
pub struct SimulatorConfig {
    /// Receiver address
    #[arg(short, long, default_value = "127.0.0.1:1883")]
    pub target: String,

    /// Numeric serial; the device reports itself as `P<serial>`
    #[arg(long, default_value_t = 1)]
    pub serial: u32,

    /// Seconds to wait between files and before reconnecting
    #[arg(short, long, default_value_t = 1.0)]
    pub interval: f64,

    /// Records (seconds) per file
    #[arg(long, default_value_t = 120)]
    pub seconds_per_file: u32,

    /// Stop after sending this many files
    #[arg(long)]
    pub files: Option<u64>,

    /// Fill records with random phasors instead of a sine wave
    #[arg(long)]
    pub random: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub sent: u64,
    pub acknowledged: u64,
    pub rejected: u64,
    pub reconnects: u64,
}

impl SimulatorConfig {
    pub fn serial_number(&self) -> String {
        format!("P{}", self.serial)
    }

    fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval.max(0.0))
    }

    fn done(&self, stats: &SimulatorStats) -> bool {
        self.files.is_some_and(|limit| stats.sent >= limit)
    }
}

/// Builds the payload of one simulated file.
pub fn generate_file(start: DateTime<Utc>, seconds: u32, random: bool) -> Vec<u8> {
    let records: Vec<SyncOutput> = (0..seconds as i64)
        .map(|s| {
            let time = start + ChronoDuration::seconds(s);
            if random {
                random_sync_output(&time)
            } else {
                sine_sync_output(&time)
            }
        })
        .collect();
    encode_all(&records)
}

/// Sends one frame and waits for its acknowledgment.
pub async fn send_frame(
    stream: &mut TcpStream,
    ack_id: u32,
    path: &str,
    serial_number: &str,
    payload: &[u8],
) -> io::Result<[u8; 4]> {
    stream
        .write_all(&encode_frame(ack_id.to_le_bytes(), path, serial_number, payload))
        .await?;
    let mut ack = [0u8; 4];
    stream.read_exact(&mut ack).await?;
    Ok(ack)
}

/// Runs the simulator until `files` frames were sent, or forever.
pub async fn run_simulator(config: SimulatorConfig) -> io::Result<SimulatorStats> {
    let serial_number = config.serial_number();
    let interval = config.interval();
    let mut stats = SimulatorStats::default();
    let mut ack_id: u32 = 0;
    let mut start = Utc::now()
        .duration_trunc(ChronoDuration::seconds(1))
        .unwrap_or_else(|_| Utc::now());

    let jitter = interval.mul_f64(rand::rng().random::<f64>());
    tokio::time::sleep(jitter).await;

    while !config.done(&stats) {
        info!("Connecting virtual PMU {} to server {}", serial_number, config.target);
        let mut stream = match TcpStream::connect(&config.target).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Could not connect to receiver: {}", e);
                stats.reconnects += 1;
                tokio::time::sleep(interval).await;
                continue;
            }
        };

        while !config.done(&stats) {
            let payload = generate_file(start, config.seconds_per_file, config.random);
            let path = format!("/simulation/file{}.dat", ack_id);

            let ack = match send_frame(&mut stream, ack_id, &path, &serial_number, &payload).await {
                Ok(ack) => ack,
                Err(e) => {
                    warn!("Lost connection while sending {}: {}", path, e);
                    stats.reconnects += 1;
                    tokio::time::sleep(interval).await;
                    break;
                }
            };
            stats.sent += 1;
            if ack == ack_id.to_le_bytes() {
                stats.acknowledged += 1;
            } else {
                if ack == FAILURE_ACK {
                    warn!("Receiver rejected {}", path);
                } else {
                    warn!(
                        "Received improper confirmation of receipt: got {}, expected {}",
                        u32::from_le_bytes(ack),
                        ack_id
                    );
                }
                stats.rejected += 1;
            }

            ack_id = ack_id.wrapping_add(1);
            start += ChronoDuration::seconds(config.seconds_per_file as i64);
            if !config.done(&stats) {
                tokio::time::sleep(interval).await;
            }
        }
    }

    info!(
        "Virtual PMU {} sent {} files ({} acknowledged)",
        serial_number, stats.sent, stats.acknowledged
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use upmu_core::sync_output::{decode_all, RECORD_SIZE};

    #[test]
    fn test_generate_file() {
        let start = Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap();
        let payload = generate_file(start, 5, false);
        assert_eq!(payload.len(), 5 * RECORD_SIZE);

        let records = decode_all(&payload).unwrap();
        assert_eq!(records[4].timestamp().unwrap(), start + ChronoDuration::seconds(4));
    }

    #[test]
    fn test_serial_number() {
        let config = SimulatorConfig {
            target: "127.0.0.1:1".to_string(),
            serial: 3001,
            interval: 0.0,
            seconds_per_file: 1,
            files: Some(0),
            random: false,
        };
        assert_eq!(config.serial_number(), "P3001");
        assert!(config.done(&SimulatorStats::default()));
    }
}

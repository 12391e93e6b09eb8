//! Anomaly and per-cycle summary records produced when a device cycle is closed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Two records carry the same second.
    Duplicate,
    /// One or more seconds have no record.
    Missing,
    /// Records arrived after their cycle had already been closed.
    Misplaced,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::Duplicate => "duplicate",
            AnomalyKind::Missing => "missing",
            AnomalyKind::Misplaced => "misplaced",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only record of a cadence violation for one device.
///
/// # Fields
///
/// * `serial_number`: Device the anomaly belongs to.
/// * `kind`: Duplicate, missing or misplaced.
/// * `detected_at`: Wall-clock time the cycle was closed.
/// * `start_time`: First affected second.
/// * `end_time`: Last affected second (missing and misplaced only).
/// * `reference_cycle_start`: Start of the cycle the misplaced records were found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub serial_number: String,
    pub kind: AnomalyKind,
    pub detected_at: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub reference_cycle_start: Option<DateTime<Utc>>,
}

impl Anomaly {
    pub fn duplicate(serial_number: &str, time: DateTime<Utc>, detected_at: DateTime<Utc>) -> Self {
        Anomaly {
            serial_number: serial_number.to_string(),
            kind: AnomalyKind::Duplicate,
            detected_at,
            start_time: time,
            end_time: None,
            reference_cycle_start: None,
        }
    }

    pub fn missing(
        serial_number: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Anomaly {
            serial_number: serial_number.to_string(),
            kind: AnomalyKind::Missing,
            detected_at,
            start_time,
            end_time: Some(end_time),
            reference_cycle_start: None,
        }
    }

    pub fn misplaced(
        serial_number: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        cycle_start: DateTime<Utc>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Anomaly {
            serial_number: serial_number.to_string(),
            kind: AnomalyKind::Misplaced,
            detected_at,
            start_time,
            end_time: Some(end_time),
            reference_cycle_start: Some(cycle_start),
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AnomalyKind::Duplicate => {
                write!(f, "{}: duplicate record for {}", self.serial_number, self.start_time)
            }
            AnomalyKind::Missing => write!(
                f,
                "{}: missing record(s) (no data from {} to {})",
                self.serial_number,
                self.start_time,
                self.end_time.unwrap_or(self.start_time)
            ),
            AnomalyKind::Misplaced => write!(
                f,
                "{}: misplaced record(s) from {} to {} (cycle starts at {})",
                self.serial_number,
                self.start_time,
                self.end_time.unwrap_or(self.start_time),
                self.reference_cycle_start.unwrap_or(self.start_time)
            ),
        }
    }
}

/// Outcome of one closed cycle, kept alongside the anomaly log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub serial_number: String,
    pub detected_at: DateTime<Utc>,
    pub cycle_start: DateTime<Utc>,
    pub next_cycle_start: DateTime<Utc>,
    pub anomaly_count: usize,
    pub written: bool,
}

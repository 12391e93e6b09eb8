//! Inspection of raw payload files (as sent by a device or written to the backup
//! directory).

use clap::Args;
use serde::Serialize;
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use upmu_core::export::write_rows_csv;
use upmu_core::projector::{project, Row};
use upmu_core::sync_output::{decode_all, SyncOutput};

#[derive(Debug, Clone, Args)]
pub struct DumpArgs {
    /// Raw payload file (a sequence of sync_output records)
    pub file: PathBuf,

    /// Write all rows to this CSV file instead of printing a summary
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Print one JSON object per record
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub time: String,
    pub sample_rate_ms: f32,
    pub pll_state: u32,
    pub satellites: f32,
    pub has_fix: bool,
}

impl RecordSummary {
    pub fn new(record: &SyncOutput) -> Self {
        RecordSummary {
            time: match record.timestamp() {
                Ok(time) => time.to_rfc3339(),
                Err(_) => format!("invalid {:?}", record.data.times),
            },
            sample_rate_ms: record.data.sample_rate_ms,
            pll_state: record.pll.state,
            satellites: record.gps.satellites,
            has_fix: record.gps.has_fix != 0.0,
        }
    }
}

pub fn run_dump(args: &DumpArgs, out: &mut impl Write) -> Result<(), Box<dyn Error + Send + Sync>> {
    let payload = std::fs::read(&args.file)?;
    let records = decode_all(&payload)?;

    if let Some(csv) = &args.csv {
        let mut rows: Vec<Row> = Vec::with_capacity(records.len() * 120);
        for record in &records {
            rows.extend(project(record)?);
        }
        write_rows_csv(csv, &rows)?;
        writeln!(out, "Wrote {} rows to {}", rows.len(), csv.display())?;
        return Ok(());
    }

    for record in &records {
        let summary = RecordSummary::new(record);
        if args.json {
            writeln!(out, "{}", serde_json::to_string(&summary)?)?;
        } else {
            writeln!(
                out,
                "{}  rate {:.4} ms  pll {}  satellites {}  fix {}",
                summary.time,
                summary.sample_rate_ms,
                summary.pll_state,
                summary.satellites,
                summary.has_fix
            )?;
        }
    }
    writeln!(out, "{} records", records.len())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use upmu_core::sync_output::random::random_payload;

    fn payload_file(seconds: usize) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let start = Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap();
        std::fs::write(file.path(), random_payload(&start, seconds)).unwrap();
        file
    }

    #[test]
    fn test_dump_summary() {
        let file = payload_file(3);
        let args = DumpArgs {
            file: file.path().to_path_buf(),
            csv: None,
            json: true,
        };
        let mut out = Vec::new();
        run_dump(&args, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("\"time\":\"2016-06-01T12:00:00+00:00\""));
        assert_eq!(lines[3], "3 records");
    }

    #[test]
    fn test_dump_csv() {
        let file = payload_file(2);
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("rows.csv");
        let args = DumpArgs {
            file: file.path().to_path_buf(),
            csv: Some(csv.clone()),
            json: false,
        };
        run_dump(&args, &mut Vec::new()).unwrap();
        let contents = std::fs::read_to_string(csv).unwrap();
        assert_eq!(contents.lines().count(), 1 + 240);
    }

    #[test]
    fn test_dump_rejects_partial_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), [0u8; 100]).unwrap();
        let args = DumpArgs {
            file: file.path().to_path_buf(),
            csv: None,
            json: false,
        };
        assert!(run_dump(&args, &mut Vec::new()).is_err());
    }
}

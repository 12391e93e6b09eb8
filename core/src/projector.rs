//! # Row Projection
//!
//! Expands decoded records into the 120 timestamped rows each of them stands for, and
//! assembles closed windows into Arrow `RecordBatch`es for export.
//!
//! ## Key Components
//!
//! - `HEADER`: Column labels, identical for every export.
//! - `Row`: One sub-sample: time in nanoseconds since the epoch, lockstate, twelve phasor
//!   values and the GPS satellite/fix fields of the parent record.
//! - `project` / `project_at`: Record to rows.
//! - `WindowExport`: A window in row form (slot rows, duplicate rows, early rows) with
//!   batch accessors. Empty slots become null rows.

use arrow::array::{ArrayRef, Float32Array, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::sync_output::common::{Channel, CodecError, CHANNEL_COUNT, SAMPLES_PER_RECORD};
use crate::sync_output::record::SyncOutput;
use crate::window::aggregator::{BufferedRecord, Window};

/// Angle and magnitude for each channel.
pub const PHASOR_COLUMNS: usize = CHANNEL_COUNT * 2;

pub const HEADER: [&str; 4 + PHASOR_COLUMNS] = [
    "time",
    "lockstate",
    "L1Ang",
    "L1Mag",
    "L2Ang",
    "L2Mag",
    "L3Ang",
    "L3Mag",
    "C1Ang",
    "C1Mag",
    "C2Ang",
    "C2Mag",
    "C3Ang",
    "C3Mag",
    "satellites",
    "hasFix",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Row {
    pub time: i64,
    pub lockstate: i32,
    /// Angle, magnitude pairs in channel order.
    pub phasors: [f32; PHASOR_COLUMNS],
    pub satellites: f32,
    pub has_fix: f32,
}

/// Expands a record into its 120 rows, using the record's own timestamp as base.
pub fn project(record: &SyncOutput) -> Result<Vec<Row>, CodecError> {
    project_at(record, record.timestamp()?)
}

/// Expands a record into 120 rows starting at `base`.
///
/// Row `i` is stamped `base + round(i * interval)` where the interval is derived from the
/// record's sample rate.
pub fn project_at(record: &SyncOutput, base: DateTime<Utc>) -> Result<Vec<Row>, CodecError> {
    let base_nanos = base
        .timestamp_nanos_opt()
        .ok_or(CodecError::InvalidTimestamp {
            times: record.data.times,
        })?;
    let interval = record.sample_interval_nanos();

    let rows = (0..SAMPLES_PER_RECORD)
        .map(|i| {
            let mut phasors = [0.0f32; PHASOR_COLUMNS];
            for channel in Channel::ALL {
                let point = record.data.channel(channel)[i];
                phasors[channel.index() * 2] = point.angle;
                phasors[channel.index() * 2 + 1] = point.magnitude;
            }
            Row {
                time: base_nanos + (i as f64 * interval).round() as i64,
                lockstate: record.data.lockstate[i],
                phasors,
                satellites: record.gps.satellites,
                has_fix: record.gps.has_fix,
            }
        })
        .collect();
    Ok(rows)
}

/// Arrow schema matching `HEADER`. Every column is nullable so empty slots can be
/// represented.
pub fn schema() -> Arc<Schema> {
    let mut fields = vec![
        Field::new(HEADER[0], DataType::Int64, true),
        Field::new(HEADER[1], DataType::Int32, true),
    ];
    for name in &HEADER[2..] {
        fields.push(Field::new(*name, DataType::Float32, true));
    }
    Arc::new(Schema::new(fields))
}

/// Builds a batch from rows, writing nulls for `None` entries.
pub fn rows_to_batch(rows: &[Option<Row>]) -> Result<RecordBatch, ArrowError> {
    let time: Int64Array = rows.iter().map(|r| r.map(|r| r.time)).collect();
    let lockstate: Int32Array = rows.iter().map(|r| r.map(|r| r.lockstate)).collect();
    let mut columns: Vec<ArrayRef> = vec![Arc::new(time), Arc::new(lockstate)];

    for column in 0..PHASOR_COLUMNS {
        let values: Float32Array = rows.iter().map(|r| r.map(|r| r.phasors[column])).collect();
        columns.push(Arc::new(values));
    }
    let satellites: Float32Array = rows.iter().map(|r| r.map(|r| r.satellites)).collect();
    let has_fix: Float32Array = rows.iter().map(|r| r.map(|r| r.has_fix)).collect();
    columns.push(Arc::new(satellites));
    columns.push(Arc::new(has_fix));

    RecordBatch::try_new(schema(), columns)
}

/// A closed window in row form, ready for a `WindowSink`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowExport {
    pub serial_number: String,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub first_frame_path: Option<String>,
    /// `120 x cycle seconds` entries; `None` for sub-samples of missing seconds.
    pub rows: Vec<Option<Row>>,
    pub duplicate_rows: Vec<Row>,
    pub early_rows: Vec<Row>,
}

impl WindowExport {
    pub fn from_window(window: &Window) -> Result<Self, CodecError> {
        let mut rows = Vec::with_capacity(window.slot_rows());
        for slot in &window.slots {
            match slot {
                Some(buffered) => rows.extend(project_buffered(buffered)?.into_iter().map(Some)),
                None => rows.extend(std::iter::repeat(None).take(SAMPLES_PER_RECORD)),
            }
        }

        Ok(WindowExport {
            serial_number: window.serial_number.clone(),
            cycle_start: window.cycle_start,
            cycle_end: window.cycle_end,
            first_frame_path: window.first_frame_path.clone(),
            rows,
            duplicate_rows: project_all(&window.duplicates)?,
            early_rows: project_all(&window.early)?,
        })
    }

    pub fn header(&self) -> &'static [&'static str] {
        &HEADER
    }

    pub fn rows_batch(&self) -> Result<RecordBatch, ArrowError> {
        rows_to_batch(&self.rows)
    }

    pub fn duplicates_batch(&self) -> Result<RecordBatch, ArrowError> {
        rows_to_batch(&wrap(&self.duplicate_rows))
    }

    pub fn early_batch(&self) -> Result<RecordBatch, ArrowError> {
        rows_to_batch(&wrap(&self.early_rows))
    }
}

fn project_buffered(buffered: &BufferedRecord) -> Result<Vec<Row>, CodecError> {
    project_at(&buffered.record, buffered.time)
}

fn project_all(records: &[BufferedRecord]) -> Result<Vec<Row>, CodecError> {
    let mut rows = Vec::with_capacity(records.len() * SAMPLES_PER_RECORD);
    for record in records {
        rows.extend(project_buffered(record)?);
    }
    Ok(rows)
}

fn wrap(rows: &[Row]) -> Vec<Option<Row>> {
    rows.iter().copied().map(Some).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_output::random::{random_sync_output, sine_sync_output};
    use crate::window::aggregator::WindowAggregator;
    use arrow::array::Array;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_project_times_and_values() {
        let record = random_sync_output(&t0());
        let rows = project(&record).unwrap();
        assert_eq!(rows.len(), SAMPLES_PER_RECORD);

        let base = t0().timestamp_nanos_opt().unwrap();
        assert_eq!(rows[0].time, base);
        assert_eq!(rows[1].time, base + 8_333_333);
        let interval = record.sample_interval_nanos();
        assert_eq!(rows[2].time, base + (2.0 * interval).round() as i64);
        assert!(rows.windows(2).all(|w| w[0].time < w[1].time));
        assert!(rows[119].time - base < 1_000_000_000);

        assert_eq!(rows[5].lockstate, record.data.lockstate[5]);
        assert_eq!(rows[7].phasors[0], record.data.channel(Channel::L1)[7].angle);
        assert_eq!(rows[7].phasors[1], record.data.channel(Channel::L1)[7].magnitude);
        assert_eq!(rows[7].phasors[11], record.data.channel(Channel::C3)[7].magnitude);
        assert_eq!(rows[119].satellites, record.gps.satellites);
    }

    #[test]
    fn test_schema_matches_header() {
        let schema = schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, HEADER.to_vec());
    }

    #[test]
    fn test_window_export_rows() {
        let mut agg = WindowAggregator::new("P1", 10).unwrap();
        agg.ingest(sine_sync_output(&t0()), None).unwrap();
        agg.ingest(sine_sync_output(&(t0() + Duration::seconds(1))), None).unwrap();
        let closed = agg
            .ingest(sine_sync_output(&(t0() + Duration::seconds(10))), None)
            .unwrap();
        let window = closed[0].window.as_ref().unwrap();

        let export = WindowExport::from_window(window).unwrap();
        assert_eq!(export.rows.len(), 1200);
        assert_eq!(export.rows.iter().filter(|r| r.is_some()).count(), 240);
        assert!(export.rows[..240].iter().all(|r| r.is_some()));
        assert!(export.duplicate_rows.is_empty());

        let batch = export.rows_batch().unwrap();
        assert_eq!(batch.num_rows(), 1200);
        assert_eq!(batch.num_columns(), HEADER.len());
        assert_eq!(batch.column(0).null_count(), 960);
        assert_eq!(export.duplicates_batch().unwrap().num_rows(), 0);
    }
}

// Benchmarks for the receive path of a single device.
//
// A device sends 120 one-second records per file (757440 bytes). We measure how fast the
// frame decoder reassembles such files from socket-sized chunks, how fast the payload is
// decoded into records, and how long it takes to project a full 15 minute window into rows.
use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use upmu_core::framing::{encode_frame, FrameDecoder};
use upmu_core::projector::WindowExport;
use upmu_core::sync_output::random::{random_payload, random_sync_output};
use upmu_core::sync_output::{decode_all, RECORD_SIZE};
use upmu_core::window::aggregator::WindowAggregator;

fn bench_decode_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_payload");
    let start = Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap();

    for &records in &[1usize, 30, 120] {
        let payload = random_payload(&start, records);
        group.throughput(Throughput::Bytes((records * RECORD_SIZE) as u64));
        group.bench_with_input(BenchmarkId::new("records", records), &payload, |b, payload| {
            b.iter(|| decode_all(black_box(payload)).unwrap());
        });
    }
    group.finish();
}

fn bench_frame_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_reassembly");
    let start = Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap();
    let bytes = encode_frame(
        [1, 0, 0, 0],
        "/home/upmu/data/2016/06/01/12/file.dat",
        "P3001",
        &random_payload(&start, 120),
    );
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    for &chunk in &[1460usize, 16 * 1024, 64 * 1024] {
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &bytes, |b, bytes| {
            b.iter(|| {
                let mut decoder = FrameDecoder::default();
                let mut frames = 0;
                for piece in bytes.chunks(chunk) {
                    frames += decoder.feed(piece).unwrap().len();
                }
                assert_eq!(frames, 1);
            });
        });
    }
    group.finish();
}

fn bench_project_window(c: &mut Criterion) {
    let start = Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap();
    let mut aggregator = WindowAggregator::new("P3001", 900).unwrap();
    let mut closed = Vec::new();
    for s in 0..=900 {
        closed.extend(
            aggregator
                .ingest(random_sync_output(&(start + Duration::seconds(s))), None)
                .unwrap(),
        );
    }
    let window = closed
        .into_iter()
        .find_map(|cycle| cycle.window)
        .unwrap();

    c.bench_function("project_window_900s", |b| {
        b.iter(|| {
            let export = WindowExport::from_window(black_box(&window)).unwrap();
            export.rows_batch().unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_decode_payload,
    bench_frame_reassembly,
    bench_project_window
);
criterion_main!(benches);

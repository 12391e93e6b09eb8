#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    use upmu_core::aliases::AliasTable;
    use upmu_core::export::{CsvSink, MemorySink, MISPLACED_LABEL};
    use upmu_core::framing::{encode_frame, FrameDecoder, FAILURE_ACK};
    use upmu_core::session::{new_pending_states, Session, SessionContext};
    use upmu_core::storage::MemoryStore;
    use upmu_core::sync_output::random::{random_payload, random_sync_output};
    use upmu_core::sync_output::{decode_all, encode_all, RECORD_SIZE};
    use upmu_core::window::aggregator::WindowAggregator;
    use upmu_core::window::anomaly::AnomalyKind;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap()
    }

    fn wire_frame(id: u32, serial: &str, start: i64, seconds: usize) -> Vec<u8> {
        encode_frame(
            id.to_le_bytes(),
            &format!("/home/upmu/data/2016/06/01/file{}.dat", id),
            serial,
            &random_payload(&(t0() + Duration::seconds(start)), seconds),
        )
    }

    #[test]
    fn test_single_frame_decodes_to_records() {
        let payload = random_payload(&t0(), 120);
        assert_eq!(payload.len(), 757_440);
        let bytes = encode_frame([9, 0, 0, 0], "/x/y.dat", "P3001", &payload);

        let mut decoder = FrameDecoder::default();
        let frames = decoder.feed(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].ack_id, [9, 0, 0, 0]);

        let records = decode_all(&frames[0].payload).unwrap();
        assert_eq!(records.len(), 120);
        assert_eq!(records[119].timestamp().unwrap(), t0() + Duration::seconds(119));
    }

    #[test]
    fn test_shuffled_records_produce_same_window() {
        let records: Vec<_> = (0..11)
            .map(|s| random_sync_output(&(t0() + Duration::seconds(s))))
            .collect();
        let mut shuffled = records.clone();
        shuffled.reverse();
        shuffled.swap(2, 7);

        let mut ordered = WindowAggregator::new("P1", 10).unwrap();
        let mut unordered = WindowAggregator::new("P1", 10).unwrap();
        let a = ordered.ingest_frame("/f.dat", records, None);
        let b = unordered.ingest_frame("/f.dat", shuffled, None);

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].window.as_ref().unwrap().slots, b[0].window.as_ref().unwrap().slots);
        assert!(b[0].anomalies.is_empty());
    }

    #[test]
    fn test_every_closed_cycle_has_cycle_length() {
        let mut aggregator = WindowAggregator::new("P1", 7).unwrap();
        let mut closed = Vec::new();
        for s in [0i64, 3, 4, 20, 21, 22, 40] {
            closed.extend(
                aggregator
                    .ingest(random_sync_output(&(t0() + Duration::seconds(s))), None)
                    .unwrap(),
            );
        }
        assert!(!closed.is_empty());
        for pair in closed.windows(2) {
            assert_eq!(pair[0].cycle_end, pair[1].cycle_start);
        }
        for cycle in &closed {
            assert_eq!(cycle.cycle_end - cycle.cycle_start, Duration::seconds(7));
            if let Some(window) = &cycle.window {
                assert_eq!(window.slot_rows(), 7 * 120);
            } else {
                assert_eq!(cycle.anomalies.len(), 1);
                assert_eq!(cycle.anomalies[0].kind, AnomalyKind::Missing);
            }
        }
    }

    #[tokio::test]
    async fn test_stream_through_session_to_csv() {
        let out = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(CsvSink::new(out.path(), 2, Arc::new(AliasTable::new())));
        let ctx = SessionContext::new(store.clone(), new_pending_states()).with_windowing(10, sink);

        let mut bytes = wire_frame(1, "P3001", 0, 8);
        bytes.extend(wire_frame(2, "P3001", 8, 8));
        // The late record belongs to the first cycle, which has closed by then.
        bytes.extend(encode_frame(
            3u32.to_le_bytes(),
            "/home/upmu/data/2016/06/01/file3.dat",
            "P3001",
            &encode_all(&[random_sync_output(&(t0() + Duration::seconds(5)))]),
        ));
        bytes.extend(wire_frame(4, "P3001", 16, 5));

        let mut decoder = FrameDecoder::default();
        let mut session = Session::new(ctx, "127.0.0.1:40000");
        let mut acks = Vec::new();
        for chunk in bytes.chunks(4096) {
            for frame in decoder.feed(chunk).unwrap() {
                acks.push(session.handle_frame(frame).await);
            }
        }
        session.close();

        assert_eq!(
            acks,
            (1u32..=4).map(|i| i.to_le_bytes()).collect::<Vec<_>>()
        );
        assert_eq!(store.frame_count(), 4);

        let dir = out.path().join("P3001").join("06").join("01");
        let first = dir.join("P3001__2016-06-01_12:00:00__2016-06-01_12:00:09.csv");
        let second = dir.join("P3001__2016-06-01_12:00:10__2016-06-01_12:00:19.csv");
        assert!(first.exists());
        let contents = std::fs::read_to_string(second).unwrap();
        assert!(contents.contains(MISPLACED_LABEL));

        let kinds: Vec<AnomalyKind> = store.anomalies().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AnomalyKind::Misplaced]);
        assert_eq!(store.summaries().len(), 2);
        assert!(store.summaries().iter().all(|s| s.written));
    }

    #[tokio::test]
    async fn test_bad_payload_gets_failure_ack() {
        let store = Arc::new(MemoryStore::new());
        let ctx = SessionContext::new(store.clone(), new_pending_states())
            .with_windowing(10, Arc::new(MemorySink::new()));
        let mut session = Session::new(ctx, "peer");

        let mut payload = random_payload(&t0(), 2);
        payload.truncate(RECORD_SIZE * 3 / 2);
        let bytes = encode_frame([5, 0, 0, 0], "/f.dat", "P3001", &payload);

        let mut decoder = FrameDecoder::default();
        let frames = decoder.feed(&bytes).unwrap();
        assert_eq!(session.handle_frame(frames[0].clone()).await, FAILURE_ACK);
        // Kept for forensic recovery.
        assert_eq!(store.frames()[0].frame.payload.len(), payload.len());
    }
}

#[cfg(test)]
mod codec_tests {
    use crate::sync_output::common::{CodecError, RECORD_SIZE, SYNC_DATA_SIZE};
    use crate::sync_output::random::{random_payload, random_sync_output, sine_sync_output};
    use crate::sync_output::record::{
        datetime_to_times, decode_all, decode_one, encode_all, encode_one, times_to_datetime,
        SyncOutput,
    };
    use crate::sync_output::Channel;

    use chrono::{Duration, TimeZone, Utc};

    fn sample_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_round_trip_single_record() {
        let record = random_sync_output(&sample_time());

        let mut bytes = Vec::new();
        encode_one(&record, &mut bytes);
        assert_eq!(bytes.len(), RECORD_SIZE);

        let (decoded, rest) = decode_one(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_one_returns_remainder() {
        let record = sine_sync_output(&sample_time());
        let mut bytes = Vec::new();
        encode_one(&record, &mut bytes);
        bytes.extend_from_slice(&[1, 2, 3]);

        let (decoded, rest) = decode_one(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(rest, &[1, 2, 3]);
    }

    #[test]
    fn test_decode_all_preserves_order() {
        let start = sample_time();
        let records: Vec<SyncOutput> = (0..5)
            .map(|i| random_sync_output(&(start + Duration::seconds(i))))
            .collect();
        let payload = encode_all(&records);

        let decoded = decode_all(&payload).unwrap();
        assert_eq!(decoded.len(), 5);
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_decode_all_empty_payload() {
        assert!(decode_all(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_all_reports_remainder() {
        // Two and a half records.
        let mut payload = random_payload(&sample_time(), 3);
        payload.truncate(RECORD_SIZE * 5 / 2);

        match decode_all(&payload) {
            Err(CodecError::LengthMismatch {
                extra_bytes,
                record_size,
            }) => {
                assert_eq!(extra_bytes, RECORD_SIZE / 2);
                assert_eq!(record_size, RECORD_SIZE);
            }
            other => panic!("expected LengthMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_one_truncated() {
        let bytes = vec![0u8; RECORD_SIZE - 1];
        assert_eq!(
            decode_one(&bytes).unwrap_err(),
            CodecError::Truncated {
                needed: RECORD_SIZE,
                available: RECORD_SIZE - 1
            }
        );
    }

    #[test]
    fn test_field_offsets() {
        let mut record = SyncOutput::zeroed();
        record.data.sample_rate_ms = 8.5;
        record.data.times = [2016, 1, 2, 3, 4, 5];
        record.data.lockstate[119] = 7;
        record.data.channel_mut(Channel::L1)[0].angle = 1.5;
        record.data.channel_mut(Channel::C3)[119].magnitude = -2.25;
        record.pll.state = 0xDEAD_BEEF;
        record.pll.center_freq_offset = -3;
        record.gps.has_fix = 1.0;

        let bytes = encode_all(&[record]);
        let f32_at = |o: usize| f32::from_le_bytes(bytes[o..o + 4].try_into().unwrap());
        let i32_at = |o: usize| i32::from_le_bytes(bytes[o..o + 4].try_into().unwrap());

        assert_eq!(f32_at(0), 8.5);
        assert_eq!(i32_at(4), 2016);
        assert_eq!(i32_at(24), 5);
        assert_eq!(i32_at(28 + 119 * 4), 7);
        assert_eq!(f32_at(508), 1.5);
        // Last magnitude of C3 is the final 4 bytes of the data block.
        assert_eq!(f32_at(SYNC_DATA_SIZE - 4), -2.25);
        assert_eq!(
            u32::from_le_bytes(bytes[SYNC_DATA_SIZE..SYNC_DATA_SIZE + 4].try_into().unwrap()),
            0xDEAD_BEEF
        );
        assert_eq!(i32_at(SYNC_DATA_SIZE + 12), -3);
        assert_eq!(f32_at(RECORD_SIZE - 4), 1.0);
    }

    #[test]
    fn test_timestamp_conversion() {
        let time = sample_time();
        let times = datetime_to_times(&time);
        assert_eq!(times, [2015, 3, 14, 9, 26, 53]);
        assert_eq!(times_to_datetime(&times).unwrap(), time);

        let record = sine_sync_output(&time);
        assert_eq!(record.timestamp().unwrap(), time);
    }

    #[test]
    fn test_invalid_timestamp() {
        for times in [[2015, 13, 1, 0, 0, 0], [2015, 2, 30, 0, 0, 0], [2015, 1, 1, -1, 0, 0]] {
            assert_eq!(
                times_to_datetime(&times).unwrap_err(),
                CodecError::InvalidTimestamp { times }
            );
        }
    }

    #[test]
    fn test_sample_interval() {
        let record = sine_sync_output(&sample_time());
        let expected = 1_000_000_000.0 / 120.0;
        assert!((record.sample_interval_nanos() - expected).abs() < 1.0);
    }
}

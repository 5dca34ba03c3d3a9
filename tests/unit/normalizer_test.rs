//! Unit tests for reading validation.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use ridekeeper::sensors::normalizer::ReadingNormalizer;
use ridekeeper::sensors::types::{MetricKind, Reading, RejectReason};
use ridekeeper::storage::config::{NormalizerSettings, ValueRange};

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 3, 6, 30, 0).unwrap() + Duration::seconds(secs)
}

#[test]
fn test_ranges_come_from_settings() {
    let settings = NormalizerSettings {
        power: ValueRange::new(0.0, 1500.0),
        ..NormalizerSettings::default()
    };
    let mut normalizer = ReadingNormalizer::new(settings);

    assert!(normalizer
        .normalize(Reading::scalar(MetricKind::Power, 1500.0, t(0), "pm"))
        .is_ok());
    let err = normalizer
        .normalize(Reading::scalar(MetricKind::Power, 1500.5, t(1), "pm"))
        .unwrap_err();
    assert_eq!(err.reason, RejectReason::OutOfRange);
    assert_eq!(err.device_id, "pm");
    assert_eq!(err.kind, MetricKind::Power);
}

#[test]
fn test_rejected_reading_does_not_move_cursor() {
    let mut normalizer = ReadingNormalizer::new(NormalizerSettings::default());
    normalizer
        .normalize(Reading::scalar(MetricKind::Power, 200.0, t(0), "pm"))
        .unwrap();
    // Out of range at t=10 must not block a valid reading at t=5
    assert!(normalizer
        .normalize(Reading::scalar(MetricKind::Power, 9000.0, t(10), "pm"))
        .is_err());
    assert!(normalizer
        .normalize(Reading::scalar(MetricKind::Power, 210.0, t(5), "pm"))
        .is_ok());
}

proptest! {
    #[test]
    fn prop_accepted_stream_is_ordered_and_counts_add_up(
        offsets in prop::collection::vec(0i64..120, 1..200),
        watts in prop::collection::vec(-100.0f64..5000.0, 200),
    ) {
        let mut normalizer = ReadingNormalizer::new(NormalizerSettings::default());
        let mut accepted = Vec::new();
        let mut rejected = 0u64;

        for (offset, w) in offsets.iter().zip(watts.iter()) {
            match normalizer.normalize(Reading::scalar(MetricKind::Power, *w, t(*offset), "pm")) {
                Ok(reading) => {
                    prop_assert!((0.0..=4000.0).contains(&reading.scalar_value().unwrap()));
                    accepted.push(reading.captured_at);
                }
                Err(_) => rejected += 1,
            }
        }

        prop_assert!(accepted.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(normalizer.counters().total(), rejected);
    }

    #[test]
    fn prop_nothing_behind_watermark_is_accepted(
        watermark in 0i64..60,
        offsets in prop::collection::vec(0i64..120, 1..100),
    ) {
        let mut normalizer = ReadingNormalizer::new(NormalizerSettings::default());
        normalizer.advance_watermark(t(watermark));
        for (i, offset) in offsets.iter().enumerate() {
            let device = format!("hrm-{}", i);
            let result = normalizer.normalize(Reading::scalar(MetricKind::HeartRate, 140.0, t(*offset), device));
            prop_assert_eq!(result.is_ok(), *offset >= watermark);
        }
    }
}

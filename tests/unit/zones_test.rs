//! Unit tests for zone tables and zone time accounting.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use ridekeeper::metrics::aggregator::RollingAggregator;
use ridekeeper::metrics::capability::{CapabilityKind, CapabilityRecord, CapabilityTimeline};
use ridekeeper::metrics::zones::{zone_count, HeartRateZones, PowerZones, ZoneAccumulator};
use ridekeeper::sensors::types::{MetricKind, Reading};
use ridekeeper::storage::config::{CapabilityDefaults, NormalizerSettings};
use uuid::Uuid;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 8, 10, 0, 0).unwrap() + Duration::seconds(secs)
}

#[test]
fn test_power_zone_upper_bounds_are_inclusive() {
    let zones = PowerZones::from_ftp(250.0);
    assert_eq!(zones.get_zone(137.5), 1);
    assert_eq!(zones.get_zone(137.6), 2);
    assert_eq!(zones.get_zone(187.5), 2);
    assert_eq!(zones.get_zone(225.0), 3);
    assert_eq!(zones.get_zone(262.5), 4);
    assert_eq!(zones.get_zone(300.0), 5);
    assert_eq!(zones.get_zone(375.0), 6);
    assert_eq!(zones.get_zone(375.1), 7);
    assert_eq!(zones.get_zone(2000.0), 7);
}

#[test]
fn test_heart_rate_zones_from_lthr() {
    let zones = HeartRateZones::from_lthr(170.0);
    assert_eq!(zones.len(), 5);
    assert_eq!(zones.get_zone(115.0), 1);
    assert_eq!(zones.get_zone(141.0), 2);
    assert_eq!(zones.get_zone(159.0), 3);
    assert_eq!(zones.get_zone(178.0), 4);
    assert_eq!(zones.get_zone(179.0), 5);

    let threshold = zones.get_zone_range(4).unwrap();
    assert_eq!(threshold.name, "Threshold");
    assert!((threshold.max_value.unwrap() - 178.5).abs() < 1e-9);
}

#[test]
fn test_only_power_and_heart_rate_are_zoned() {
    assert_eq!(zone_count(MetricKind::Power), Some(7));
    assert_eq!(zone_count(MetricKind::HeartRate), Some(5));
    assert_eq!(zone_count(MetricKind::Cadence), None);
    assert_eq!(zone_count(MetricKind::Position), None);
}

proptest! {
    #[test]
    fn prop_zone_seconds_sum_to_credited_seconds(
        ftp in 100.0f64..450.0,
        watts in prop::collection::vec(0.0f64..1500.0, 0..600),
    ) {
        let zones = PowerZones::from_ftp(ftp);
        let mut accumulator = ZoneAccumulator::new(zones.len());
        for w in &watts {
            accumulator.add_second(zones.get_zone(*w));
        }
        prop_assert_eq!(accumulator.total(), watts.len() as u64);
        prop_assert_eq!(accumulator.seconds().len(), 7);
    }

    #[test]
    fn prop_zones_are_monotonic(ftp in 100.0f64..450.0, a in 0.0f64..1500.0, b in 0.0f64..1500.0) {
        let zones = PowerZones::from_ftp(ftp);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(zones.get_zone(low) <= zones.get_zone(high));
    }

    #[test]
    fn prop_zone_time_equals_available_time(
        ftp in 150.0f64..400.0,
        samples in prop::collection::vec(prop::option::weighted(0.7, 0.0f64..1200.0), 1..400),
    ) {
        let record = CapabilityRecord::new(Uuid::nil(), CapabilityKind::ThresholdPower, ftp, t(-3600));
        let mut aggregator = RollingAggregator::new(
            NormalizerSettings::default(),
            CapabilityDefaults::default(),
            CapabilityTimeline::new(vec![record]),
            false,
        );

        // Gaps longer than the sensor timeout make power unavailable
        for (s, sample) in samples.iter().enumerate() {
            let at = t(s as i64);
            if let Some(watts) = sample {
                aggregator.ingest(&Reading::scalar(MetricKind::Power, *watts, at, "pm"));
            }
            aggregator.tick(at);
        }

        let power = aggregator.metric(MetricKind::Power).unwrap();
        let zones = power.zones.as_ref().unwrap();
        prop_assert_eq!(zones.total(), power.available_secs);
        prop_assert!(power.available_secs <= samples.len() as u64);
    }
}

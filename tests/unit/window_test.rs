//! Unit tests for rolling windows.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use ridekeeper::metrics::window::{from_milli, to_milli, MetricWindow};

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
}

#[test]
fn test_window_boundary_is_exclusive_at_start() {
    let mut window = MetricWindow::new(3);
    window.push(t(0), 100.0);
    window.push(t(1), 200.0);
    window.push(t(2), 300.0);
    assert_eq!(window.average(t(2)), Some(200.0));

    // At t=3 the window is (0, 3]: the sample at 0 drops out
    assert_eq!(window.average(t(3)), Some(250.0));
    assert_eq!(window.count(t(5)), 0);
    assert_eq!(window.average(t(5)), None);
}

#[test]
fn test_milli_conversion() {
    assert_eq!(to_milli(201.25), 201_250);
    assert_eq!(from_milli(201_250), 201.25);
    assert_eq!(to_milli(-0.0004), 0);
}

proptest! {
    #[test]
    fn prop_average_matches_samples_in_window(
        span in 1u32..60,
        steps in prop::collection::vec((0i64..5, 0.0f64..2000.0), 1..200),
    ) {
        let mut window = MetricWindow::new(span);
        let mut samples = Vec::new();
        let mut now = 0i64;
        for (gap, value) in steps {
            now += gap;
            window.push(t(now), value);
            samples.push((now, value));
        }

        let cutoff = now - i64::from(span);
        let present: Vec<f64> = samples
            .iter()
            .filter(|(at, _)| *at > cutoff)
            .map(|(_, v)| *v)
            .collect();
        let sum: f64 = present.iter().sum();

        prop_assert_eq!(window.count(t(now)), present.len());
        prop_assert_eq!(
            window.sum_milli(t(now)),
            present.iter().map(|v| to_milli(*v)).sum::<i64>()
        );
        prop_assert!((window.sum(t(now)) - sum).abs() < 1e-6);
        let average = window.average(t(now)).unwrap();
        prop_assert!((average - sum / present.len() as f64).abs() < 1e-9);
    }

    #[test]
    fn prop_window_empties_after_span(
        span in 1u32..30,
        values in prop::collection::vec(0.0f64..500.0, 1..50),
    ) {
        let mut window = MetricWindow::new(span);
        for (i, value) in values.iter().enumerate() {
            window.push(t(i as i64), *value);
        }
        let last = values.len() as i64 - 1;
        prop_assert_eq!(window.average(t(last + i64::from(span))), None);
        prop_assert_eq!(window.sum_milli(t(last + i64::from(span))), 0);
        prop_assert_eq!(window.sum(t(last + i64::from(span))), 0.0);
    }
}

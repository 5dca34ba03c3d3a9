//! Integration tests for session recording.
//!
//! Drives the recorder with readings and ticks and checks live metrics,
//! zone accounting and pause handling.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ridekeeper::metrics::capability::{CapabilityKind, CapabilityRecord, CapabilityTimeline};
use ridekeeper::recording::recorder::{RecorderConfig, RecorderEffect, RecorderEvent, SessionRecorder};
use ridekeeper::recording::types::{
    Environment, RecorderError, ScoreBasis, Session, SessionCategory, SessionNotice, SessionStatus,
};
use ridekeeper::sensors::types::{GeoPoint, MetricKind, Reading};
use uuid::Uuid;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 14, 7, 30, 0).unwrap() + Duration::seconds(secs)
}

fn recorder_with_ftp(ftp: f64, environment: Environment) -> SessionRecorder {
    let profile = Uuid::new_v4();
    let capabilities = CapabilityTimeline::new(vec![CapabilityRecord::new(
        profile,
        CapabilityKind::ThresholdPower,
        ftp,
        at(-3600),
    )]);
    let session = Session::new(profile, SessionCategory::Ride, environment);
    SessionRecorder::new(session, capabilities, RecorderConfig::default())
}

fn power(secs: i64, watts: f64) -> RecorderEvent {
    RecorderEvent::Reading(Reading::scalar(MetricKind::Power, watts, at(secs), "power-meter"))
}

#[test]
fn test_four_second_power_scenario() {
    let mut recorder = recorder_with_ftp(250.0, Environment::Indoor);
    recorder.handle(RecorderEvent::Start { at: at(0) }).unwrap();

    for (s, watts) in [(0, 200.0), (1, 210.0), (2, 190.0), (3, 205.0)] {
        recorder.handle(power(s, watts)).unwrap();
    }
    recorder.handle(RecorderEvent::Tick { now: at(4) }).unwrap();

    let snapshot = recorder.latest_metrics().unwrap();
    let power = snapshot.metric(MetricKind::Power).unwrap();
    assert_eq!(power.average, Some(201.25));
    assert_eq!(power.max, Some(210.0));
    assert!(power.available);

    // 187.5 W to 225 W is the tempo band at 250 W
    assert_eq!(power.zone, Some(3));
    assert_eq!(power.zone_seconds, Some(vec![0, 0, 4, 0, 0, 0, 0]));

    let np = snapshot.normalized_power.unwrap();
    let intensity = snapshot.intensity_factor.unwrap();
    assert!((intensity - np / 250.0).abs() < 1e-12);
    assert_eq!(snapshot.threshold_power, Some(250.0));
}

#[test]
fn test_sensor_timeout_is_per_metric() {
    let mut recorder = recorder_with_ftp(250.0, Environment::Indoor);
    recorder.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    recorder.handle(power(0, 200.0)).unwrap();

    let mut notices = Vec::new();
    for s in 0..12 {
        let hr = Reading::scalar(MetricKind::HeartRate, 140.0, at(s), "strap");
        for effect in recorder.handle(RecorderEvent::Reading(hr)).unwrap() {
            if let RecorderEffect::Notice(notice) = effect {
                notices.push(notice);
            }
        }
    }

    assert!(notices.contains(&SessionNotice::SensorTimeout(MetricKind::Power)));
    assert!(!notices.contains(&SessionNotice::SensorTimeout(MetricKind::HeartRate)));

    let snapshot = recorder.latest_metrics().unwrap();
    assert!(!snapshot.metric(MetricKind::Power).unwrap().available);
    assert!(snapshot.metric(MetricKind::HeartRate).unwrap().available);
    // Seconds 1 through 5 are within the 5 s timeout
    assert_eq!(snapshot.metric(MetricKind::Power).unwrap().available_secs, 5);
}

#[test]
fn test_pause_resume_accounting() {
    let mut recorder = recorder_with_ftp(250.0, Environment::Indoor);
    recorder.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    for s in 0..30 {
        recorder.handle(power(s, 220.0)).unwrap();
    }
    recorder.handle(RecorderEvent::Pause { at: at(30) }).unwrap();
    for s in 31..90 {
        recorder.handle(power(s, 400.0)).unwrap();
    }
    recorder.handle(RecorderEvent::Resume { at: at(90) }).unwrap();
    for s in 90..120 {
        recorder.handle(power(s, 220.0)).unwrap();
    }

    let effects = recorder.handle(RecorderEvent::Finish { at: at(120) }).unwrap();
    let summary = effects
        .into_iter()
        .find_map(|e| match e {
            RecorderEffect::Completed(summary) => Some(summary),
            _ => None,
        })
        .unwrap();

    assert_eq!(summary.elapsed_secs, 120);
    assert_eq!(summary.moving_secs, 60);
    assert_eq!(summary.max_power, Some(220.0));
    assert_eq!(recorder.normalizer().counters().dropped_while_paused, 59);
    assert_eq!(recorder.status(), SessionStatus::Finished);
}

#[test]
fn test_summary_is_scored_at_session_start() {
    let mut recorder = recorder_with_ftp(250.0, Environment::Indoor);
    recorder.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    for s in 0..600 {
        recorder.handle(power(s, 250.0)).unwrap();
    }
    let effects = recorder.handle(RecorderEvent::Finish { at: at(600) }).unwrap();
    let summary = effects
        .into_iter()
        .find_map(|e| match e {
            RecorderEffect::Completed(summary) => Some(summary),
            _ => None,
        })
        .unwrap();

    assert_eq!(summary.score_basis, Some(ScoreBasis::Power));
    assert_eq!(summary.scored_with, Some(250.0));
    assert_eq!(summary.avg_power, Some(250.0));
    // Steady 250 W for 10 minutes at 250 W threshold
    let score = summary.stress_score.unwrap();
    assert!((score - 100.0 / 6.0).abs() < 0.5);
}

#[test]
fn test_position_jump_is_discarded() {
    let mut recorder = recorder_with_ftp(250.0, Environment::Outdoor);
    recorder.handle(RecorderEvent::Start { at: at(0) }).unwrap();

    let start = GeoPoint::new(47.3769, 8.5417);
    let near = GeoPoint::new(47.3770, 8.5417);
    let far = GeoPoint::new(47.5, 8.5417);

    recorder
        .handle(RecorderEvent::Reading(Reading::position(start, at(0), "gps")))
        .unwrap();
    let effects = recorder
        .handle(RecorderEvent::Reading(Reading::position(far, at(1), "gps")))
        .unwrap();
    assert!(effects.iter().any(|e| matches!(
        e,
        RecorderEffect::Notice(SessionNotice::PositionDiscontinuity { .. })
    )));
    assert_eq!(recorder.aggregator().distance_m(), 0.0);

    recorder
        .handle(RecorderEvent::Reading(Reading::position(near, at(2), "gps")))
        .unwrap();
    let distance = recorder.aggregator().distance_m();
    assert!(distance > 10.0 && distance < 12.0);
}

#[test]
fn test_finished_session_is_immutable() {
    let mut recorder = recorder_with_ftp(250.0, Environment::Indoor);
    recorder.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    recorder.handle(RecorderEvent::Finish { at: at(10) }).unwrap();

    for event in [
        power(11, 200.0),
        RecorderEvent::Pause { at: at(12) },
        RecorderEvent::Resume { at: at(13) },
        RecorderEvent::Start { at: at(14) },
        RecorderEvent::Discard { at: at(15) },
    ] {
        assert_eq!(recorder.handle(event), Err(RecorderError::SessionClosed));
    }
}

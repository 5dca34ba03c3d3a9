//! Integration tests for training load over recorded sessions.

use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ridekeeper::metrics::analytics::{ProgressionTrend, TrainingLoadEngine};
use ridekeeper::metrics::capability::{CapabilityKind, CapabilityRecord, CapabilityTimeline};
use ridekeeper::recording::recorder::{RecorderConfig, RecorderEffect, RecorderEvent, SessionRecorder};
use ridekeeper::recording::types::{
    Environment, ScoreBasis, Session, SessionCategory, SessionSummary,
};
use ridekeeper::sensors::types::{MetricKind, Reading};
use ridekeeper::storage::config::{CapabilityDefaults, TrainingLoadSettings};
use ridekeeper::storage::{Database, SessionStore};
use uuid::Uuid;

fn day(d: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, hour, 0, 0).unwrap()
}

/// Record one hour of steady power and return the finished summary.
fn ride(profile: Uuid, start: DateTime<Utc>, watts: f64) -> SessionSummary {
    let session = Session::new(profile, SessionCategory::Ride, Environment::Indoor);
    let mut recorder =
        SessionRecorder::new(session, CapabilityTimeline::default(), RecorderConfig::default());
    recorder.handle(RecorderEvent::Start { at: start }).unwrap();
    for s in 0..3600 {
        let reading = Reading::scalar(MetricKind::Power, watts, start + Duration::seconds(s), "pm");
        recorder.handle(RecorderEvent::Reading(reading)).unwrap();
    }
    recorder
        .handle(RecorderEvent::Finish {
            at: start + Duration::seconds(3600),
        })
        .unwrap()
        .into_iter()
        .find_map(|e| match e {
            RecorderEffect::Completed(summary) => Some(*summary),
            _ => None,
        })
        .unwrap()
}

fn engine(db: &Database) -> TrainingLoadEngine<'_, Database> {
    TrainingLoadEngine::new(db, TrainingLoadSettings::default(), CapabilityDefaults::default())
}

fn stored_score(db: &Database, id: &Uuid) -> f64 {
    db.session_record(id).unwrap().unwrap().stress_score.unwrap()
}

#[test]
fn test_recorded_sessions_scored_with_default_threshold() {
    let db = Database::open_in_memory().unwrap();
    let engine = engine(&db);
    let profile = Uuid::new_v4();

    let mut summary = ride(profile, day(1, 8), 200.0);
    assert_eq!(summary.moving_secs, 3600);
    engine.complete_session(&mut summary).unwrap();

    // No threshold on record: the 200 W default applies, one hour at IF 1.0
    assert_eq!(summary.score_basis, Some(ScoreBasis::Power));
    assert_eq!(summary.scored_with, Some(200.0));
    assert!((summary.stress_score.unwrap() - 100.0).abs() < 0.01);
    assert!((stored_score(&db, &summary.session_id) - 100.0).abs() < 0.01);
}

#[test]
fn test_backdated_threshold_rescores_later_sessions_only() {
    let db = Database::open_in_memory().unwrap();
    let engine = engine(&db);
    let profile = Uuid::new_v4();

    let mut ids = Vec::new();
    for d in [1, 5, 10] {
        let mut summary = ride(profile, day(d, 8), 200.0);
        engine.complete_session(&mut summary).unwrap();
        ids.push(summary.session_id);
    }
    let before = engine.training_load(&profile, day(10, 20)).unwrap();
    assert!(before.ctl > 0.0);

    let record = CapabilityRecord::new(profile, CapabilityKind::ThresholdPower, 250.0, day(4, 0));
    let report = engine
        .insert_capability_record(&record, &AtomicBool::new(false))
        .unwrap();
    assert!(report.completed);
    assert_eq!(report.rescored, vec![ids[1], ids[2]]);

    // 200 W against 250 W is IF 0.8
    assert!((stored_score(&db, &ids[0]) - 100.0).abs() < 0.01);
    assert!((stored_score(&db, &ids[1]) - 64.0).abs() < 0.01);
    assert!((stored_score(&db, &ids[2]) - 64.0).abs() < 0.01);

    let after = engine.training_load(&profile, day(10, 20)).unwrap();
    assert!(after.ctl < before.ctl);
    assert!(after.atl < before.atl);
}

#[test]
fn test_older_record_governs_until_next_one() {
    let db = Database::open_in_memory().unwrap();
    let engine = engine(&db);
    let profile = Uuid::new_v4();

    let mut ids = Vec::new();
    for d in [1, 10] {
        let mut summary = ride(profile, day(d, 8), 200.0);
        engine.complete_session(&mut summary).unwrap();
        ids.push(summary.session_id);
    }

    let cancel = AtomicBool::new(false);
    let newer = CapabilityRecord::new(profile, CapabilityKind::ThresholdPower, 250.0, day(4, 0));
    engine.insert_capability_record(&newer, &cancel).unwrap();

    let older = CapabilityRecord::new(
        profile,
        CapabilityKind::ThresholdPower,
        240.0,
        day(1, 0) - Duration::days(30),
    );
    let report = engine.insert_capability_record(&older, &cancel).unwrap();
    assert_eq!(report.rescored, vec![ids[0]]);
    assert!((stored_score(&db, &ids[0]) - 100.0 * (200.0f64 / 240.0).powi(2)).abs() < 0.01);
    assert!((stored_score(&db, &ids[1]) - 64.0).abs() < 0.01);

    let progression = engine
        .progression(&profile, CapabilityKind::ThresholdPower, 7, day(10, 20))
        .unwrap();
    assert_eq!(progression.current, Some(250.0));
    assert_eq!(progression.baseline, Some(240.0));
    assert_eq!(progression.trend, ProgressionTrend::Increasing);
}

#[test]
fn test_no_sessions_means_zero_load() {
    let db = Database::open_in_memory().unwrap();
    let load = engine(&db)
        .training_load(&Uuid::new_v4(), day(10, 12))
        .unwrap();
    assert_eq!(load.ctl, 0.0);
    assert_eq!(load.atl, 0.0);
    assert_eq!(load.tsb, 0.0);
}

//! Integration tests for checkpoints and crash recovery.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ridekeeper::metrics::capability::{CapabilityKind, CapabilityRecord, CapabilityTimeline};
use ridekeeper::recording::checkpoint::{checkpoint, recover, recover_session, CheckpointError};
use ridekeeper::recording::recorder::{
    CheckpointReason, RecorderConfig, RecorderEffect, RecorderEvent, SessionRecorder,
};
use ridekeeper::recording::types::{Environment, Session, SessionCategory};
use ridekeeper::sensors::types::{GeoPoint, MetricKind, Reading};
use ridekeeper::storage::{CheckpointStore, Database, TailEntry, TailJournal};
use ridekeeper::workouts::types::{
    DurationSpec, IntensityTarget, PlanBlock, PlanStep, TargetValue, WorkoutPlan,
};
use tempfile::tempdir;
use uuid::Uuid;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 2, 18, 0, 0).unwrap() + Duration::seconds(secs)
}

fn new_recorder() -> SessionRecorder {
    let profile = Uuid::new_v4();
    let capabilities = CapabilityTimeline::new(vec![CapabilityRecord::new(
        profile,
        CapabilityKind::ThresholdPower,
        260.0,
        at(-86_400),
    )]);
    let session = Session::new(profile, SessionCategory::Ride, Environment::Outdoor);
    SessionRecorder::new(session, capabilities, RecorderConfig::default())
}

fn interval_plan() -> WorkoutPlan {
    let on = PlanStep::new("on", DurationSpec::Time { seconds: 20 })
        .with_target(IntensityTarget::power(TargetValue::percent(110.0)));
    let off = PlanStep::new("off", DurationSpec::Time { seconds: 10 })
        .with_target(IntensityTarget::power(TargetValue::percent(50.0)));
    WorkoutPlan::flatten(
        "intervals",
        &[PlanBlock::Repeat {
            count: 5,
            blocks: vec![PlanBlock::Step(on), PlanBlock::Step(off)],
        }],
    )
    .unwrap()
}

/// Readings for second `s`: power, heart rate, cadence and a position fix.
fn readings_at(s: i64) -> Vec<Reading> {
    let watts = 180.0 + ((s * 37) % 120) as f64;
    vec![
        Reading::scalar(MetricKind::Power, watts, at(s), "crank"),
        Reading::scalar(MetricKind::HeartRate, 120.0 + (s % 40) as f64, at(s), "strap"),
        Reading::scalar(MetricKind::Cadence, 85.0 + (s % 7) as f64, at(s), "crank"),
        Reading::position(
            GeoPoint::with_altitude(46.0 + s as f64 * 0.00008, 7.0, 500.0 + (s % 11) as f64),
            at(s),
            "gps",
        ),
    ]
}

fn feed(recorder: &mut SessionRecorder, seconds: std::ops::RangeInclusive<i64>) -> Vec<TailEntry> {
    let mut journal = Vec::new();
    for s in seconds {
        for reading in readings_at(s) {
            for effect in recorder.handle(RecorderEvent::Reading(reading)).unwrap() {
                if let RecorderEffect::Journal(entry) = effect {
                    journal.push(entry);
                }
            }
        }
    }
    journal
}

#[test]
fn test_checkpoint_at_60_recovers_state_at_105() {
    let mut live = new_recorder();
    live.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    live.handle(RecorderEvent::AttachPlan {
        plan: interval_plan(),
        at: at(0),
    })
    .unwrap();

    feed(&mut live, 0..=60);
    let cp = checkpoint(&live, 7, CheckpointReason::Interval, at(60)).unwrap();
    let tail = feed(&mut live, 61..=105);
    assert_eq!(tail.len(), 45 * 4);

    // Crash at 105 s: rebuild from the checkpoint and the journal
    let recovered = recover(&cp, &tail, RecorderConfig::default());
    assert_eq!(recovered.state(), live.state());
    assert_eq!(recovered.clock_time(), Some(at(105)));
    assert_eq!(
        recovered.plan().map(|p| p.current_index()),
        live.plan().map(|p| p.current_index())
    );
}

/// Apply `event` and collect what it journals.
fn apply(recorder: &mut SessionRecorder, event: RecorderEvent, journal: &mut Vec<TailEntry>) {
    for effect in recorder.handle(event).unwrap() {
        if let RecorderEffect::Journal(entry) = effect {
            journal.push(entry);
        }
    }
}

#[test]
fn test_rejected_reading_in_tail_recovers_counters() {
    let mut live = new_recorder();
    live.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    feed(&mut live, 0..=60);
    let cp = checkpoint(&live, 3, CheckpointReason::Interval, at(60)).unwrap();

    let mut tail = feed(&mut live, 61..=70);
    let implausible = Reading::scalar(MetricKind::HeartRate, 400.0, at(70), "strap");
    apply(&mut live, RecorderEvent::Reading(implausible), &mut tail);
    tail.extend(feed(&mut live, 71..=105));

    let rejected = live.normalizer().counters().total();
    assert!(rejected >= 1);
    let recovered = recover(&cp, &tail, RecorderConfig::default());
    assert_eq!(recovered.normalizer().counters().total(), rejected);
    assert_eq!(recovered.state(), live.state());
}

#[test]
fn test_pause_and_resume_inside_tail() {
    let mut live = new_recorder();
    live.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    live.handle(RecorderEvent::AttachPlan {
        plan: interval_plan(),
        at: at(0),
    })
    .unwrap();
    feed(&mut live, 0..=60);
    let cp = checkpoint(&live, 4, CheckpointReason::Interval, at(60)).unwrap();

    // The checkpoints requested by these transitions never reach storage
    let mut tail = feed(&mut live, 61..=70);
    apply(&mut live, RecorderEvent::Pause { at: at(70) }, &mut tail);
    tail.extend(feed(&mut live, 71..=79));
    apply(&mut live, RecorderEvent::Resume { at: at(80) }, &mut tail);
    tail.extend(feed(&mut live, 80..=90));
    apply(&mut live, RecorderEvent::DetachPlan { at: at(90) }, &mut tail);
    tail.extend(feed(&mut live, 91..=105));

    assert_eq!(live.normalizer().counters().dropped_while_paused, 9 * 4);
    assert_eq!(live.session().moving_secs, 95);

    let recovered = recover(&cp, &tail, RecorderConfig::default());
    assert_eq!(recovered.state(), live.state());
    assert!(recovered.plan().is_none());
}

#[test]
fn test_ticks_after_last_reading_are_recovered() {
    let mut live = new_recorder();
    live.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    feed(&mut live, 0..=30);
    let cp = checkpoint(&live, 2, CheckpointReason::Interval, at(30)).unwrap();

    // Sensors go quiet at 40 s while the clock keeps running
    let mut tail = feed(&mut live, 31..=40);
    for s in 41..=70 {
        apply(&mut live, RecorderEvent::Tick { now: at(s) }, &mut tail);
    }
    assert_eq!(tail.len(), 10 * 4 + 30);
    assert_eq!(live.session().moving_secs, 70);

    let recovered = recover(&cp, &tail, RecorderConfig::default());
    assert_eq!(recovered.session().moving_secs, 70);
    assert_eq!(recovered.clock_time(), Some(at(70)));
    assert_eq!(recovered.state(), live.state());
}

#[test]
fn test_replay_is_deterministic() {
    let mut live = new_recorder();
    live.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    feed(&mut live, 0..=30);
    let cp = checkpoint(&live, 1, CheckpointReason::Interval, at(30)).unwrap();
    let tail = feed(&mut live, 31..=50);

    let first = recover(&cp, &tail, RecorderConfig::default());
    let second = recover(&cp, &tail, RecorderConfig::default());
    assert_eq!(first.state(), second.state());
}

#[test]
fn test_recover_from_disk_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.db");

    let mut live = new_recorder();
    let id = live.session().id;
    {
        let db = Database::open(&path).unwrap();
        live.handle(RecorderEvent::Start { at: at(0) }).unwrap();
        let journal = feed(&mut live, 0..=60);
        db.append_tail(&id, &journal).unwrap();
        let cp = checkpoint(&live, 1, CheckpointReason::Interval, at(60)).unwrap();
        db.persist_checkpoint(&cp.to_stored().unwrap()).unwrap();

        let journal = feed(&mut live, 61..=105);
        db.append_tail(&id, &journal).unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.checkpointed_sessions().unwrap(), vec![id]);
    let (recovered, sequence) = recover_session(&db, &id, RecorderConfig::default()).unwrap();
    assert_eq!(sequence, 1);
    assert_eq!(recovered.state(), live.state());
}

#[test]
fn test_corrupt_newest_checkpoint_falls_back_to_older() {
    let db = Database::open_in_memory().unwrap();
    let mut live = new_recorder();
    let id = live.session().id;
    live.handle(RecorderEvent::Start { at: at(0) }).unwrap();

    let journal = feed(&mut live, 0..=20);
    db.append_tail(&id, &journal).unwrap();
    let older = checkpoint(&live, 1, CheckpointReason::Interval, at(20)).unwrap();
    db.persist_checkpoint(&older.to_stored().unwrap()).unwrap();

    let journal = feed(&mut live, 21..=40);
    db.append_tail(&id, &journal).unwrap();
    let mut newer = checkpoint(&live, 2, CheckpointReason::Interval, at(40))
        .unwrap()
        .to_stored()
        .unwrap();
    newer.payload = newer.payload.replace("\"moving_secs\":40", "\"moving_secs\":41");
    db.persist_checkpoint(&newer).unwrap();

    let journal = feed(&mut live, 41..=55);
    db.append_tail(&id, &journal).unwrap();

    // The older checkpoint needs a longer replay but reaches the same state
    let (recovered, sequence) = recover_session(&db, &id, RecorderConfig::default()).unwrap();
    assert_eq!(sequence, 1);
    assert_eq!(recovered.state(), live.state());
}

#[test]
fn test_session_lost_when_nothing_decodes() {
    let db = Database::open_in_memory().unwrap();
    let live = new_recorder();
    let id = live.session().id;

    let mut stored = checkpoint(&live, 1, CheckpointReason::Started, at(0))
        .unwrap()
        .to_stored()
        .unwrap();
    stored.payload = "{\"format\":\"something-else\"}".to_string();
    db.persist_checkpoint(&stored).unwrap();

    match recover_session(&db, &id, RecorderConfig::default()) {
        Err(CheckpointError::SessionLost(lost)) => assert_eq!(lost, id),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("a session was fabricated"),
    }
}

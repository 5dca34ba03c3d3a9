//! Integration tests for the session runtime.
//!
//! Runs sessions on their own task against an in-memory database and a
//! loopback trainer, with the clock advanced only by readings.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ridekeeper::recording::{
    Environment, ManualClock, Session, SessionCategory, SessionHandle, SessionNotice,
    SessionRuntime, SessionStatus,
};
use ridekeeper::sensors::types::{MetricKind, Reading};
use ridekeeper::storage::config::AppConfig;
use ridekeeper::storage::{CheckpointStore, Database, SessionStore};
use ridekeeper::trainer::{CommandResponse, ControlCommand, LoopbackChannel, MachineClass};
use uuid::Uuid;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 12, 9, 0, 0).unwrap() + Duration::seconds(secs)
}

fn runtime_with(
    channel: LoopbackChannel,
) -> (SessionRuntime<LoopbackChannel>, Arc<Mutex<Database>>, Arc<LoopbackChannel>) {
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    let channel = Arc::new(channel);
    let runtime = SessionRuntime::new(AppConfig::default(), Arc::clone(&db), Arc::clone(&channel))
        .with_clock(ManualClock::new(at(0)))
        .with_tick_interval(None);
    (runtime, db, channel)
}

fn new_session() -> Session {
    Session::new(Uuid::new_v4(), SessionCategory::Ride, Environment::Indoor)
}

async fn submit_power(handle: &SessionHandle, seconds: std::ops::Range<i64>, watts: f64) {
    let submitter = handle.submitter();
    for s in seconds {
        submitter
            .submit(Reading::scalar(MetricKind::Power, watts, at(s), "pm"))
            .await
            .unwrap();
    }
}

/// Poll the notice channel until `wanted` shows up.
async fn wait_for_notice(
    notices: &crossbeam::channel::Receiver<SessionNotice>,
    wanted: impl Fn(&SessionNotice) -> bool,
) -> bool {
    for _ in 0..200 {
        if notices.try_iter().any(|n| wanted(&n)) {
            return true;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_pause_and_resume_through_handle() {
    let (runtime, db, _channel) = runtime_with(LoopbackChannel::new());
    let session = new_session();
    let id = session.id;
    let handle = runtime.spawn(session).await.unwrap();

    handle.start_at(at(0)).await.unwrap();
    submit_power(&handle, 0..20, 210.0).await;
    handle.pause_at(at(20)).await.unwrap();
    submit_power(&handle, 21..40, 500.0).await;
    handle.resume_at(at(40)).await.unwrap();
    submit_power(&handle, 40..60, 210.0).await;

    let summary = handle.finish_at(at(60)).await.unwrap();
    assert_eq!(summary.elapsed_secs, 60);
    assert_eq!(summary.moving_secs, 40);
    assert_eq!(summary.max_power, Some(210.0));

    let db = db.lock().unwrap();
    let stored = db.session_record(&id).unwrap().unwrap();
    assert_eq!(stored.moving_secs, 40);
    assert!(db.load_checkpoints(&id).unwrap().is_empty());
}

#[tokio::test]
async fn test_suspended_session_recovers_paused() {
    let (runtime, _db, _channel) = runtime_with(LoopbackChannel::new());
    let session = new_session();
    let id = session.id;
    let handle = runtime.spawn(session).await.unwrap();

    handle.start_at(at(0)).await.unwrap();
    submit_power(&handle, 0..45, 230.0).await;
    handle.suspend().await.unwrap();

    assert_eq!(runtime.unfinished_sessions().await.unwrap(), vec![id]);

    let handle = runtime.recover(id).await.unwrap();
    assert_eq!(handle.session_id(), id);
    let notices = handle.notices();
    assert!(
        wait_for_notice(&notices, |n| *n
            == SessionNotice::StatusChanged(SessionStatus::Paused))
        .await
    );

    // The last journaled reading was at 44 s; the gap until resume is paused
    handle.resume_at(at(100)).await.unwrap();
    submit_power(&handle, 100..110, 230.0).await;
    let summary = handle.finish_at(at(110)).await.unwrap();
    assert_eq!(summary.elapsed_secs, 110);
    assert_eq!(summary.moving_secs, 54);

    assert!(runtime.unfinished_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refused_trainer_command_is_reported() {
    let (runtime, _db, channel) =
        runtime_with(LoopbackChannel::scripted([CommandResponse::Nack("busy".to_string())]));
    let handle = runtime.spawn(new_session()).await.unwrap();
    let notices = handle.notices();

    handle.trainer_connected(MachineClass::Ftms).await.unwrap();
    handle.start_at(at(0)).await.unwrap();
    assert!(wait_for_notice(&notices, |n| matches!(n, SessionNotice::TrainerFault(_))).await);

    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].command, ControlCommand::StartSession);

    // Recording is unaffected by the trainer fault
    submit_power(&handle, 0..5, 180.0).await;
    let summary = handle.finish_at(at(5)).await.unwrap();
    assert_eq!(summary.moving_secs, 5);
}

#[tokio::test]
async fn test_discard_leaves_no_trace() {
    let (runtime, db, _channel) = runtime_with(LoopbackChannel::new());
    let session = new_session();
    let id = session.id;
    let handle = runtime.spawn(session).await.unwrap();

    handle.start_at(at(0)).await.unwrap();
    submit_power(&handle, 0..40, 250.0).await;
    handle.discard_at(at(40)).await.unwrap();

    let db = db.lock().unwrap();
    assert!(db.session_record(&id).unwrap().is_none());
    assert!(db.load_checkpoints(&id).unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_command_completes_after_finish() {
    let channel = LoopbackChannel::scripted([
        CommandResponse::Ack,
        CommandResponse::Nack("stopped already".to_string()),
    ])
    .with_delay(StdDuration::from_millis(50));
    let (runtime, _db, channel) = runtime_with(channel);
    let handle = runtime.spawn(new_session()).await.unwrap();
    let notices = handle.notices();

    handle.trainer_connected(MachineClass::Ftms).await.unwrap();
    handle.start_at(at(0)).await.unwrap();
    submit_power(&handle, 0..5, 180.0).await;
    handle.finish_at(at(5)).await.unwrap();

    // The stop command is answered after the session closed and still counts
    assert!(wait_for_notice(&notices, |n| matches!(n, SessionNotice::TrainerFault(_))).await);
    let sent: Vec<ControlCommand> = channel.sent().into_iter().map(|c| c.command).collect();
    assert_eq!(sent, vec![ControlCommand::StartSession, ControlCommand::StopSession]);
}

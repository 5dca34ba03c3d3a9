//! Integration tests for plan execution driving the trainer.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ridekeeper::metrics::capability::{CapabilityKind, CapabilityRecord, CapabilityTimeline};
use ridekeeper::recording::checkpoint::CheckpointManager;
use ridekeeper::recording::coordinator::{Outbox, SessionCoordinator};
use ridekeeper::recording::recorder::{RecorderConfig, RecorderEvent, SessionRecorder};
use ridekeeper::recording::types::{Environment, Session, SessionCategory, SessionNotice};
use ridekeeper::storage::config::TrainerSettings;
use ridekeeper::trainer::{
    CommandResponse, ControlCommand, ControlMode, MachineClass, TrainerControlEngine, TrainerState,
};
use ridekeeper::workouts::engine::PlanEvent;
use ridekeeper::workouts::types::{
    DurationSpec, IntensityTarget, PlanBlock, PlanStep, TargetValue, WorkoutPlan,
};
use uuid::Uuid;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 20, 17, 0, 0).unwrap() + Duration::seconds(secs)
}

fn coordinator(ftp: f64) -> SessionCoordinator {
    let profile = Uuid::new_v4();
    let capabilities = CapabilityTimeline::new(vec![CapabilityRecord::new(
        profile,
        CapabilityKind::ThresholdPower,
        ftp,
        at(-86_400),
    )]);
    let session = Session::new(profile, SessionCategory::Ride, Environment::Indoor);
    let recorder = SessionRecorder::new(session, capabilities, RecorderConfig::default());
    let trainer = TrainerControlEngine::new(TrainerSettings::default(), 72.0);
    SessionCoordinator::new(recorder, trainer, CheckpointManager::new(1, 3, 3))
}

fn tempo_plan() -> WorkoutPlan {
    let tempo = PlanStep::new("tempo", DurationSpec::Time { seconds: 300 })
        .with_target(IntensityTarget::power(TargetValue::percent(75.0)));
    let easy = PlanStep::new("easy", DurationSpec::Time { seconds: 120 })
        .with_target(IntensityTarget::power(TargetValue::percent(50.0)));
    WorkoutPlan::flatten("tempo", &[PlanBlock::Step(tempo), PlanBlock::Step(easy)]).unwrap()
}

fn power_targets(outbox: &Outbox) -> Vec<f64> {
    outbox
        .commands
        .iter()
        .filter_map(|c| match c.command {
            ControlCommand::SetPowerTarget { watts } => Some(watts),
            _ => None,
        })
        .collect()
}

fn step_changes(outbox: &Outbox) -> Vec<usize> {
    outbox
        .notices
        .iter()
        .filter_map(|n| match n {
            SessionNotice::Plan(PlanEvent::StepChanged { index, .. }) => Some(*index),
            _ => None,
        })
        .collect()
}

#[test]
fn test_percent_target_becomes_absolute_power() {
    let mut c = coordinator(240.0);
    c.trainer_connected(MachineClass::Ftms);
    c.handle(RecorderEvent::Start { at: at(0) }).unwrap();

    let outbox = c
        .handle(RecorderEvent::AttachPlan {
            plan: tempo_plan(),
            at: at(0),
        })
        .unwrap();
    assert_eq!(power_targets(&outbox), vec![180.0]);
    assert_eq!(step_changes(&outbox), vec![0]);
}

#[test]
fn test_manual_override_keeps_step_timer() {
    let mut c = coordinator(240.0);
    c.trainer_connected(MachineClass::Ftms);
    c.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    c.handle(RecorderEvent::AttachPlan {
        plan: tempo_plan(),
        at: at(0),
    })
    .unwrap();

    c.handle(RecorderEvent::Tick { now: at(10) }).unwrap();
    let outbox = c.set_manual_power(200.0);
    assert_eq!(power_targets(&outbox), vec![200.0]);
    assert_eq!(c.trainer().mode(), ControlMode::Manual);

    let outbox = c.handle(RecorderEvent::Tick { now: at(299) }).unwrap();
    assert!(step_changes(&outbox).is_empty());

    // The step still ends after 300 s of moving time, but Manual holds 200 W
    let outbox = c.handle(RecorderEvent::Tick { now: at(300) }).unwrap();
    assert_eq!(step_changes(&outbox), vec![1]);
    assert!(power_targets(&outbox).is_empty());
    assert_eq!(c.trainer().mode(), ControlMode::Manual);

    // Back to Auto picks up the current step target: 50 % of 240 W
    let outbox = c.enable_auto();
    assert_eq!(power_targets(&outbox), vec![120.0]);
}

#[test]
fn test_failed_command_faults_without_stopping_recording() {
    let mut c = coordinator(240.0);
    c.trainer_connected(MachineClass::Ftms);
    c.handle(RecorderEvent::Start { at: at(0) }).unwrap();
    let outbox = c
        .handle(RecorderEvent::AttachPlan {
            plan: tempo_plan(),
            at: at(0),
        })
        .unwrap();
    let sent = outbox
        .commands
        .iter()
        .find(|cmd| matches!(cmd.command, ControlCommand::SetPowerTarget { .. }))
        .unwrap()
        .id;

    let outbox = c.command_response(sent, &CommandResponse::Nack("busy".to_string()));
    assert!(matches!(outbox.notices.as_slice(), [SessionNotice::TrainerFault(_)]));
    assert!(matches!(c.trainer().state(), TrainerState::Faulted { .. }));

    // Recording goes on and the next scheduled command is sent
    let outbox = c.handle(RecorderEvent::Tick { now: at(300) }).unwrap();
    assert_eq!(c.recorder().session().moving_secs, 300);
    let next = outbox
        .commands
        .iter()
        .find(|cmd| matches!(cmd.command, ControlCommand::SetPowerTarget { .. }))
        .unwrap();
    assert_eq!(power_targets(&outbox), vec![120.0]);

    c.command_response(next.id, &CommandResponse::Ack);
    assert!(matches!(c.trainer().state(), TrainerState::Connected { .. }));
}

#[test]
fn test_plan_never_skips_a_step() {
    let mut c = coordinator(250.0);
    c.handle(RecorderEvent::Start { at: at(0) }).unwrap();

    let short = |name: &str| PlanStep::new(name, DurationSpec::Time { seconds: 1 });
    let plan = WorkoutPlan::flatten(
        "sprints",
        &[PlanBlock::Repeat {
            count: 4,
            blocks: vec![PlanBlock::Step(short("go")), PlanBlock::Step(short("rest"))],
        }],
    )
    .unwrap();
    c.handle(RecorderEvent::AttachPlan { plan, at: at(0) }).unwrap();

    // One long clock jump still walks every step in order
    let outbox = c.handle(RecorderEvent::Tick { now: at(60) }).unwrap();
    assert_eq!(step_changes(&outbox), (1..8).collect::<Vec<_>>());
    assert!(outbox
        .notices
        .contains(&SessionNotice::Plan(PlanEvent::PlanCompleted)));
}

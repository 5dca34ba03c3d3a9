//! Unit tests for plan execution.

use proptest::prelude::*;
use ridekeeper::workouts::engine::{PlanEvent, PlanExecutor, PlanProgress, StepState};
use ridekeeper::workouts::types::{
    DurationSpec, IntensityTarget, PlanBlock, PlanError, PlanStep, TargetValue, Thresholds,
    WorkoutPlan,
};

fn progress(moving_secs: u64) -> PlanProgress {
    PlanProgress {
        moving_secs,
        distance_m: 0.0,
    }
}

fn thresholds() -> Thresholds {
    Thresholds {
        power: Some(300.0),
        heart_rate: None,
    }
}

fn timed_plan(durations: &[u32]) -> WorkoutPlan {
    let blocks: Vec<PlanBlock> = durations
        .iter()
        .enumerate()
        .map(|(i, seconds)| {
            PlanBlock::Step(
                PlanStep::new(format!("step {}", i), DurationSpec::Time { seconds: *seconds })
                    .with_target(IntensityTarget::power(TargetValue::percent(60.0 + i as f64))),
            )
        })
        .collect();
    WorkoutPlan::flatten("timed", &blocks).unwrap()
}

#[test]
fn test_rep_step_waits_for_advance() {
    let blocks = vec![
        PlanBlock::Step(PlanStep::new("squats", DurationSpec::Reps { count: 12 })),
        PlanBlock::Step(PlanStep::new("rest", DurationSpec::Time { seconds: 30 })),
    ];
    let plan = WorkoutPlan::flatten("gym", &blocks).unwrap();
    let (mut executor, first) = PlanExecutor::attach(plan, progress(0), &thresholds()).unwrap();
    assert!(matches!(first, PlanEvent::StepChanged { can_advance: true, .. }));

    assert!(executor.tick(progress(3600), &thresholds()).is_none());
    let event = executor.advance(progress(3600), &thresholds()).unwrap();
    assert!(matches!(event, PlanEvent::StepChanged { index: 1, can_advance: false, .. }));

    // Timed steps cannot be skipped by hand
    assert_eq!(
        executor.advance(progress(3601), &thresholds()),
        Err(PlanError::CannotAdvance)
    );
    assert!(executor.tick(progress(3630), &thresholds()).is_some());
    assert!(executor.is_complete());
    assert_eq!(
        executor.advance(progress(3631), &thresholds()),
        Err(PlanError::Finished)
    );
}

#[test]
fn test_percent_targets_resolve_against_thresholds() {
    let (executor, event) =
        PlanExecutor::attach(timed_plan(&[60, 60]), progress(0), &thresholds()).unwrap();
    assert_eq!(event.power_target(), Some(180.0));

    let without = Thresholds::default();
    assert!(executor.current_targets(&without).is_empty());
}

proptest! {
    #[test]
    fn prop_steps_complete_in_order_at_cumulative_bounds(
        durations in prop::collection::vec(1u32..30, 1..12),
    ) {
        let plan = timed_plan(&durations);
        let total: u64 = durations.iter().map(|d| u64::from(*d)).sum();
        let (mut executor, _) = PlanExecutor::attach(plan, progress(0), &thresholds()).unwrap();

        let mut next_index = 1;
        let mut completed_at = None;
        for s in 1..=total + 10 {
            match executor.tick(progress(s), &thresholds()) {
                Some(PlanEvent::StepChanged { index, .. }) => {
                    prop_assert_eq!(index, next_index);
                    let bound: u64 = durations[..index].iter().map(|d| u64::from(*d)).sum();
                    prop_assert_eq!(s, bound);
                    next_index += 1;
                }
                Some(PlanEvent::PlanCompleted) => {
                    prop_assert!(completed_at.is_none());
                    completed_at = Some(s);
                }
                None => {}
            }
        }

        prop_assert_eq!(next_index, durations.len());
        prop_assert_eq!(completed_at, Some(total));
        prop_assert!(executor.step_states().iter().all(|s| *s == StepState::Completed));
    }
}

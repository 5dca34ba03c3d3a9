//! Plan execution.
//!
//! [`PlanExecutor`] walks a flattened plan against the session's moving time
//! and distance. Bounded steps complete on their own; open and rep-count
//! steps wait for an explicit [`PlanExecutor::advance`]. At most one step
//! transition happens per tick, so no step is ever skipped.

use serde::{Deserialize, Serialize};

use crate::workouts::types::{
    DurationSpec, PlanError, RepeatPosition, ResolvedTarget, Thresholds, WorkoutPlan,
};

/// Per-step execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Not reached yet
    #[default]
    Pending,
    /// Currently executing
    Active,
    /// Finished
    Completed,
}

/// Session progress the executor measures steps against.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanProgress {
    /// Moving seconds since session start
    pub moving_secs: u64,
    /// Distance in meters since session start
    pub distance_m: f64,
}

/// Events emitted by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanEvent {
    /// A new step became active
    StepChanged {
        /// Index in the flattened plan
        index: usize,
        /// Step name
        name: String,
        /// Targets resolved against current thresholds
        targets: Vec<ResolvedTarget>,
        /// Enclosing repeat groups
        repeats: Vec<RepeatPosition>,
        /// Whether the step waits for a manual advance
        can_advance: bool,
    },
    /// The last step completed
    PlanCompleted,
}

impl PlanEvent {
    /// Power target carried by a step change, if any.
    pub fn power_target(&self) -> Option<f64> {
        match self {
            PlanEvent::StepChanged { targets, .. } => targets
                .iter()
                .find(|t| t.kind == crate::workouts::types::TargetKind::Power)
                .map(|t| t.value()),
            PlanEvent::PlanCompleted => None,
        }
    }
}

/// Progress within the active step, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    /// Index of the active step
    pub index: usize,
    /// Step name
    pub name: String,
    /// Moving seconds spent in the step
    pub elapsed_secs: u64,
    /// Meters covered in the step
    pub distance_m: f64,
    /// Seconds left for time-bound steps
    pub remaining_secs: Option<u64>,
    /// Meters left for distance-bound steps
    pub remaining_m: Option<f64>,
    /// Fraction complete for bounded steps (0.0 to 1.0)
    pub fraction: Option<f64>,
    /// Whether the step waits for a manual advance
    pub can_advance: bool,
}

/// Serializable executor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecutorState {
    /// Plan being executed
    pub plan: WorkoutPlan,
    /// State of each step
    pub steps: Vec<StepState>,
    /// Index of the active step
    pub current: usize,
    /// Progress at which the active step started
    pub step_anchor: PlanProgress,
    /// Progress at which the plan was attached
    pub plan_anchor: PlanProgress,
    /// Whether the last step has completed
    pub completed: bool,
}

/// Executes a workout plan during a session.
pub struct PlanExecutor {
    state: PlanExecutorState,
}

impl PlanExecutor {
    /// Attach a plan at the current progress. Step 0 becomes active.
    ///
    /// Returns the executor and the event announcing the first step.
    /// Plans built through [`WorkoutPlan::flatten`] are never empty.
    pub fn attach(
        plan: WorkoutPlan,
        progress: PlanProgress,
        thresholds: &Thresholds,
    ) -> Result<(Self, PlanEvent), PlanError> {
        if plan.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        let mut steps = vec![StepState::Pending; plan.steps.len()];
        if let Some(first) = steps.first_mut() {
            *first = StepState::Active;
        }
        tracing::info!("Plan '{}' attached with {} steps", plan.name, plan.steps.len());

        let executor = Self {
            state: PlanExecutorState {
                plan,
                steps,
                current: 0,
                step_anchor: progress,
                plan_anchor: progress,
                completed: false,
            },
        };
        let event = executor.step_event(thresholds);
        Ok((executor, event))
    }

    /// Restore from saved state.
    pub fn from_state(state: PlanExecutorState) -> Self {
        Self { state }
    }

    /// Check the active step against the current progress.
    pub fn tick(&mut self, progress: PlanProgress, thresholds: &Thresholds) -> Option<PlanEvent> {
        if self.state.completed {
            return None;
        }

        let step = &self.state.plan.steps[self.state.current].step;
        let reached = match step.duration {
            DurationSpec::Time { seconds } => {
                progress.moving_secs.saturating_sub(self.state.step_anchor.moving_secs)
                    >= u64::from(seconds)
            }
            DurationSpec::Distance { meters } => {
                progress.distance_m - self.state.step_anchor.distance_m >= meters
            }
            DurationSpec::Reps { .. } | DurationSpec::Open => false,
        };

        if reached {
            Some(self.complete_current(progress, thresholds))
        } else {
            None
        }
    }

    /// Complete an open or rep-count step on request.
    pub fn advance(
        &mut self,
        progress: PlanProgress,
        thresholds: &Thresholds,
    ) -> Result<PlanEvent, PlanError> {
        if self.state.completed {
            return Err(PlanError::Finished);
        }
        if self.state.plan.steps[self.state.current].step.duration.is_bounded() {
            return Err(PlanError::CannotAdvance);
        }
        Ok(self.complete_current(progress, thresholds))
    }

    fn complete_current(&mut self, progress: PlanProgress, thresholds: &Thresholds) -> PlanEvent {
        let index = self.state.current;
        self.state.steps[index] = StepState::Completed;

        if index + 1 >= self.state.steps.len() {
            self.state.completed = true;
            tracing::info!("Plan '{}' completed", self.state.plan.name);
            return PlanEvent::PlanCompleted;
        }

        self.state.current = index + 1;
        self.state.steps[index + 1] = StepState::Active;
        self.state.step_anchor = progress;

        let event = self.step_event(thresholds);
        tracing::debug!(
            "Plan step {} -> {} ({})",
            index,
            index + 1,
            self.state.plan.steps[index + 1].step.name
        );
        event
    }

    fn step_event(&self, thresholds: &Thresholds) -> PlanEvent {
        let flat = &self.state.plan.steps[self.state.current];
        PlanEvent::StepChanged {
            index: self.state.current,
            name: flat.step.name.clone(),
            targets: flat.step.resolve_targets(thresholds),
            repeats: flat.repeats.clone(),
            can_advance: !flat.step.duration.is_bounded(),
        }
    }

    /// Targets of the active step, resolved against `thresholds`.
    pub fn current_targets(&self, thresholds: &Thresholds) -> Vec<ResolvedTarget> {
        if self.state.completed {
            return Vec::new();
        }
        self.state.plan.steps[self.state.current]
            .step
            .resolve_targets(thresholds)
    }

    /// Progress within the active step.
    pub fn step_progress(&self, progress: PlanProgress) -> Option<StepProgress> {
        if self.state.completed {
            return None;
        }
        let step = &self.state.plan.steps[self.state.current].step;
        let elapsed_secs = progress
            .moving_secs
            .saturating_sub(self.state.step_anchor.moving_secs);
        let distance_m = (progress.distance_m - self.state.step_anchor.distance_m).max(0.0);

        let (remaining_secs, remaining_m, fraction) = match step.duration {
            DurationSpec::Time { seconds } => {
                let total = u64::from(seconds);
                (
                    Some(total.saturating_sub(elapsed_secs)),
                    None,
                    Some((elapsed_secs as f64 / total as f64).min(1.0)),
                )
            }
            DurationSpec::Distance { meters } => (
                None,
                Some((meters - distance_m).max(0.0)),
                Some((distance_m / meters).min(1.0)),
            ),
            DurationSpec::Reps { .. } | DurationSpec::Open => (None, None, None),
        };

        Some(StepProgress {
            index: self.state.current,
            name: step.name.clone(),
            elapsed_secs,
            distance_m,
            remaining_secs,
            remaining_m,
            fraction,
            can_advance: !step.duration.is_bounded(),
        })
    }

    /// Whether the active step waits for a manual advance.
    pub fn can_advance(&self) -> bool {
        !self.state.completed
            && !self.state.plan.steps[self.state.current]
                .step
                .duration
                .is_bounded()
    }

    /// Index of the active step.
    pub fn current_index(&self) -> usize {
        self.state.current
    }

    /// State of every step.
    pub fn step_states(&self) -> &[StepState] {
        &self.state.steps
    }

    /// Whether the plan has finished.
    pub fn is_complete(&self) -> bool {
        self.state.completed
    }

    /// The attached plan.
    pub fn plan(&self) -> &WorkoutPlan {
        &self.state.plan
    }

    /// State for checkpointing.
    pub fn state(&self) -> &PlanExecutorState {
        &self.state
    }
}

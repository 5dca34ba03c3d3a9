//! Structured workout plans and their execution during a session.

pub mod engine;
pub mod types;

pub use engine::{PlanEvent, PlanExecutor, PlanExecutorState, PlanProgress, StepProgress, StepState};
pub use types::{
    DurationSpec, FlatStep, IntensityTarget, PlanBlock, PlanDefinition, PlanError, PlanStep,
    RepeatPosition, ResolvedTarget, TargetKind, TargetValue, Thresholds, WorkoutPlan,
};

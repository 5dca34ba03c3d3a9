//! Workout plan types.
//!
//! A plan is authored as a tree of [`PlanBlock`]s and flattened once at load
//! time into an ordered list of [`FlatStep`]s. Execution never recurses.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum number of intensity targets on a step.
pub const MAX_TARGETS_PER_STEP: usize = 2;

/// What an intensity target constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Power in watts
    Power,
    /// Heart rate in BPM
    HeartRate,
    /// Cadence in RPM
    Cadence,
    /// Speed in m/s
    Speed,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Power => write!(f, "Power"),
            TargetKind::HeartRate => write!(f, "Heart Rate"),
            TargetKind::Cadence => write!(f, "Cadence"),
            TargetKind::Speed => write!(f, "Speed"),
        }
    }
}

/// Target value, absolute or relative to a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetValue {
    /// Fixed value in the target's unit
    Absolute { value: f64 },
    /// Percentage of the athlete's threshold
    PercentThreshold { percent: f64 },
    /// Range between two values
    Range {
        low: Box<TargetValue>,
        high: Box<TargetValue>,
    },
}

impl TargetValue {
    /// Create an absolute target.
    pub fn absolute(value: f64) -> Self {
        TargetValue::Absolute { value }
    }

    /// Create a percent-of-threshold target.
    pub fn percent(percent: f64) -> Self {
        TargetValue::PercentThreshold { percent }
    }

    /// Create a range target.
    pub fn range(low: TargetValue, high: TargetValue) -> Self {
        TargetValue::Range {
            low: Box::new(low),
            high: Box::new(high),
        }
    }

    fn uses_threshold(&self) -> bool {
        match self {
            TargetValue::Absolute { .. } => false,
            TargetValue::PercentThreshold { .. } => true,
            TargetValue::Range { low, high } => low.uses_threshold() || high.uses_threshold(),
        }
    }

    /// Resolve to `(low, high)` in absolute units.
    pub fn resolve(&self, threshold: Option<f64>) -> Option<(f64, f64)> {
        match self {
            TargetValue::Absolute { value } => Some((*value, *value)),
            TargetValue::PercentThreshold { percent } => {
                let value = threshold? * percent / 100.0;
                Some((value, value))
            }
            TargetValue::Range { low, high } => {
                let (low, _) = low.resolve(threshold)?;
                let (_, high) = high.resolve(threshold)?;
                Some((low.min(high), low.max(high)))
            }
        }
    }
}

/// An intensity target on a plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityTarget {
    /// Constrained metric
    pub kind: TargetKind,
    /// Target value
    pub value: TargetValue,
}

impl IntensityTarget {
    /// Power target.
    pub fn power(value: TargetValue) -> Self {
        Self {
            kind: TargetKind::Power,
            value,
        }
    }

    /// Heart-rate target.
    pub fn heart_rate(value: TargetValue) -> Self {
        Self {
            kind: TargetKind::HeartRate,
            value,
        }
    }

    /// Cadence target.
    pub fn cadence(value: TargetValue) -> Self {
        Self {
            kind: TargetKind::Cadence,
            value,
        }
    }
}

/// Threshold values used to resolve percentage targets.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Thresholds {
    /// Threshold power in watts
    pub power: Option<f64>,
    /// Threshold heart rate in BPM
    pub heart_rate: Option<f64>,
}

impl Thresholds {
    fn for_kind(&self, kind: TargetKind) -> Option<f64> {
        match kind {
            TargetKind::Power => self.power,
            TargetKind::HeartRate => self.heart_rate,
            TargetKind::Cadence | TargetKind::Speed => None,
        }
    }
}

/// A target resolved to absolute units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    /// Constrained metric
    pub kind: TargetKind,
    /// Lower bound
    pub low: f64,
    /// Upper bound
    pub high: f64,
}

impl ResolvedTarget {
    /// Midpoint of the range, the value a trainer is commanded to.
    pub fn value(&self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

/// How long a step lasts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationSpec {
    /// Moving time in seconds
    Time { seconds: u32 },
    /// Distance in meters
    Distance { meters: f64 },
    /// Repetitions counted by the athlete
    Reps { count: u32 },
    /// Until the athlete advances
    Open,
}

impl DurationSpec {
    /// Whether the step completes on its own.
    pub fn is_bounded(&self) -> bool {
        matches!(self, DurationSpec::Time { .. } | DurationSpec::Distance { .. })
    }
}

/// A single step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Display name
    pub name: String,
    /// Step length
    pub duration: DurationSpec,
    /// Zero to two intensity targets
    #[serde(default)]
    pub targets: Vec<IntensityTarget>,
    /// Optional on-screen message
    #[serde(default)]
    pub notes: Option<String>,
}

impl PlanStep {
    /// Create a step without targets.
    pub fn new(name: impl Into<String>, duration: DurationSpec) -> Self {
        Self {
            name: name.into(),
            duration,
            targets: Vec::new(),
            notes: None,
        }
    }

    /// Add a target.
    pub fn with_target(mut self, target: IntensityTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Resolve targets against thresholds. Targets that cannot be resolved are skipped.
    pub fn resolve_targets(&self, thresholds: &Thresholds) -> Vec<ResolvedTarget> {
        self.targets
            .iter()
            .filter_map(|t| {
                let (low, high) = t.value.resolve(thresholds.for_kind(t.kind))?;
                Some(ResolvedTarget {
                    kind: t.kind,
                    low,
                    high,
                })
            })
            .collect()
    }
}

/// A node of the authored plan tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanBlock {
    /// A single step
    Step(PlanStep),
    /// A repeated group of blocks
    Repeat { count: u32, blocks: Vec<PlanBlock> },
}

/// Position inside one repeat group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatPosition {
    /// Index of the repeat group in authoring order
    pub group: usize,
    /// Zero-based iteration
    pub iteration: u32,
    /// Total iterations
    pub count: u32,
}

/// A step of a flattened plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatStep {
    /// The step itself
    pub step: PlanStep,
    /// Enclosing repeat groups, outermost first
    pub repeats: Vec<RepeatPosition>,
}

/// A flattened, validated workout plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutPlan {
    /// Unique identifier
    pub id: Uuid,
    /// Plan name
    pub name: String,
    /// Steps in execution order
    pub steps: Vec<FlatStep>,
}

/// Authored plan as loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Plan name
    pub name: String,
    /// Block tree
    pub blocks: Vec<PlanBlock>,
}

impl WorkoutPlan {
    /// Flatten a block tree into an executable plan.
    pub fn flatten(name: impl Into<String>, blocks: &[PlanBlock]) -> Result<Self, PlanError> {
        let mut steps = Vec::new();
        let mut next_group = 0;
        flatten_into(blocks, &[], &mut next_group, &mut steps)?;

        if steps.is_empty() {
            return Err(PlanError::Empty);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            steps,
        })
    }

    /// Parse and flatten a JSON plan definition.
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        let definition: PlanDefinition =
            serde_json::from_str(json).map_err(|e| PlanError::Parse(e.to_string()))?;
        Self::flatten(definition.name, &definition.blocks)
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total time of the time-bound steps in seconds.
    pub fn timed_duration_secs(&self) -> u64 {
        self.steps
            .iter()
            .map(|s| match s.step.duration {
                DurationSpec::Time { seconds } => u64::from(seconds),
                _ => 0,
            })
            .sum()
    }

    /// Estimated stress score of the time-bound power steps for a threshold.
    pub fn estimated_stress(&self, ftp: f64) -> Option<f64> {
        if ftp <= 0.0 {
            return None;
        }
        let thresholds = Thresholds {
            power: Some(ftp),
            heart_rate: None,
        };

        let mut weighted_fourth = 0.0;
        let mut total_secs = 0.0;
        for flat in &self.steps {
            let DurationSpec::Time { seconds } = flat.step.duration else {
                continue;
            };
            let watts = flat
                .step
                .resolve_targets(&thresholds)
                .iter()
                .find(|t| t.kind == TargetKind::Power)
                .map(|t| t.value())
                .unwrap_or(0.0);
            weighted_fourth += watts.powi(4) * f64::from(seconds);
            total_secs += f64::from(seconds);
        }

        if total_secs == 0.0 {
            return None;
        }
        let np = (weighted_fourth / total_secs).powf(0.25);
        let intensity = np / ftp;
        Some(total_secs / 3600.0 * intensity * intensity * 100.0)
    }
}

fn flatten_into(
    blocks: &[PlanBlock],
    enclosing: &[RepeatPosition],
    next_group: &mut usize,
    out: &mut Vec<FlatStep>,
) -> Result<(), PlanError> {
    for block in blocks {
        match block {
            PlanBlock::Step(step) => {
                validate_step(step)?;
                out.push(FlatStep {
                    step: step.clone(),
                    repeats: enclosing.to_vec(),
                });
            }
            PlanBlock::Repeat { count, blocks } => {
                if *count == 0 {
                    return Err(PlanError::ZeroRepeat);
                }
                let group = *next_group;
                *next_group += 1;
                for iteration in 0..*count {
                    let mut path = enclosing.to_vec();
                    path.push(RepeatPosition {
                        group,
                        iteration,
                        count: *count,
                    });
                    // Nested groups keep the same index on every iteration
                    let mut inner_next = *next_group;
                    flatten_into(blocks, &path, &mut inner_next, out)?;
                    if iteration + 1 == *count {
                        *next_group = inner_next;
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_step(step: &PlanStep) -> Result<(), PlanError> {
    if step.targets.len() > MAX_TARGETS_PER_STEP {
        return Err(PlanError::TooManyTargets {
            step: step.name.clone(),
            count: step.targets.len(),
        });
    }

    match step.duration {
        DurationSpec::Time { seconds } if seconds == 0 => {
            return Err(PlanError::InvalidDuration(step.name.clone()))
        }
        DurationSpec::Distance { meters } if !(meters.is_finite() && meters > 0.0) => {
            return Err(PlanError::InvalidDuration(step.name.clone()))
        }
        DurationSpec::Reps { count } if count == 0 => {
            return Err(PlanError::InvalidDuration(step.name.clone()))
        }
        _ => {}
    }

    for target in &step.targets {
        if target.value.uses_threshold()
            && matches!(target.kind, TargetKind::Cadence | TargetKind::Speed)
        {
            return Err(PlanError::InvalidTarget(format!(
                "{} target on step '{}' cannot be relative to a threshold",
                target.kind, step.name
            )));
        }
    }

    Ok(())
}

/// Errors related to plans and plan execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    /// Plan has no steps
    #[error("Plan has no steps")]
    Empty,

    /// Step carries more targets than allowed
    #[error("Step '{step}' has {count} targets (max 2)")]
    TooManyTargets { step: String, count: usize },

    /// Repeat block with zero iterations
    #[error("Repeat count must be at least 1")]
    ZeroRepeat,

    /// Non-positive bounded duration
    #[error("Invalid duration on step '{0}'")]
    InvalidDuration(String),

    /// Target that cannot be resolved
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Plan definition could not be parsed
    #[error("Failed to parse plan: {0}")]
    Parse(String),

    /// Manual advance requested on a bounded step
    #[error("Current step completes on its own and cannot be advanced")]
    CannotAdvance,

    /// Plan already finished
    #[error("Plan already completed")]
    Finished,

    /// No plan attached
    #[error("No plan attached")]
    NoPlan,
}

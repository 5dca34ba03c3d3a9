//! Recording types: the session aggregate, its summary and notices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::metrics::calculator::LiveMetricsSnapshot;
use crate::sensors::types::{MetricKind, RejectReason};
use crate::workouts::engine::PlanEvent;
use crate::workouts::types::PlanError;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not started
    #[default]
    Idle,
    /// Actively recording
    Recording,
    /// Recording paused
    Paused,
    /// Completed and stored
    Finished,
    /// Thrown away by the user
    Discarded,
}

impl SessionStatus {
    /// Whether the session accepts no further mutation.
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionStatus::Finished | SessionStatus::Discarded)
    }

    /// Whether the session has started and not closed.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Recording | SessionStatus::Paused)
    }

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Recording => "recording",
            SessionStatus::Paused => "paused",
            SessionStatus::Finished => "finished",
            SessionStatus::Discarded => "discarded",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SessionStatus::Idle),
            "recording" => Some(SessionStatus::Recording),
            "paused" => Some(SessionStatus::Paused),
            "finished" => Some(SessionStatus::Finished),
            "discarded" => Some(SessionStatus::Discarded),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sport of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    #[default]
    Ride,
    Run,
    Walk,
    Row,
    Other,
}

/// Where the session takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// On a trainer or treadmill; distance may come from speed
    Indoor,
    /// Outside; distance comes from positions
    #[default]
    Outdoor,
}

/// A recorded activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: Uuid,
    /// Athlete profile
    pub profile_id: Uuid,
    /// Sport
    pub category: SessionCategory,
    /// Indoor or outdoor
    pub environment: Environment,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Start timestamp, set by the start transition
    pub started_at: Option<DateTime<Utc>>,
    /// End timestamp, set when finished or discarded
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds since start, paused time included
    pub elapsed_secs: u64,
    /// Seconds spent recording
    pub moving_secs: u64,
}

impl Session {
    /// Create an idle session.
    pub fn new(profile_id: Uuid, category: SessionCategory, environment: Environment) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile_id,
            category,
            environment,
            status: SessionStatus::Idle,
            started_at: None,
            ended_at: None,
            elapsed_secs: 0,
            moving_secs: 0,
        }
    }

    /// Seconds spent paused.
    pub fn paused_secs(&self) -> u64 {
        self.elapsed_secs.saturating_sub(self.moving_secs)
    }
}

/// How a stored score was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBasis {
    /// From normalized power and threshold power
    Power,
    /// From average heart rate and threshold heart rate
    HeartRate,
}

/// Stored record of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier
    pub session_id: Uuid,
    /// Athlete profile
    pub profile_id: Uuid,
    /// Sport
    pub category: SessionCategory,
    /// Indoor or outdoor
    pub environment: Environment,
    /// Start timestamp
    pub started_at: DateTime<Utc>,
    /// End timestamp
    pub ended_at: DateTime<Utc>,
    /// Seconds since start, paused time included
    pub elapsed_secs: u64,
    /// Seconds spent recording
    pub moving_secs: u64,
    /// Distance in meters
    pub distance_m: f64,
    /// Ascent in meters
    pub ascent_m: f64,
    /// Average power in watts
    pub avg_power: Option<f64>,
    /// Maximum power in watts
    pub max_power: Option<f64>,
    /// Normalized power in watts
    pub normalized_power: Option<f64>,
    /// Average heart rate in bpm
    pub avg_heart_rate: Option<f64>,
    /// Maximum heart rate in bpm
    pub max_heart_rate: Option<f64>,
    /// Average cadence in rpm
    pub avg_cadence: Option<f64>,
    /// Mechanical work in kJ
    pub energy_kj: f64,
    /// Seconds per power zone
    pub power_zone_secs: Vec<u64>,
    /// Seconds per heart-rate zone
    pub heart_rate_zone_secs: Vec<u64>,
    /// Stored stress score
    pub stress_score: Option<f64>,
    /// Threshold value the score was computed with
    pub scored_with: Option<f64>,
    /// Which threshold the score used
    pub score_basis: Option<ScoreBasis>,
}

/// Non-fatal conditions reported to the UI while recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionNotice {
    /// Status changed
    StatusChanged(SessionStatus),
    /// Live metrics for the last tick
    Metrics(Box<LiveMetricsSnapshot>),
    /// A metric went stale
    SensorTimeout(MetricKind),
    /// A metric started reporting, or reports again after a timeout
    SensorAvailable(MetricKind),
    /// A reading was rejected
    ReadingRejected { kind: MetricKind, reason: RejectReason },
    /// A position jump was discarded
    PositionDiscontinuity { implied_speed_mps: f64 },
    /// Plan progress
    Plan(PlanEvent),
    /// Trainer command failed; recording continues
    TrainerFault(String),
    /// Checkpoints keep failing
    DurabilityWarning { consecutive_failures: u32 },
}

/// Errors from the session recorder.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecorderError {
    /// Session is finished or discarded
    #[error("Session is closed")]
    SessionClosed,

    /// Session has already started
    #[error("Session already started")]
    AlreadyStarted,

    /// Session has not started
    #[error("Session not started")]
    NotStarted,

    /// Operation needs a recording session
    #[error("Session is not recording")]
    NotRecording,

    /// Operation needs a paused session
    #[error("Session is not paused")]
    NotPaused,

    /// Plan operation failed
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),
}

//! Storage module for the database, persistence boundaries and configuration.
//!
//! The recording and training-load code only sees the traits defined here;
//! [`Database`] implements all of them on SQLite.

pub mod config;
pub mod database;
pub mod schema;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::capability::{CapabilityKind, CapabilityRecord};
use crate::recording::recorder::RecorderEvent;
use crate::recording::types::{ScoreBasis, SessionSummary};

pub use config::{AppConfig, CapabilityDefaults, NormalizerSettings, RecordingSettings};
pub use database::{Database, DatabaseError};

/// A checkpoint as stored: metadata plus the encoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCheckpoint {
    /// Session the checkpoint belongs to
    pub session_id: Uuid,
    /// Monotonic per-session sequence number
    pub sequence: u64,
    /// Journal position covered by the checkpoint
    pub journal_position: u64,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
    /// Why it was taken
    pub reason: String,
    /// Encoded checkpoint envelope
    pub payload: String,
}

/// An applied recorder event in the tail journal.
#[derive(Debug, Clone, PartialEq)]
pub struct TailEntry {
    /// Position in the session's journal, starting at 1
    pub position: u64,
    /// The event as the recorder received it
    pub event: RecorderEvent,
}

/// Position in the ordered list of completed sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCursor {
    /// Start time of the last processed session
    pub started_at: DateTime<Utc>,
    /// Identifier of the last processed session
    pub session_id: Uuid,
}

/// Filter for completed-session queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionQuery {
    /// Sessions starting at or after this time
    pub from: Option<DateTime<Utc>>,
    /// Sessions starting before this time
    pub until: Option<DateTime<Utc>>,
    /// Resume after this session
    pub after: Option<SessionCursor>,
    /// Maximum number of rows
    pub limit: Option<usize>,
}

/// Durable checkpoints.
pub trait CheckpointStore {
    /// Store a checkpoint. Re-persisting the same sequence replaces it.
    fn persist_checkpoint(&self, checkpoint: &StoredCheckpoint) -> Result<(), DatabaseError>;

    /// Newest checkpoint of a session.
    fn load_latest_checkpoint(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<StoredCheckpoint>, DatabaseError>;

    /// All checkpoints of a session, newest first.
    fn load_checkpoints(&self, session_id: &Uuid) -> Result<Vec<StoredCheckpoint>, DatabaseError>;

    /// Keep the newest `keep` checkpoints and drop journal entries below the
    /// oldest one kept. Returns the number of checkpoints removed.
    fn prune_checkpoints(&self, session_id: &Uuid, keep: usize) -> Result<usize, DatabaseError>;

    /// Remove every checkpoint of a session.
    fn clear_checkpoints(&self, session_id: &Uuid) -> Result<(), DatabaseError>;

    /// Sessions that still have checkpoints, i.e. were never closed cleanly.
    fn checkpointed_sessions(&self) -> Result<Vec<Uuid>, DatabaseError>;
}

/// Journal of recorder events after the last checkpoint.
pub trait TailJournal {
    /// Append entries. Appending an existing position replaces it.
    fn append_tail(&self, session_id: &Uuid, entries: &[TailEntry]) -> Result<(), DatabaseError>;

    /// Entries with a position greater than `position`, in order.
    fn tail_after(&self, session_id: &Uuid, position: u64) -> Result<Vec<TailEntry>, DatabaseError>;

    /// Remove the whole journal of a session.
    fn clear_tail(&self, session_id: &Uuid) -> Result<(), DatabaseError>;
}

/// Finished session records.
pub trait SessionStore {
    /// Store a finished session. Storing it again replaces it.
    fn append_session_record(&self, summary: &SessionSummary) -> Result<(), DatabaseError>;

    /// A stored session.
    fn session_record(&self, session_id: &Uuid) -> Result<Option<SessionSummary>, DatabaseError>;

    /// Completed sessions of a profile ordered by start time.
    fn completed_sessions(
        &self,
        profile_id: &Uuid,
        query: SessionQuery,
    ) -> Result<Vec<SessionSummary>, DatabaseError>;

    /// Replace the stored score of a session.
    fn update_stress_score(
        &self,
        session_id: &Uuid,
        stress_score: Option<f64>,
        scored_with: Option<f64>,
        basis: Option<ScoreBasis>,
    ) -> Result<(), DatabaseError>;

    /// Remember how far a re-scoring batch got.
    fn save_rescore_cursor(
        &self,
        record_id: &Uuid,
        profile_id: &Uuid,
        cursor: Option<SessionCursor>,
    ) -> Result<(), DatabaseError>;

    /// Cursor of an interrupted re-scoring batch, if one is pending.
    fn load_rescore_cursor(
        &self,
        record_id: &Uuid,
    ) -> Result<Option<Option<SessionCursor>>, DatabaseError>;

    /// Forget a finished re-scoring batch.
    fn clear_rescore_cursor(&self, record_id: &Uuid) -> Result<(), DatabaseError>;
}

/// Capability records (performance and profile metric logs).
pub trait MetricLogStore {
    /// Store a record. Records are never edited; corrections are new records.
    fn insert_capability(&self, record: &CapabilityRecord) -> Result<(), DatabaseError>;

    /// Look up a stored record.
    fn capability_record(&self, id: &Uuid) -> Result<Option<CapabilityRecord>, DatabaseError>;

    /// All records of a profile ordered by `valid_from`.
    fn capability_records(&self, profile_id: &Uuid) -> Result<Vec<CapabilityRecord>, DatabaseError>;

    /// Value of the most recent record of `kind` with `valid_from <= date`.
    fn get_metric_at_date(
        &self,
        profile_id: &Uuid,
        kind: CapabilityKind,
        date: DateTime<Utc>,
    ) -> Result<Option<f64>, DatabaseError>;
}

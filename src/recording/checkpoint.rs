//! Checkpoints and crash recovery.
//!
//! A checkpoint is a versioned, checksummed envelope around a
//! [`RecorderState`]. Together with the tail journal of readings accepted
//! after it, the newest readable checkpoint rebuilds the recorder exactly as
//! it was when the last journaled reading was processed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use super::recorder::{CheckpointReason, RecorderConfig, RecorderState, SessionRecorder};
use super::types::SessionNotice;
use crate::storage::{CheckpointStore, DatabaseError, StoredCheckpoint, TailEntry, TailJournal};

/// Envelope format tag.
pub const CHECKPOINT_FORMAT: &str = "ridekeeper.checkpoint";

/// Current envelope version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Errors from checkpointing and recovery.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Checkpoint could not be written
    #[error("Checkpoint write failed: {0}")]
    WriteFailed(String),

    /// Checkpoint payload is unreadable or fails verification
    #[error("Checkpoint corrupt: {0}")]
    Corrupt(String),

    /// No readable checkpoint exists for the session
    #[error("Session lost: {0}")]
    SessionLost(Uuid),

    /// Storage failure while loading
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// A serialized recorder state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format tag
    pub format: String,
    /// Envelope version
    pub version: u32,
    /// Session the state belongs to
    pub session_id: Uuid,
    /// Per-session sequence number
    pub sequence: u64,
    /// Journal position included in the state
    pub journal_position: u64,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
    /// Why it was taken
    pub reason: CheckpointReason,
    /// SHA-256 of the serialized state, hex encoded
    pub checksum: String,
    /// The recorder state
    pub state: RecorderState,
}

impl Checkpoint {
    /// Wrap a recorder state.
    pub fn new(
        state: RecorderState,
        sequence: u64,
        reason: CheckpointReason,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CheckpointError> {
        let checksum = state_checksum(&state)?;
        Ok(Self {
            format: CHECKPOINT_FORMAT.to_string(),
            version: CHECKPOINT_VERSION,
            session_id: state.session.id,
            sequence,
            journal_position: state.journal_position,
            created_at,
            reason,
            checksum,
            state,
        })
    }

    /// Serialize the envelope.
    pub fn encode(&self) -> Result<String, CheckpointError> {
        serde_json::to_string(self).map_err(|e| CheckpointError::WriteFailed(e.to_string()))
    }

    /// Parse and verify an envelope.
    pub fn decode(payload: &str) -> Result<Self, CheckpointError> {
        let checkpoint: Checkpoint =
            serde_json::from_str(payload).map_err(|e| CheckpointError::Corrupt(e.to_string()))?;

        if checkpoint.format != CHECKPOINT_FORMAT {
            return Err(CheckpointError::Corrupt(format!(
                "unknown format '{}'",
                checkpoint.format
            )));
        }
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Corrupt(format!(
                "unsupported version {}",
                checkpoint.version
            )));
        }
        let checksum = state_checksum(&checkpoint.state)?;
        if checksum != checkpoint.checksum {
            return Err(CheckpointError::Corrupt("checksum mismatch".to_string()));
        }
        Ok(checkpoint)
    }

    /// Storage form.
    pub fn to_stored(&self) -> Result<StoredCheckpoint, CheckpointError> {
        Ok(StoredCheckpoint {
            session_id: self.session_id,
            sequence: self.sequence,
            journal_position: self.journal_position,
            created_at: self.created_at,
            reason: self.reason.as_str().to_string(),
            payload: self.encode()?,
        })
    }
}

fn state_checksum(state: &RecorderState) -> Result<String, CheckpointError> {
    let bytes = serde_json::to_vec(state).map_err(|e| CheckpointError::WriteFailed(e.to_string()))?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Capture the recorder state.
pub fn checkpoint(
    recorder: &SessionRecorder,
    sequence: u64,
    reason: CheckpointReason,
    created_at: DateTime<Utc>,
) -> Result<Checkpoint, CheckpointError> {
    Checkpoint::new(recorder.state(), sequence, reason, created_at)
}

/// Rebuild a recorder from a checkpoint and the journal entries after it.
///
/// Entries at or below the checkpoint position are skipped. Replay stops at
/// the first gap in positions, since nothing past it can be applied in order.
pub fn recover(checkpoint: &Checkpoint, tail: &[TailEntry], config: RecorderConfig) -> SessionRecorder {
    let mut recorder = SessionRecorder::from_state(checkpoint.state.clone(), config);

    for entry in tail {
        if entry.position <= recorder.journal_position() {
            continue;
        }
        if entry.position != recorder.journal_position() + 1 {
            tracing::warn!(
                "Journal gap after position {} (next entry {}), stopping replay",
                recorder.journal_position(),
                entry.position
            );
            break;
        }
        if let Err(e) = recorder.replay(entry) {
            tracing::warn!("Replay stopped at position {}: {}", entry.position, e);
            break;
        }
    }

    tracing::info!(
        "Recovered session {} from checkpoint {} at journal position {}",
        checkpoint.session_id,
        checkpoint.sequence,
        recorder.journal_position()
    );
    recorder
}

/// Recover a session from storage.
///
/// Checkpoints are tried newest first; a corrupt one falls back to the next
/// older one. Returns the recorder and the sequence of the checkpoint used.
pub fn recover_session<S>(
    store: &S,
    session_id: &Uuid,
    config: RecorderConfig,
) -> Result<(SessionRecorder, u64), CheckpointError>
where
    S: CheckpointStore + TailJournal,
{
    for stored in store.load_checkpoints(session_id)? {
        let checkpoint = match Checkpoint::decode(&stored.payload) {
            Ok(checkpoint) if checkpoint.session_id == *session_id => checkpoint,
            Ok(_) => {
                tracing::warn!("Checkpoint {} belongs to another session", stored.sequence);
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    "Skipping checkpoint {} of session {}: {}",
                    stored.sequence,
                    session_id,
                    e
                );
                continue;
            }
        };

        let tail = store.tail_after(session_id, checkpoint.journal_position)?;
        let recorder = recover(&checkpoint, &tail, config);
        return Ok((recorder, checkpoint.sequence));
    }

    tracing::error!("No readable checkpoint for session {}", session_id);
    Err(CheckpointError::SessionLost(*session_id))
}

/// Tracks checkpoint sequence numbers and write health for one session.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    next_sequence: u64,
    keep: usize,
    warn_after: u32,
    consecutive_failures: u32,
}

impl CheckpointManager {
    /// Start a manager. `next_sequence` continues after any existing checkpoints.
    pub fn new(next_sequence: u64, keep: usize, warn_after: u32) -> Self {
        Self {
            next_sequence,
            keep: keep.max(1),
            warn_after,
            consecutive_failures: 0,
        }
    }

    /// Build an envelope with the next sequence number.
    pub fn capture(
        &mut self,
        recorder: &SessionRecorder,
        reason: CheckpointReason,
        created_at: DateTime<Utc>,
    ) -> Result<Checkpoint, CheckpointError> {
        let cp = checkpoint(recorder, self.next_sequence, reason, created_at)?;
        self.next_sequence += 1;
        Ok(cp)
    }

    /// Number of checkpoints to keep after pruning.
    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Sequence number of the next checkpoint.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Consecutive failed writes.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a successful write.
    pub fn on_written(&mut self) {
        if self.consecutive_failures > 0 {
            tracing::info!(
                "Checkpoint writes recovered after {} failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Record a failed write. Returns a durability warning once the failure
    /// count reaches the threshold, and again on every further failure.
    pub fn on_failed(&mut self, error: &str) -> Option<SessionNotice> {
        self.consecutive_failures += 1;
        tracing::warn!(
            "Checkpoint write failed ({} in a row): {}",
            self.consecutive_failures,
            error
        );
        if self.warn_after > 0 && self.consecutive_failures >= self.warn_after {
            Some(SessionNotice::DurabilityWarning {
                consecutive_failures: self.consecutive_failures,
            })
        } else {
            None
        }
    }
}

//! Session recording: the recorder state machine, checkpoints and recovery,
//! and the task that runs a live session.

pub mod checkpoint;
pub mod coordinator;
pub mod recorder;
pub mod runtime;
pub mod types;

pub use checkpoint::{recover, recover_session, Checkpoint, CheckpointError, CheckpointManager};
pub use coordinator::{Outbox, SessionCoordinator};
pub use recorder::{
    CheckpointReason, RecorderConfig, RecorderEffect, RecorderEvent, RecorderState,
    SessionRecorder,
};
pub use runtime::{
    Clock, ManualClock, ReadingSubmitter, SessionError, SessionHandle, SessionRuntime,
    SystemClock,
};
pub use types::{
    Environment, RecorderError, ScoreBasis, Session, SessionCategory, SessionNotice,
    SessionStatus, SessionSummary,
};

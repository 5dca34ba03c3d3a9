//! The owning loop body of a session.
//!
//! [`SessionCoordinator`] feeds events to the [`SessionRecorder`], routes the
//! resulting effects to the trainer engine and the checkpoint manager, and
//! collects everything that needs I/O into an [`Outbox`]. The caller performs
//! the outbox after the coordinator call returns, so nothing here blocks.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::recorder::{CheckpointReason, RecorderEffect, RecorderEvent, SessionRecorder};
use super::types::{Environment, RecorderError, SessionNotice, SessionStatus, SessionSummary};
use crate::sensors::types::MachineStatus;
use crate::storage::{StoredCheckpoint, TailEntry};
use crate::trainer::{CommandResponse, EncodedCommand, MachineClass, TrainerControlEngine, VirtualRoute};

/// I/O produced by one coordinator call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outbox {
    /// Readings to journal, in order
    pub tail: Vec<TailEntry>,
    /// Checkpoint to persist
    pub checkpoint: Option<StoredCheckpoint>,
    /// Prune checkpoints down to this many after persisting
    pub prune_keep: Option<usize>,
    /// Trainer commands to send
    pub commands: Vec<EncodedCommand>,
    /// Summary to store
    pub summary: Option<SessionSummary>,
    /// Drop checkpoints and journal of the closed session
    pub clear_session: bool,
    /// Notices for the UI
    pub notices: Vec<SessionNotice>,
}

impl Outbox {
    /// Whether there is anything to write to storage.
    pub fn has_writes(&self) -> bool {
        !self.tail.is_empty()
            || self.checkpoint.is_some()
            || self.summary.is_some()
            || self.clear_session
    }
}

/// Single-writer owner of a recording session.
pub struct SessionCoordinator {
    recorder: SessionRecorder,
    trainer: TrainerControlEngine,
    checkpoints: CheckpointManager,
}

impl SessionCoordinator {
    /// Own a fresh recorder.
    pub fn new(
        recorder: SessionRecorder,
        trainer: TrainerControlEngine,
        checkpoints: CheckpointManager,
    ) -> Self {
        Self {
            recorder,
            trainer,
            checkpoints,
        }
    }

    /// Own a recovered recorder.
    ///
    /// A session that was recording when it was lost comes back paused at the
    /// last replayed instant, so the gap until the rider resumes counts as
    /// paused time. A fresh checkpoint is always taken.
    pub fn resume_recovered(
        recorder: SessionRecorder,
        trainer: TrainerControlEngine,
        checkpoints: CheckpointManager,
    ) -> (Self, Outbox) {
        let mut coordinator = Self::new(recorder, trainer, checkpoints);
        let mut outbox = Outbox::default();

        let pause_at = coordinator.recorder.clock_time();
        match (coordinator.recorder.status(), pause_at) {
            (SessionStatus::Recording, Some(at)) => {
                match coordinator.recorder.handle(RecorderEvent::Pause { at }) {
                    Ok(effects) => coordinator.apply(effects, &mut outbox),
                    Err(e) => tracing::warn!("Could not pause recovered session: {}", e),
                }
            }
            _ => coordinator.take_checkpoint(CheckpointReason::Recovered, &mut outbox),
        }
        (coordinator, outbox)
    }

    /// The recorder.
    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    /// The trainer engine.
    pub fn trainer(&self) -> &TrainerControlEngine {
        &self.trainer
    }

    /// The checkpoint manager.
    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Session identifier.
    pub fn session_id(&self) -> Uuid {
        self.recorder.session().id
    }

    /// Apply a recorder event.
    pub fn handle(&mut self, event: RecorderEvent) -> Result<Outbox, RecorderError> {
        let effects = self.recorder.handle(event)?;
        let mut outbox = Outbox::default();
        self.apply(effects, &mut outbox);
        Ok(outbox)
    }

    /// Direct user power target.
    pub fn set_manual_power(&mut self, watts: f64) -> Outbox {
        self.commands(|t| t.set_manual_power(watts))
    }

    /// Direct user resistance level.
    pub fn set_manual_resistance(&mut self, level: f64) -> Outbox {
        self.commands(|t| t.set_manual_resistance(level))
    }

    /// Direct user grade.
    pub fn set_manual_grade(&mut self, grade: f64) -> Outbox {
        self.commands(|t| t.set_manual_grade(grade))
    }

    /// Hand control back to the plan.
    pub fn enable_auto(&mut self) -> Outbox {
        self.commands(|t| t.enable_auto())
    }

    /// Attach or remove a virtual route. Outdoor sessions ride real terrain,
    /// so a route offered to one is ignored.
    pub fn set_route(&mut self, route: Option<VirtualRoute>) -> Outbox {
        if route.is_some() && self.recorder.session().environment != Environment::Indoor {
            tracing::warn!("Ignoring virtual route for outdoor session {}", self.session_id());
            return Outbox::default();
        }
        self.commands(|t| t.set_route(route))
    }

    /// The trainer connected.
    pub fn trainer_connected(&mut self, class: MachineClass) -> Outbox {
        self.trainer.begin_connect();
        self.commands(|t| t.on_connected(class))
    }

    /// The trainer disconnected.
    pub fn trainer_disconnected(&mut self) {
        self.trainer.on_disconnected();
    }

    /// A status notification from the machine.
    pub fn machine_status(&mut self, status: MachineStatus) {
        self.trainer.on_status(status);
    }

    /// A trainer command finished.
    pub fn command_response(&mut self, id: u64, response: &CommandResponse) -> Outbox {
        let mut outbox = Outbox::default();
        if let Some(err) = self.trainer.on_response(id, response) {
            outbox.notices.push(SessionNotice::TrainerFault(err.to_string()));
        }
        outbox
    }

    /// Outcome of a checkpoint write.
    pub fn checkpoint_written(&mut self, result: Result<(), String>) -> Option<SessionNotice> {
        match result {
            Ok(()) => {
                self.checkpoints.on_written();
                None
            }
            Err(e) => self.checkpoints.on_failed(&e),
        }
    }

    fn commands(&mut self, f: impl FnOnce(&mut TrainerControlEngine) -> Vec<EncodedCommand>) -> Outbox {
        Outbox {
            commands: f(&mut self.trainer),
            ..Outbox::default()
        }
    }

    fn apply(&mut self, effects: Vec<RecorderEffect>, outbox: &mut Outbox) {
        let mut checkpoint_reason = None;

        for effect in effects {
            match effect {
                RecorderEffect::Journal(entry) => outbox.tail.push(entry),
                RecorderEffect::Checkpoint(reason) => {
                    // Transition reasons win over the interval
                    if checkpoint_reason.is_none() || reason != CheckpointReason::Interval {
                        checkpoint_reason = Some(reason);
                    }
                }
                RecorderEffect::Plan(event) => {
                    outbox.commands.extend(self.trainer.on_plan_event(&event));
                }
                RecorderEffect::PlanDetached => {
                    outbox.commands.extend(self.trainer.on_plan_detached());
                }
                RecorderEffect::TrainerTick(motion) => {
                    outbox.commands.extend(self.trainer.on_tick(motion));
                }
                RecorderEffect::StatusChanged(status) => match status {
                    SessionStatus::Recording => outbox.commands.extend(self.trainer.start_session()),
                    SessionStatus::Paused | SessionStatus::Finished | SessionStatus::Discarded => {
                        outbox.commands.extend(self.trainer.stop_session())
                    }
                    SessionStatus::Idle => {}
                },
                RecorderEffect::Notice(notice) => outbox.notices.push(notice),
                RecorderEffect::Completed(summary) => {
                    outbox.summary = Some(*summary);
                    outbox.clear_session = true;
                }
                RecorderEffect::Discarded => outbox.clear_session = true,
            }
        }

        if outbox.clear_session {
            return;
        }
        if let Some(reason) = checkpoint_reason {
            self.take_checkpoint(reason, outbox);
        }
    }

    fn take_checkpoint(&mut self, reason: CheckpointReason, outbox: &mut Outbox) {
        let captured = self
            .checkpoints
            .capture(&self.recorder, reason, Utc::now())
            .and_then(|cp| cp.to_stored());
        match captured {
            Ok(stored) => {
                tracing::debug!(
                    "Checkpoint {} ({}) at journal position {}",
                    stored.sequence,
                    stored.reason,
                    stored.journal_position
                );
                outbox.checkpoint = Some(stored);
                outbox.prune_keep = Some(self.checkpoints.keep());
            }
            Err(e) => {
                let message = match e {
                    CheckpointError::WriteFailed(m) => m,
                    other => other.to_string(),
                };
                if let Some(notice) = self.checkpoints.on_failed(&message) {
                    outbox.notices.push(notice);
                }
            }
        }
    }

    /// Time of the last processed tick.
    pub fn clock_time(&self) -> Option<DateTime<Utc>> {
        self.recorder.clock_time()
    }
}

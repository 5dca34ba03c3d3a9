//! Session runtime.
//!
//! One tokio task owns the [`SessionCoordinator`]. Readings, user commands
//! and trainer events arrive on a single `mpsc` channel, so inputs from one
//! producer stay in order. A timer drives the logical clock while recording
//! live. Trainer commands run as separate tasks bounded by a timeout, and
//! storage writes run on the blocking pool one batch at a time. Neither is
//! awaited by the loop.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use uuid::Uuid;

use super::checkpoint::{recover_session, CheckpointError, CheckpointManager};
use super::coordinator::{Outbox, SessionCoordinator};
use super::recorder::{RecorderConfig, RecorderEvent, SessionRecorder};
use super::types::{RecorderError, Session, SessionNotice, SessionSummary};
use crate::metrics::capability::{CapabilityKind, CapabilityTimeline};
use crate::sensors::types::{MachineStatus, Reading};
use crate::storage::{
    AppConfig, CheckpointStore, Database, DatabaseError, MetricLogStore, SessionStore,
    StoredCheckpoint, TailEntry, TailJournal,
};
use crate::trainer::{
    CommandResponse, ControlChannel, EncodedCommand, MachineClass, TrainerControlEngine,
    VirtualRoute,
};
use crate::workouts::types::WorkoutPlan;

/// Capacity of the session input channel.
const INPUT_CAPACITY: usize = 1024;

/// Source of wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Clock stopped at `at`.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(at)),
        }
    }

    /// Move to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Errors surfaced through a [`SessionHandle`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The recorder refused the operation
    #[error(transparent)]
    Recorder(#[from] RecorderError),

    /// Recovery failed
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Storage failed
    #[error(transparent)]
    Storage(#[from] DatabaseError),

    /// A background task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),

    /// The session task has ended
    #[error("Session task has stopped")]
    Stopped,
}

impl From<JoinError> for SessionError {
    fn from(e: JoinError) -> Self {
        SessionError::Task(e.to_string())
    }
}

enum TrainerInput {
    ManualPower(f64),
    ManualResistance(f64),
    ManualGrade(f64),
    EnableAuto,
    Route(Option<VirtualRoute>),
    Connected(MachineClass),
    Disconnected,
    Status(MachineStatus),
}

enum SessionInput {
    Reading(Reading),
    Event {
        event: RecorderEvent,
        reply: oneshot::Sender<Result<(), RecorderError>>,
    },
    Close {
        event: RecorderEvent,
        reply: oneshot::Sender<Result<Option<SessionSummary>, RecorderError>>,
    },
    Trainer(TrainerInput),
}

/// Cloneable handle for reading producers.
#[derive(Clone)]
pub struct ReadingSubmitter {
    input: mpsc::Sender<SessionInput>,
}

impl ReadingSubmitter {
    /// Submit a reading, waiting for channel capacity.
    pub async fn submit(&self, reading: Reading) -> Result<(), SessionError> {
        self.input
            .send(SessionInput::Reading(reading))
            .await
            .map_err(|_| SessionError::Stopped)
    }

    /// Submit a reading without waiting. A full channel drops the reading.
    pub fn try_submit(&self, reading: Reading) -> Result<(), SessionError> {
        match self.input.try_send(SessionInput::Reading(reading)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Session input full, reading dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::Stopped),
        }
    }
}

/// Control surface of a running session.
pub struct SessionHandle {
    session_id: Uuid,
    input: mpsc::Sender<SessionInput>,
    notices: crossbeam::channel::Receiver<SessionNotice>,
    clock: Arc<dyn Clock>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Session identifier.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// A submitter for reading producers.
    pub fn submitter(&self) -> ReadingSubmitter {
        ReadingSubmitter {
            input: self.input.clone(),
        }
    }

    /// Receiver for UI notices.
    pub fn notices(&self) -> crossbeam::channel::Receiver<SessionNotice> {
        self.notices.clone()
    }

    /// Notices received so far.
    pub fn drain_notices(&self) -> Vec<SessionNotice> {
        self.notices.try_iter().collect()
    }

    async fn event(&self, event: RecorderEvent) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.input
            .send(SessionInput::Event { event, reply })
            .await
            .map_err(|_| SessionError::Stopped)?;
        Ok(rx.await.map_err(|_| SessionError::Stopped)??)
    }

    async fn close(&self, event: RecorderEvent) -> Result<Option<SessionSummary>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.input
            .send(SessionInput::Close { event, reply })
            .await
            .map_err(|_| SessionError::Stopped)?;
        Ok(rx.await.map_err(|_| SessionError::Stopped)??)
    }

    async fn trainer(&self, input: TrainerInput) -> Result<(), SessionError> {
        self.input
            .send(SessionInput::Trainer(input))
            .await
            .map_err(|_| SessionError::Stopped)
    }

    /// Start recording now.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.start_at(self.clock.now()).await
    }

    /// Start recording at `at`.
    pub async fn start_at(&self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.event(RecorderEvent::Start { at }).await
    }

    /// Pause now.
    pub async fn pause(&self) -> Result<(), SessionError> {
        self.pause_at(self.clock.now()).await
    }

    /// Pause at `at`.
    pub async fn pause_at(&self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.event(RecorderEvent::Pause { at }).await
    }

    /// Resume now.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.resume_at(self.clock.now()).await
    }

    /// Resume at `at`.
    pub async fn resume_at(&self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.event(RecorderEvent::Resume { at }).await
    }

    /// Attach a plan now.
    pub async fn attach_plan(&self, plan: WorkoutPlan) -> Result<(), SessionError> {
        self.attach_plan_at(plan, self.clock.now()).await
    }

    /// Attach a plan at `at`.
    pub async fn attach_plan_at(&self, plan: WorkoutPlan, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.event(RecorderEvent::AttachPlan { plan, at }).await
    }

    /// Detach the plan now.
    pub async fn detach_plan(&self) -> Result<(), SessionError> {
        self.detach_plan_at(self.clock.now()).await
    }

    /// Detach the plan at `at`.
    pub async fn detach_plan_at(&self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.event(RecorderEvent::DetachPlan { at }).await
    }

    /// Complete the active open-ended step now.
    pub async fn advance_step(&self) -> Result<(), SessionError> {
        self.advance_step_at(self.clock.now()).await
    }

    /// Complete the active open-ended step at `at`.
    pub async fn advance_step_at(&self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.event(RecorderEvent::AdvanceStep { at }).await
    }

    /// Advance the logical clock to `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<(), SessionError> {
        self.event(RecorderEvent::Tick { now }).await
    }

    /// Finish now and return the stored summary.
    pub async fn finish(self) -> Result<SessionSummary, SessionError> {
        let at = self.clock.now();
        self.finish_at(at).await
    }

    /// Finish at `at` and return the stored summary.
    pub async fn finish_at(self, at: DateTime<Utc>) -> Result<SessionSummary, SessionError> {
        let summary = self.close(RecorderEvent::Finish { at }).await?;
        self.task.await?;
        summary.ok_or(SessionError::Stopped)
    }

    /// Discard now.
    pub async fn discard(self) -> Result<(), SessionError> {
        let at = self.clock.now();
        self.discard_at(at).await
    }

    /// Discard at `at`.
    pub async fn discard_at(self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.close(RecorderEvent::Discard { at }).await?;
        self.task.await?;
        Ok(())
    }

    /// Stop the session task without closing the session.
    ///
    /// Pending writes are flushed and recovery data stays in storage, so the
    /// session can be picked up again with [`SessionRuntime::recover`].
    /// Outstanding [`ReadingSubmitter`]s keep the task alive until dropped.
    pub async fn suspend(self) -> Result<(), SessionError> {
        let Self { input, task, .. } = self;
        drop(input);
        task.await?;
        Ok(())
    }

    /// Direct user power target.
    pub async fn set_manual_power(&self, watts: f64) -> Result<(), SessionError> {
        self.trainer(TrainerInput::ManualPower(watts)).await
    }

    /// Direct user resistance level.
    pub async fn set_manual_resistance(&self, level: f64) -> Result<(), SessionError> {
        self.trainer(TrainerInput::ManualResistance(level)).await
    }

    /// Direct user grade.
    pub async fn set_manual_grade(&self, grade: f64) -> Result<(), SessionError> {
        self.trainer(TrainerInput::ManualGrade(grade)).await
    }

    /// Return the trainer to plan control.
    pub async fn enable_auto(&self) -> Result<(), SessionError> {
        self.trainer(TrainerInput::EnableAuto).await
    }

    /// Attach or remove a virtual route.
    pub async fn set_route(&self, route: Option<VirtualRoute>) -> Result<(), SessionError> {
        self.trainer(TrainerInput::Route(route)).await
    }

    /// The trainer connected.
    pub async fn trainer_connected(&self, class: MachineClass) -> Result<(), SessionError> {
        self.trainer(TrainerInput::Connected(class)).await
    }

    /// The trainer disconnected.
    pub async fn trainer_disconnected(&self) -> Result<(), SessionError> {
        self.trainer(TrainerInput::Disconnected).await
    }

    /// A status notification from the machine.
    pub async fn machine_status(&self, status: MachineStatus) -> Result<(), SessionError> {
        self.trainer(TrainerInput::Status(status)).await
    }
}

/// Starts and recovers sessions.
pub struct SessionRuntime<C: ControlChannel> {
    config: AppConfig,
    db: Arc<Mutex<Database>>,
    channel: Arc<C>,
    clock: Arc<dyn Clock>,
    tick_interval: Option<Duration>,
}

impl<C: ControlChannel> SessionRuntime<C> {
    /// Runtime on the system clock with a 1 Hz timer.
    pub fn new(config: AppConfig, db: Arc<Mutex<Database>>, channel: Arc<C>) -> Self {
        Self {
            config,
            db,
            channel,
            clock: Arc::new(SystemClock),
            tick_interval: Some(Duration::from_secs(1)),
        }
    }

    /// Use another clock.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Timer period, or `None` to advance the clock only from readings and
    /// explicit ticks.
    pub fn with_tick_interval(mut self, interval: Option<Duration>) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sessions left with checkpoints by an unclean shutdown.
    pub async fn unfinished_sessions(&self) -> Result<Vec<Uuid>, SessionError> {
        let db = Arc::clone(&self.db);
        let ids = tokio::task::spawn_blocking(move || {
            db.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .checkpointed_sessions()
        })
        .await??;
        Ok(ids)
    }

    /// Spawn the task for an idle session.
    pub async fn spawn(&self, session: Session) -> Result<SessionHandle, SessionError> {
        let db = Arc::clone(&self.db);
        let profile_id = session.profile_id;
        let records = tokio::task::spawn_blocking(move || {
            db.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .capability_records(&profile_id)
        })
        .await??;
        let capabilities = CapabilityTimeline::new(records);

        let trainer = self.trainer_for(&capabilities);
        let recorder =
            SessionRecorder::new(session, capabilities, RecorderConfig::from_app(&self.config));
        let recording = &self.config.recording;
        let checkpoints = CheckpointManager::new(
            1,
            recording.keep_checkpoints as usize,
            recording.durability_warning_after,
        );

        tracing::info!("Spawning session {}", recorder.session().id);
        let coordinator = SessionCoordinator::new(recorder, trainer, checkpoints);
        Ok(self.launch(coordinator, Outbox::default()))
    }

    /// Recover a session from storage and spawn its task.
    ///
    /// A session that was recording comes back paused.
    pub async fn recover(&self, session_id: Uuid) -> Result<SessionHandle, SessionError> {
        let db = Arc::clone(&self.db);
        let config = RecorderConfig::from_app(&self.config);
        let (recorder, next_sequence) = tokio::task::spawn_blocking(move || {
            let guard = db.lock().unwrap_or_else(PoisonError::into_inner);
            let (recorder, _) = recover_session(&*guard, &session_id, config)?;
            let latest = guard
                .load_latest_checkpoint(&session_id)?
                .map(|c| c.sequence)
                .unwrap_or(0);
            Ok::<_, SessionError>((recorder, latest + 1))
        })
        .await??;

        let trainer = self.trainer_for(recorder.aggregator().capabilities());
        let recording = &self.config.recording;
        let checkpoints = CheckpointManager::new(
            next_sequence,
            recording.keep_checkpoints as usize,
            recording.durability_warning_after,
        );
        let (coordinator, outbox) =
            SessionCoordinator::resume_recovered(recorder, trainer, checkpoints);
        Ok(self.launch(coordinator, outbox))
    }

    fn trainer_for(&self, capabilities: &CapabilityTimeline) -> TrainerControlEngine {
        let defaults = &self.config.defaults;
        let weight = capabilities
            .value_or_default(CapabilityKind::Weight, self.clock.now(), defaults)
            .unwrap_or(defaults.weight_kg);
        TrainerControlEngine::new(self.config.trainer.clone(), weight)
    }

    fn launch(&self, coordinator: SessionCoordinator, initial: Outbox) -> SessionHandle {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let (notice_tx, notice_rx) = crossbeam::channel::unbounded();
        let session_id = coordinator.session_id();

        let task = SessionTask {
            session_id,
            coordinator,
            db: Arc::clone(&self.db),
            channel: Arc::clone(&self.channel),
            clock: Arc::clone(&self.clock),
            notices: notice_tx,
            command_timeout: Duration::from_millis(self.config.trainer.command_timeout_ms),
            tick_lag: chrono::Duration::milliseconds(
                i64::try_from(self.config.recording.tick_lag_ms).unwrap_or(i64::MAX),
            ),
            commands: JoinSet::new(),
            writes: JoinSet::new(),
            pending: WriteBatch::new(session_id),
        };
        let ticker = self.tick_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let task = tokio::spawn(task.run(input_rx, ticker, initial));

        SessionHandle {
            session_id,
            input: input_tx,
            notices: notice_rx,
            clock: Arc::clone(&self.clock),
            task,
        }
    }
}

/// Storage work accumulated between writes.
#[derive(Debug, Clone)]
struct WriteBatch {
    session_id: Uuid,
    tail: Vec<TailEntry>,
    checkpoint: Option<StoredCheckpoint>,
    prune_keep: Option<usize>,
    summary: Option<SessionSummary>,
    clear_session: bool,
}

impl WriteBatch {
    fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            tail: Vec::new(),
            checkpoint: None,
            prune_keep: None,
            summary: None,
            clear_session: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.tail.is_empty()
            && self.checkpoint.is_none()
            && self.summary.is_none()
            && !self.clear_session
    }

    fn merge(&mut self, outbox: &mut Outbox) {
        self.tail.append(&mut outbox.tail);
        if let Some(checkpoint) = outbox.checkpoint.take() {
            self.checkpoint = Some(checkpoint);
        }
        if outbox.prune_keep.is_some() {
            self.prune_keep = outbox.prune_keep;
        }
        if let Some(summary) = outbox.summary.take() {
            self.summary = Some(summary);
        }
        self.clear_session |= outbox.clear_session;
    }
}

struct WriteReport {
    checkpoint: Option<Result<(), String>>,
    failed_tail: Vec<TailEntry>,
}

/// Perform one batch in order: journal, checkpoint, prune, summary, clear.
fn perform(db: &Mutex<Database>, batch: WriteBatch) -> WriteReport {
    let db = db.lock().unwrap_or_else(PoisonError::into_inner);
    let id = batch.session_id;
    let mut report = WriteReport {
        checkpoint: None,
        failed_tail: Vec::new(),
    };

    if !batch.tail.is_empty() {
        if let Err(e) = db.append_tail(&id, &batch.tail) {
            tracing::warn!("Journal write failed for {} entries: {}", batch.tail.len(), e);
            report.failed_tail = batch.tail;
        }
    }

    if let Some(checkpoint) = &batch.checkpoint {
        let result = db.persist_checkpoint(checkpoint).map_err(|e| e.to_string());
        if result.is_ok() {
            if let Some(keep) = batch.prune_keep {
                match db.prune_checkpoints(&id, keep) {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("Pruned {} checkpoints of session {}", n, id),
                    Err(e) => tracing::warn!("Checkpoint pruning failed: {}", e),
                }
            }
        }
        report.checkpoint = Some(result);
    }

    let mut summary_stored = true;
    if let Some(summary) = &batch.summary {
        if let Err(e) = db.append_session_record(summary) {
            tracing::error!("Failed to store summary of session {}: {}", id, e);
            summary_stored = false;
        }
    }

    if batch.clear_session && summary_stored {
        if let Err(e) = db.clear_checkpoints(&id).and_then(|()| db.clear_tail(&id)) {
            tracing::warn!("Failed to clear recovery data of session {}: {}", id, e);
        }
    }

    report
}

struct SessionTask<C: ControlChannel> {
    session_id: Uuid,
    coordinator: SessionCoordinator,
    db: Arc<Mutex<Database>>,
    channel: Arc<C>,
    clock: Arc<dyn Clock>,
    notices: crossbeam::channel::Sender<SessionNotice>,
    command_timeout: Duration,
    tick_lag: chrono::Duration,
    commands: JoinSet<(u64, CommandResponse)>,
    writes: JoinSet<WriteReport>,
    pending: WriteBatch,
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl<C: ControlChannel> SessionTask<C> {
    async fn run(
        mut self,
        mut input: mpsc::Receiver<SessionInput>,
        mut ticker: Option<Interval>,
        initial: Outbox,
    ) {
        self.dispatch(initial);

        loop {
            tokio::select! {
                message = input.recv() => match message {
                    Some(message) => {
                        if self.on_input(message).await {
                            break;
                        }
                    }
                    None => {
                        tracing::info!("All handles of session {} dropped", self.session_id);
                        self.flush().await;
                        break;
                    }
                },
                _ = next_tick(&mut ticker) => self.on_timer(),
                Some(done) = self.commands.join_next(), if !self.commands.is_empty() => {
                    self.on_command_done(done);
                }
                Some(done) = self.writes.join_next(), if !self.writes.is_empty() => {
                    self.on_written(done, true);
                }
            }
        }

        input.close();
        self.drain_commands().await;
        self.commands.abort_all();
        self.writes.abort_all();
        tracing::info!("Session task {} stopped", self.session_id);
    }

    /// Returns true when the session closed.
    async fn on_input(&mut self, message: SessionInput) -> bool {
        match message {
            SessionInput::Reading(reading) => {
                match self.coordinator.handle(RecorderEvent::Reading(reading)) {
                    Ok(outbox) => self.dispatch(outbox),
                    Err(e) => tracing::trace!("Reading ignored: {}", e),
                }
                false
            }
            SessionInput::Event { event, reply } => {
                let result = self.coordinator.handle(event).map(|outbox| self.dispatch(outbox));
                let _ = reply.send(result);
                false
            }
            SessionInput::Close { event, reply } => match self.coordinator.handle(event) {
                Ok(outbox) => {
                    let summary = outbox.summary.clone();
                    self.dispatch(outbox);
                    self.flush().await;
                    let _ = reply.send(Ok(summary));
                    true
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    false
                }
            },
            SessionInput::Trainer(input) => {
                let outbox = match input {
                    TrainerInput::ManualPower(watts) => self.coordinator.set_manual_power(watts),
                    TrainerInput::ManualResistance(level) => {
                        self.coordinator.set_manual_resistance(level)
                    }
                    TrainerInput::ManualGrade(grade) => self.coordinator.set_manual_grade(grade),
                    TrainerInput::EnableAuto => self.coordinator.enable_auto(),
                    TrainerInput::Route(route) => self.coordinator.set_route(route),
                    TrainerInput::Connected(class) => self.coordinator.trainer_connected(class),
                    TrainerInput::Disconnected => {
                        self.coordinator.trainer_disconnected();
                        Outbox::default()
                    }
                    TrainerInput::Status(status) => {
                        self.coordinator.machine_status(status);
                        Outbox::default()
                    }
                };
                self.dispatch(outbox);
                false
            }
        }
    }

    fn on_command_done(&mut self, done: Result<(u64, CommandResponse), JoinError>) {
        match done {
            Ok((id, response)) => {
                let outbox = self.coordinator.command_response(id, &response);
                self.dispatch(outbox);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::error!("Trainer command task failed: {}", e),
        }
    }

    /// Let commands still in flight, such as the final stop, finish within
    /// one command timeout.
    async fn drain_commands(&mut self) {
        let timeout = self.command_timeout;
        let drained = tokio::time::timeout(timeout, async {
            while let Some(done) = self.commands.join_next().await {
                self.on_command_done(done);
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                "{} trainer commands of session {} still pending at shutdown",
                self.commands.len(),
                self.session_id
            );
        }
    }

    fn on_timer(&mut self) {
        if !self.coordinator.recorder().status().is_active() {
            return;
        }
        let now = self.clock.now() - self.tick_lag;
        match self.coordinator.handle(RecorderEvent::Tick { now }) {
            Ok(outbox) => self.dispatch(outbox),
            Err(e) => tracing::debug!("Tick ignored: {}", e),
        }
    }

    fn dispatch(&mut self, mut outbox: Outbox) {
        for notice in outbox.notices.drain(..) {
            let _ = self.notices.send(notice);
        }
        for command in outbox.commands.drain(..) {
            self.send_command(command);
        }
        self.pending.merge(&mut outbox);
        self.start_write();
    }

    fn send_command(&mut self, command: EncodedCommand) {
        let channel = Arc::clone(&self.channel);
        let timeout = self.command_timeout;
        self.commands.spawn(async move {
            let id = command.id;
            let response = tokio::time::timeout(timeout, channel.send(command))
                .await
                .unwrap_or(CommandResponse::Timeout);
            (id, response)
        });
    }

    /// Start a write if none is in flight.
    fn start_write(&mut self) {
        if !self.writes.is_empty() || self.pending.is_empty() {
            return;
        }
        let batch = std::mem::replace(&mut self.pending, WriteBatch::new(self.session_id));
        let db = Arc::clone(&self.db);
        self.writes.spawn_blocking(move || perform(&db, batch));
    }

    fn on_written(&mut self, done: Result<WriteReport, JoinError>, retry: bool) {
        match done {
            Ok(report) => {
                if let Some(result) = report.checkpoint {
                    if let Some(notice) = self.coordinator.checkpoint_written(result) {
                        let _ = self.notices.send(notice);
                    }
                }
                if retry && !report.failed_tail.is_empty() {
                    let mut tail = report.failed_tail;
                    tail.append(&mut self.pending.tail);
                    self.pending.tail = tail;
                }
            }
            Err(e) => tracing::error!("Storage task failed: {}", e),
        }
        if retry {
            self.start_write();
        }
    }

    /// Wait for every pending write.
    async fn flush(&mut self) {
        while let Some(done) = self.writes.join_next().await {
            self.on_written(done, false);
        }
        if !self.pending.is_empty() {
            self.start_write();
            while let Some(done) = self.writes.join_next().await {
                self.on_written(done, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::types::{Environment, SessionCategory, SessionStatus};
    use crate::sensors::types::MetricKind;
    use crate::trainer::LoopbackChannel;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn runtime() -> (SessionRuntime<LoopbackChannel>, Arc<Mutex<Database>>) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let runtime = SessionRuntime::new(AppConfig::default(), Arc::clone(&db), Arc::new(LoopbackChannel::new()))
            .with_clock(ManualClock::new(at(0)))
            .with_tick_interval(None);
        (runtime, db)
    }

    #[tokio::test]
    async fn test_finish_stores_summary_and_clears_recovery_data() {
        let (runtime, db) = runtime();
        let session = Session::new(Uuid::new_v4(), SessionCategory::Ride, Environment::Indoor);
        let id = session.id;
        let handle = runtime.spawn(session).await.unwrap();

        handle.start_at(at(0)).await.unwrap();
        let submitter = handle.submitter();
        for s in 0..10 {
            submitter
                .submit(Reading::scalar(MetricKind::Power, 200.0, at(s), "pm"))
                .await
                .unwrap();
        }
        let notices = handle.notices();
        let summary = handle.finish_at(at(10)).await.unwrap();

        assert_eq!(summary.moving_secs, 10);
        assert!(notices
            .try_iter()
            .any(|n| n == SessionNotice::StatusChanged(SessionStatus::Finished)));

        let db = db.lock().unwrap();
        assert!(db.session_record(&id).unwrap().is_some());
        assert!(db.load_checkpoints(&id).unwrap().is_empty());
        assert!(db.tail_after(&id, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refused_command_reports_error() {
        let (runtime, _db) = runtime();
        let session = Session::new(Uuid::new_v4(), SessionCategory::Ride, Environment::Indoor);
        let handle = runtime.spawn(session).await.unwrap();

        assert!(matches!(
            handle.pause_at(at(0)).await,
            Err(SessionError::Recorder(RecorderError::NotStarted))
        ));
        handle.discard_at(at(1)).await.unwrap();
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(at(0));
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now(), at(5));
        clock.set(at(1));
        assert_eq!(clock.now(), at(1));
    }
}

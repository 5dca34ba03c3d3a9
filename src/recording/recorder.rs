//! Session recorder.
//!
//! [`SessionRecorder`] owns everything a session mutates while recording:
//! the [`Session`] itself, the logical clock, the normalizer, the aggregator,
//! the live metrics engine and an optional plan executor. It does no I/O.
//! Each [`RecorderEvent`] moves it to a new state and yields
//! [`RecorderEffect`]s for the owning loop to carry out.
//!
//! Ticks fire at `started_at + k` seconds. Before a reading is ingested every
//! tick at or before its timestamp runs first. Every event that changes state
//! after start is journaled as it was received: readings whether accepted,
//! rejected or dropped while paused, ticks that move the clock, pause and
//! resume, and plan changes. Replaying the journal after a checkpoint through
//! [`SessionRecorder::handle`] therefore reproduces the live state exactly.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::aggregator::{AggregatorState, IngestOutcome, RollingAggregator};
use crate::metrics::analytics::training_load::{apply_score, score_session};
use crate::metrics::calculator::{LiveMetricsEngine, LiveMetricsSnapshot, LiveMetricsState};
use crate::metrics::capability::{CapabilityKind, CapabilityTimeline};
use crate::recording::types::{
    Environment, RecorderError, Session, SessionNotice, SessionStatus, SessionSummary,
};
use crate::sensors::normalizer::{NormalizerState, ReadingNormalizer};
use crate::sensors::types::{MetricKind, Reading};
use crate::storage::config::{AppConfig, CapabilityDefaults, NormalizerSettings, RecordingSettings};
use crate::storage::TailEntry;
use crate::trainer::engine::Motion;
use crate::workouts::engine::{PlanEvent, PlanExecutor, PlanExecutorState, PlanProgress};
use crate::workouts::types::{PlanError, Thresholds, WorkoutPlan};

/// Settings the recorder needs from the application configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecorderConfig {
    /// Reading validation and aggregation settings
    pub sensors: NormalizerSettings,
    /// Checkpoint cadence
    pub recording: RecordingSettings,
    /// Fallback capability values
    pub defaults: CapabilityDefaults,
}

impl RecorderConfig {
    /// Extract recorder settings from the application configuration.
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            sensors: config.sensors.clone(),
            recording: config.recording.clone(),
            defaults: config.defaults.clone(),
        }
    }
}

/// The logical session clock.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClockState {
    /// Time of tick zero
    pub started_at: Option<DateTime<Utc>>,
    /// Ticks processed so far
    pub ticks: u64,
}

impl ClockState {
    /// Time of the last processed tick.
    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.started_at.map(|start| start + tick_offset(self.ticks))
    }

    fn next_tick(&self) -> Option<DateTime<Utc>> {
        self.started_at.map(|start| start + tick_offset(self.ticks + 1))
    }
}

fn tick_offset(ticks: u64) -> Duration {
    Duration::seconds(i64::try_from(ticks).unwrap_or(i64::MAX))
}

/// Everything needed to rebuild a recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderState {
    /// The session aggregate
    pub session: Session,
    /// Logical clock
    pub clock: ClockState,
    /// Normalizer cursors, watermark and counters
    pub normalizer: NormalizerState,
    /// Rolling aggregates
    pub aggregator: AggregatorState,
    /// Smoothing buffer and running Normalized Power
    pub live: LiveMetricsState,
    /// Attached plan, if any
    pub plan: Option<PlanExecutorState>,
    /// Number of events journaled
    pub journal_position: u64,
    /// Elapsed seconds at the last checkpoint request
    pub last_checkpoint_secs: u64,
}

/// Inputs to the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderEvent {
    /// Begin recording
    Start { at: DateTime<Utc> },
    /// A reading from any producer
    Reading(Reading),
    /// Advance the clock to `now`
    Tick { now: DateTime<Utc> },
    /// Pause recording
    Pause { at: DateTime<Utc> },
    /// Resume recording
    Resume { at: DateTime<Utc> },
    /// Attach a plan, replacing any attached one
    AttachPlan { plan: WorkoutPlan, at: DateTime<Utc> },
    /// Detach the plan without pausing
    DetachPlan { at: DateTime<Utc> },
    /// Complete the active open-ended step
    AdvanceStep { at: DateTime<Utc> },
    /// Finish and produce the summary
    Finish { at: DateTime<Utc> },
    /// Throw the session away
    Discard { at: DateTime<Utc> },
}

/// Why a checkpoint was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    Interval,
    Started,
    Paused,
    Resumed,
    PlanAttached,
    PlanDetached,
    StepAdvanced,
    Recovered,
}

impl RecorderEvent {
    /// Whether the event is kept in the tail journal once applied.
    ///
    /// Start is covered by the first checkpoint; finish and discard close
    /// the session and drop its journal.
    fn is_journaled(&self) -> bool {
        !matches!(
            self,
            RecorderEvent::Start { .. } | RecorderEvent::Finish { .. } | RecorderEvent::Discard { .. }
        )
    }
}

impl CheckpointReason {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointReason::Interval => "interval",
            CheckpointReason::Started => "started",
            CheckpointReason::Paused => "paused",
            CheckpointReason::Resumed => "resumed",
            CheckpointReason::PlanAttached => "plan_attached",
            CheckpointReason::PlanDetached => "plan_detached",
            CheckpointReason::StepAdvanced => "step_advanced",
            CheckpointReason::Recovered => "recovered",
        }
    }
}

/// Work the owning loop performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEffect {
    /// Append an applied event to the tail journal
    Journal(TailEntry),
    /// Serialize the state and persist it
    Checkpoint(CheckpointReason),
    /// The plan changed step or finished
    Plan(PlanEvent),
    /// The plan was detached
    PlanDetached,
    /// One second of recording passed; trainer grade may need updating
    TrainerTick(Motion),
    /// The session status changed
    StatusChanged(SessionStatus),
    /// Report to the UI
    Notice(SessionNotice),
    /// The session finished; store the summary
    Completed(Box<SessionSummary>),
    /// The session was discarded
    Discarded,
}

/// Pure session state machine.
pub struct SessionRecorder {
    config: RecorderConfig,
    session: Session,
    clock: ClockState,
    normalizer: ReadingNormalizer,
    aggregator: RollingAggregator,
    live: LiveMetricsEngine,
    plan: Option<PlanExecutor>,
    journal_position: u64,
    last_checkpoint_secs: u64,
    latest: Option<LiveMetricsSnapshot>,
}

impl SessionRecorder {
    /// Create a recorder for an idle session.
    pub fn new(session: Session, capabilities: CapabilityTimeline, config: RecorderConfig) -> Self {
        let aggregator = RollingAggregator::new(
            config.sensors.clone(),
            config.defaults.clone(),
            capabilities,
            session.environment == Environment::Indoor,
        );
        Self {
            normalizer: ReadingNormalizer::new(config.sensors.clone()),
            aggregator,
            live: LiveMetricsEngine::new(),
            plan: None,
            clock: ClockState::default(),
            journal_position: 0,
            last_checkpoint_secs: 0,
            latest: None,
            session,
            config,
        }
    }

    /// Rebuild a recorder from saved state.
    pub fn from_state(state: RecorderState, config: RecorderConfig) -> Self {
        Self {
            normalizer: ReadingNormalizer::from_state(config.sensors.clone(), state.normalizer),
            aggregator: RollingAggregator::from_state(
                config.sensors.clone(),
                config.defaults.clone(),
                state.aggregator,
            ),
            live: LiveMetricsEngine::from_state(state.live),
            plan: state.plan.map(PlanExecutor::from_state),
            clock: state.clock,
            journal_position: state.journal_position,
            last_checkpoint_secs: state.last_checkpoint_secs,
            latest: None,
            session: state.session,
            config,
        }
    }

    /// Snapshot of the full state.
    pub fn state(&self) -> RecorderState {
        RecorderState {
            session: self.session.clone(),
            clock: self.clock,
            normalizer: self.normalizer.state().clone(),
            aggregator: self.aggregator.state().clone(),
            live: self.live.state().clone(),
            plan: self.plan.as_ref().map(|p| p.state().clone()),
            journal_position: self.journal_position,
            last_checkpoint_secs: self.last_checkpoint_secs,
        }
    }

    /// The session aggregate.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    /// Time of the last processed tick.
    pub fn clock_time(&self) -> Option<DateTime<Utc>> {
        self.clock.now()
    }

    /// Events journaled so far.
    pub fn journal_position(&self) -> u64 {
        self.journal_position
    }

    /// Live metrics as of the last recording tick.
    pub fn latest_metrics(&self) -> Option<&LiveMetricsSnapshot> {
        self.latest.as_ref()
    }

    /// The aggregator.
    pub fn aggregator(&self) -> &RollingAggregator {
        &self.aggregator
    }

    /// The attached plan executor.
    pub fn plan(&self) -> Option<&PlanExecutor> {
        self.plan.as_ref()
    }

    /// The normalizer.
    pub fn normalizer(&self) -> &ReadingNormalizer {
        &self.normalizer
    }

    /// Configuration in use.
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Plan progress of the session so far.
    pub fn progress(&self) -> PlanProgress {
        PlanProgress {
            moving_secs: self.session.moving_secs,
            distance_m: self.aggregator.distance_m(),
        }
    }

    /// Thresholds valid at `at`, used to resolve plan targets.
    pub fn thresholds_at(&self, at: DateTime<Utc>) -> Thresholds {
        let capabilities = self.aggregator.capabilities();
        let defaults = self.aggregator.defaults();
        Thresholds {
            power: capabilities.value_or_default(CapabilityKind::ThresholdPower, at, defaults),
            heart_rate: capabilities.value_or_default(
                CapabilityKind::ThresholdHeartRate,
                at,
                defaults,
            ),
        }
    }

    /// Apply one event.
    pub fn handle(&mut self, event: RecorderEvent) -> Result<Vec<RecorderEffect>, RecorderError> {
        if self.session.status.is_closed() {
            return Err(RecorderError::SessionClosed);
        }

        let mut effects = Vec::new();
        let ticks_before = self.clock.ticks;
        let entry = event.is_journaled().then(|| event.clone());
        match event {
            RecorderEvent::Start { at } => self.start(at, &mut effects)?,
            RecorderEvent::Reading(reading) => self.ingest(reading, &mut effects)?,
            RecorderEvent::Tick { now } => {
                if self.session.status.is_active() {
                    self.advance_to(now, &mut effects);
                }
            }
            RecorderEvent::Pause { at } => {
                self.require(SessionStatus::Recording, RecorderError::NotRecording)?;
                self.advance_to(at, &mut effects);
                self.set_status(SessionStatus::Paused, &mut effects);
                self.request_checkpoint(CheckpointReason::Paused, &mut effects);
            }
            RecorderEvent::Resume { at } => {
                self.require(SessionStatus::Paused, RecorderError::NotPaused)?;
                self.advance_to(at, &mut effects);
                self.set_status(SessionStatus::Recording, &mut effects);
                self.request_checkpoint(CheckpointReason::Resumed, &mut effects);
            }
            RecorderEvent::AttachPlan { plan, at } => {
                self.require_active()?;
                self.or_restore(&mut effects, |r, effects| r.attach_plan(plan, at, effects))?;
            }
            RecorderEvent::DetachPlan { at } => {
                self.require_active()?;
                self.advance_to(at, &mut effects);
                if self.plan.take().is_some() {
                    tracing::info!("Plan detached from session {}", self.session.id);
                    effects.push(RecorderEffect::PlanDetached);
                    self.request_checkpoint(CheckpointReason::PlanDetached, &mut effects);
                }
            }
            RecorderEvent::AdvanceStep { at } => {
                self.require_active()?;
                self.or_restore(&mut effects, |r, effects| r.advance_step(at, effects))?;
            }
            RecorderEvent::Finish { at } => self.finish(at, &mut effects)?,
            RecorderEvent::Discard { at } => {
                if self.session.status.is_active() {
                    self.advance_to(at, &mut effects);
                }
                self.session.ended_at = Some(at);
                self.plan = None;
                self.set_status(SessionStatus::Discarded, &mut effects);
                effects.push(RecorderEffect::Discarded);
            }
        }

        if let Some(event) = entry {
            // A tick that runs no tick changes nothing
            let idle_tick =
                matches!(event, RecorderEvent::Tick { .. }) && self.clock.ticks == ticks_before;
            if !idle_tick {
                self.journal_position += 1;
                effects.push(RecorderEffect::Journal(TailEntry {
                    position: self.journal_position,
                    event,
                }));
            }
        }
        Ok(effects)
    }

    /// Replay a journaled event. Effects other than state changes are dropped.
    pub fn replay(&mut self, entry: &TailEntry) -> Result<(), RecorderError> {
        let expected = self.journal_position + 1;
        self.handle(entry.event.clone())?;
        if self.journal_position != expected || entry.position != expected {
            tracing::warn!(
                "Replayed journal entry {} landed at position {}",
                entry.position,
                self.journal_position
            );
        }
        Ok(())
    }

    fn require(&self, status: SessionStatus, err: RecorderError) -> Result<(), RecorderError> {
        if self.session.status == SessionStatus::Idle {
            return Err(RecorderError::NotStarted);
        }
        if self.session.status != status {
            return Err(err);
        }
        Ok(())
    }

    /// Run `apply`, putting the previous state back if it fails.
    ///
    /// Used for commands that can only be refused after the clock has been
    /// brought up to date, so a refused command leaves no trace.
    fn or_restore<F>(&mut self, effects: &mut Vec<RecorderEffect>, apply: F) -> Result<(), RecorderError>
    where
        F: FnOnce(&mut Self, &mut Vec<RecorderEffect>) -> Result<(), RecorderError>,
    {
        let saved = self.state();
        let latest = self.latest.clone();
        if let Err(err) = apply(self, effects) {
            *self = Self::from_state(saved, self.config.clone());
            self.latest = latest;
            return Err(err);
        }
        Ok(())
    }

    fn require_active(&self) -> Result<(), RecorderError> {
        if self.session.status.is_active() {
            Ok(())
        } else {
            Err(RecorderError::NotStarted)
        }
    }

    fn start(&mut self, at: DateTime<Utc>, effects: &mut Vec<RecorderEffect>) -> Result<(), RecorderError> {
        if self.session.status != SessionStatus::Idle {
            return Err(RecorderError::AlreadyStarted);
        }
        self.session.started_at = Some(at);
        self.clock = ClockState {
            started_at: Some(at),
            ticks: 0,
        };
        self.normalizer.advance_watermark(at);
        tracing::info!("Started session {} at {}", self.session.id, at);
        self.set_status(SessionStatus::Recording, effects);
        self.request_checkpoint(CheckpointReason::Started, effects);
        Ok(())
    }

    fn ingest(&mut self, reading: Reading, effects: &mut Vec<RecorderEffect>) -> Result<(), RecorderError> {
        self.require_active()?;
        self.advance_to(reading.captured_at, effects);

        if self.session.status == SessionStatus::Paused {
            self.normalizer.count_paused_drop();
            return Ok(());
        }

        let reading = match self.normalizer.normalize(reading) {
            Ok(reading) => reading,
            Err(err) => {
                effects.push(RecorderEffect::Notice(SessionNotice::ReadingRejected {
                    kind: err.kind,
                    reason: err.reason,
                }));
                return Ok(());
            }
        };

        if let IngestOutcome::PositionDiscarded { implied_speed } = self.aggregator.ingest(&reading) {
            tracing::warn!("Discarded position fix implying {:.1} m/s", implied_speed);
            effects.push(RecorderEffect::Notice(SessionNotice::PositionDiscontinuity {
                implied_speed_mps: implied_speed,
            }));
        }
        Ok(())
    }

    fn advance_step(&mut self, at: DateTime<Utc>, effects: &mut Vec<RecorderEffect>) -> Result<(), RecorderError> {
        self.advance_to(at, effects);
        let thresholds = self.thresholds_at(at);
        let progress = self.progress();
        let plan = self.plan.as_mut().ok_or(PlanError::NoPlan)?;
        let event = plan.advance(progress, &thresholds)?;
        push_plan_event(event, effects);
        self.request_checkpoint(CheckpointReason::StepAdvanced, effects);
        Ok(())
    }

    fn attach_plan(
        &mut self,
        plan: WorkoutPlan,
        at: DateTime<Utc>,
        effects: &mut Vec<RecorderEffect>,
    ) -> Result<(), RecorderError> {
        self.advance_to(at, effects);
        let (executor, event) = PlanExecutor::attach(plan, self.progress(), &self.thresholds_at(at))?;
        if self.plan.replace(executor).is_some() {
            effects.push(RecorderEffect::PlanDetached);
        }
        push_plan_event(event, effects);
        self.request_checkpoint(CheckpointReason::PlanAttached, effects);
        Ok(())
    }

    fn finish(&mut self, at: DateTime<Utc>, effects: &mut Vec<RecorderEffect>) -> Result<(), RecorderError> {
        self.require_active()?;
        self.advance_to(at, effects);
        self.session.ended_at = Some(at);
        self.plan = None;
        self.set_status(SessionStatus::Finished, effects);

        let summary = self.summary();
        tracing::info!(
            "Finished session {}: {} s moving, {:.0} m, score {:?}",
            self.session.id,
            summary.moving_secs,
            summary.distance_m,
            summary.stress_score
        );
        effects.push(RecorderEffect::Completed(Box::new(summary)));
        Ok(())
    }

    /// Summary of the session so far, scored against the capabilities valid
    /// at its start.
    pub fn summary(&self) -> SessionSummary {
        let started_at = self.session.started_at.unwrap_or_else(Utc::now);
        let metric = |kind| self.aggregator.metric(kind);
        let zone_secs = |kind| {
            metric(kind)
                .and_then(|m| m.zones.as_ref())
                .map(|z| z.seconds().to_vec())
                .unwrap_or_default()
        };

        let mut summary = SessionSummary {
            session_id: self.session.id,
            profile_id: self.session.profile_id,
            category: self.session.category,
            environment: self.session.environment,
            started_at,
            ended_at: self.session.ended_at.or(self.clock.now()).unwrap_or(started_at),
            elapsed_secs: self.session.elapsed_secs,
            moving_secs: self.session.moving_secs,
            distance_m: self.aggregator.distance_m(),
            ascent_m: self.aggregator.ascent_m(),
            avg_power: metric(MetricKind::Power).and_then(|m| m.average()),
            max_power: metric(MetricKind::Power).and_then(|m| m.max),
            normalized_power: self.live.normalized_power(),
            avg_heart_rate: metric(MetricKind::HeartRate).and_then(|m| m.average()),
            max_heart_rate: metric(MetricKind::HeartRate).and_then(|m| m.max),
            avg_cadence: metric(MetricKind::Cadence).and_then(|m| m.average()),
            energy_kj: self.live.energy_kj(),
            power_zone_secs: zone_secs(MetricKind::Power),
            heart_rate_zone_secs: zone_secs(MetricKind::HeartRate),
            stress_score: None,
            scored_with: None,
            score_basis: None,
        };
        let score = score_session(
            &summary,
            self.aggregator.capabilities(),
            self.aggregator.defaults(),
        );
        apply_score(&mut summary, score);
        summary
    }

    fn set_status(&mut self, status: SessionStatus, effects: &mut Vec<RecorderEffect>) {
        tracing::info!(
            "Session {}: {} -> {}",
            self.session.id,
            self.session.status,
            status
        );
        self.session.status = status;
        effects.push(RecorderEffect::StatusChanged(status));
        effects.push(RecorderEffect::Notice(SessionNotice::StatusChanged(status)));
    }

    fn request_checkpoint(&mut self, reason: CheckpointReason, effects: &mut Vec<RecorderEffect>) {
        self.last_checkpoint_secs = self.session.elapsed_secs;
        effects.push(RecorderEffect::Checkpoint(reason));
    }

    /// Run every tick due at or before `until`.
    fn advance_to(&mut self, until: DateTime<Utc>, effects: &mut Vec<RecorderEffect>) {
        while let Some(next) = self.clock.next_tick() {
            if next > until {
                break;
            }
            self.run_tick(next, effects);
        }
    }

    fn run_tick(&mut self, at: DateTime<Utc>, effects: &mut Vec<RecorderEffect>) {
        self.clock.ticks += 1;
        self.session.elapsed_secs += 1;
        self.normalizer.advance_watermark(at);

        if self.session.status != SessionStatus::Recording {
            return;
        }
        self.session.moving_secs += 1;

        let was_available: Vec<(MetricKind, bool)> = self
            .aggregator
            .state()
            .metrics
            .iter()
            .map(|(kind, m)| (*kind, m.available))
            .collect();
        let timed_out = self.aggregator.tick(at);
        for kind in timed_out {
            tracing::warn!("{} sensor timed out", kind);
            effects.push(RecorderEffect::Notice(SessionNotice::SensorTimeout(kind)));
        }
        for (kind, before) in was_available {
            let now_available = self.aggregator.metric(kind).is_some_and(|m| m.available);
            if !before && now_available {
                effects.push(RecorderEffect::Notice(SessionNotice::SensorAvailable(kind)));
            }
        }

        self.live.tick(&self.aggregator);

        if let Some(plan) = self.plan.as_mut() {
            let progress = PlanProgress {
                moving_secs: self.session.moving_secs,
                distance_m: self.aggregator.distance_m(),
            };
            let capabilities = self.aggregator.capabilities();
            let defaults = self.aggregator.defaults();
            let thresholds = Thresholds {
                power: capabilities.value_or_default(CapabilityKind::ThresholdPower, at, defaults),
                heart_rate: capabilities.value_or_default(
                    CapabilityKind::ThresholdHeartRate,
                    at,
                    defaults,
                ),
            };
            if let Some(event) = plan.tick(progress, &thresholds) {
                push_plan_event(event, effects);
            }
        }

        effects.push(RecorderEffect::TrainerTick(Motion {
            speed_mps: self
                .aggregator
                .current_if_available(MetricKind::Speed)
                .unwrap_or(0.0),
            distance_m: self.aggregator.distance_m(),
        }));

        let snapshot = self.live.snapshot(
            at,
            self.session.elapsed_secs,
            self.session.moving_secs,
            &mut self.aggregator,
        );
        effects.push(RecorderEffect::Notice(SessionNotice::Metrics(Box::new(
            snapshot.clone(),
        ))));
        self.latest = Some(snapshot);

        let interval = u64::from(self.config.recording.checkpoint_interval_secs);
        if interval > 0 && self.session.elapsed_secs - self.last_checkpoint_secs >= interval {
            self.request_checkpoint(CheckpointReason::Interval, effects);
        }
    }
}

fn push_plan_event(event: PlanEvent, effects: &mut Vec<RecorderEffect>) {
    effects.push(RecorderEffect::Notice(SessionNotice::Plan(event.clone())));
    effects.push(RecorderEffect::Plan(event));
}

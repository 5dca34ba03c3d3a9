//! Training Load calculations (CTL/ATL/TSB) and session scoring.
//!
//! Implements the Performance Management Chart (PMC) model:
//! - ATL (Acute Training Load): 7-day exponentially weighted moving average
//! - CTL (Chronic Training Load): 42-day exponentially weighted moving average
//! - TSB (Training Stress Balance): CTL - ATL
//!
//! Every finished session is scored once against the capability record valid
//! at its start and the score is stored. A new capability record re-scores the
//! sessions it governs in cancellable, resumable chunks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{AnalyticsError, AnalyticsResult};
use super::progression::Progression;
use crate::metrics::calculator::stress_score;
use crate::metrics::capability::{CapabilityKind, CapabilityRecord, CapabilityTimeline};
use crate::recording::types::{ScoreBasis, SessionSummary};
use crate::storage::config::{CapabilityDefaults, TrainingLoadSettings};
use crate::storage::{MetricLogStore, SessionCursor, SessionQuery, SessionStore};

/// Relative CTL change over a week that counts as a trend.
const TREND_THRESHOLD: f64 = 0.05;

/// Days over which the CTL trend is measured.
const TREND_WINDOW_DAYS: i64 = 7;

/// Daily training load values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyLoad {
    /// Calendar day (UTC)
    pub date: NaiveDate,
    /// Summed stress score of the day's sessions
    pub stress: f64,
    /// Acute Training Load (7-day EWMA)
    pub atl: f64,
    /// Chronic Training Load (42-day EWMA)
    pub ctl: f64,
    /// Training Stress Balance (CTL - ATL)
    pub tsb: f64,
}

/// Direction of fitness over the last week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// Training load on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLoad {
    /// Day the values apply to
    pub as_of: NaiveDate,
    /// Chronic Training Load
    pub ctl: f64,
    /// Acute Training Load
    pub atl: f64,
    /// Training Stress Balance
    pub tsb: f64,
    /// CTL direction over the last week
    pub trend: LoadTrend,
    /// CTL change over the last week
    pub ramp_rate: f64,
}

/// Training load calculator.
#[derive(Debug, Clone)]
pub struct TrainingLoadCalculator {
    /// ATL decay constant (default: 7 days)
    atl_days: f64,
    /// CTL decay constant (default: 42 days)
    ctl_days: f64,
}

impl TrainingLoadCalculator {
    /// Create with default constants (7/42 day).
    pub fn new() -> Self {
        Self {
            atl_days: 7.0,
            ctl_days: 42.0,
        }
    }

    /// Create with custom decay constants.
    pub fn with_constants(atl_days: f64, ctl_days: f64) -> Self {
        Self { atl_days, ctl_days }
    }

    /// Create from configuration.
    pub fn from_settings(settings: &TrainingLoadSettings) -> Self {
        Self::with_constants(settings.atl_days, settings.ctl_days)
    }

    /// Calculate training load for a day given the previous day's values.
    pub fn calculate_day(&self, prev: Option<&DailyLoad>, date: NaiveDate, stress: f64) -> DailyLoad {
        // EWMA: new = old × (1 - k) + value × k, with k = 2 / (N + 1)
        let atl_k = 2.0 / (self.atl_days + 1.0);
        let ctl_k = 2.0 / (self.ctl_days + 1.0);
        let (prev_atl, prev_ctl) = prev.map_or((0.0, 0.0), |p| (p.atl, p.ctl));

        let atl = prev_atl * (1.0 - atl_k) + stress * atl_k;
        let ctl = prev_ctl * (1.0 - ctl_k) + stress * ctl_k;

        DailyLoad {
            date,
            stress,
            atl,
            ctl,
            tsb: ctl - atl,
        }
    }

    /// Calculate one value per calendar day from `start` through `end`.
    ///
    /// Days without an entry in `daily_stress` are rest days.
    pub fn calculate_history(
        &self,
        daily_stress: &BTreeMap<NaiveDate, f64>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<DailyLoad> {
        let mut history: Vec<DailyLoad> = Vec::new();
        for date in start.iter_days().take_while(|d| *d <= end) {
            let stress = daily_stress.get(&date).copied().unwrap_or(0.0);
            let load = self.calculate_day(history.last(), date, stress);
            history.push(load);
        }
        history
    }
}

impl Default for TrainingLoadCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Trend between two CTL values.
pub fn load_trend(start: f64, end: f64) -> LoadTrend {
    let change = (end - start) / start.abs().max(1.0);
    if change > TREND_THRESHOLD {
        LoadTrend::Increasing
    } else if change < -TREND_THRESHOLD {
        LoadTrend::Decreasing
    } else {
        LoadTrend::Stable
    }
}

/// A computed session score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionScore {
    /// Stress score
    pub stress_score: f64,
    /// Threshold the score was computed with
    pub scored_with: f64,
    /// Which threshold was used
    pub basis: ScoreBasis,
}

/// Score a session against the capabilities valid at its start.
///
/// Power-based when the session has normalized power; heart-rate based
/// (`hours × (avg HR / threshold HR)² × 100`) otherwise. `None` when neither
/// is available.
pub fn score_session(
    summary: &SessionSummary,
    timeline: &CapabilityTimeline,
    defaults: &CapabilityDefaults,
) -> Option<SessionScore> {
    let at = summary.started_at;

    if let Some(np) = summary.normalized_power.filter(|np| *np > 0.0) {
        let ftp = timeline
            .value_or_default(CapabilityKind::ThresholdPower, at, defaults)
            .filter(|v| *v > 0.0)?;
        return Some(SessionScore {
            stress_score: stress_score(summary.moving_secs, np / ftp),
            scored_with: ftp,
            basis: ScoreBasis::Power,
        });
    }

    let avg_hr = summary.avg_heart_rate.filter(|hr| *hr > 0.0)?;
    let lthr = timeline
        .value_or_default(CapabilityKind::ThresholdHeartRate, at, defaults)
        .filter(|v| *v > 0.0)?;
    Some(SessionScore {
        stress_score: stress_score(summary.moving_secs, avg_hr / lthr),
        scored_with: lthr,
        basis: ScoreBasis::HeartRate,
    })
}

/// Outcome of a re-scoring batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RescoreReport {
    /// Record that triggered the batch
    pub record_id: Uuid,
    /// Sessions examined in this run
    pub examined: usize,
    /// Sessions whose stored score changed
    pub rescored: Vec<Uuid>,
    /// Last processed session; resume from here
    pub cursor: Option<SessionCursor>,
    /// Whether every affected session was processed
    pub completed: bool,
}

/// Training-load engine over stored sessions and capability records.
pub struct TrainingLoadEngine<'a, S> {
    store: &'a S,
    settings: TrainingLoadSettings,
    defaults: CapabilityDefaults,
    calculator: TrainingLoadCalculator,
}

impl<'a, S> TrainingLoadEngine<'a, S>
where
    S: SessionStore + MetricLogStore,
{
    /// Create an engine over `store`.
    pub fn new(store: &'a S, settings: TrainingLoadSettings, defaults: CapabilityDefaults) -> Self {
        let calculator = TrainingLoadCalculator::from_settings(&settings);
        Self {
            store,
            settings,
            defaults,
            calculator,
        }
    }

    /// Capability timeline of a profile.
    pub fn timeline(&self, profile_id: &Uuid) -> AnalyticsResult<CapabilityTimeline> {
        Ok(CapabilityTimeline::new(
            self.store.capability_records(profile_id)?,
        ))
    }

    /// Daily loads from the first stored session through `as_of`.
    pub fn daily_loads(
        &self,
        profile_id: &Uuid,
        as_of: DateTime<Utc>,
    ) -> AnalyticsResult<Vec<DailyLoad>> {
        let end = as_of.date_naive();
        let until = end
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| Utc.from_utc_datetime(&d));
        let sessions = self.store.completed_sessions(
            profile_id,
            SessionQuery {
                until,
                ..SessionQuery::default()
            },
        )?;

        let mut daily_stress: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for session in &sessions {
            if let Some(score) = session.stress_score {
                *daily_stress.entry(session.started_at.date_naive()).or_insert(0.0) += score;
            }
        }

        let Some(start) = daily_stress.keys().next().copied() else {
            return Ok(Vec::new());
        };
        Ok(self.calculator.calculate_history(&daily_stress, start, end))
    }

    /// CTL, ATL, TSB and trend as of a date.
    pub fn training_load(
        &self,
        profile_id: &Uuid,
        as_of: DateTime<Utc>,
    ) -> AnalyticsResult<TrainingLoad> {
        let history = self.daily_loads(profile_id, as_of)?;
        let as_of_date = as_of.date_naive();

        let Some(today) = history.last() else {
            return Ok(TrainingLoad {
                as_of: as_of_date,
                ctl: 0.0,
                atl: 0.0,
                tsb: 0.0,
                trend: LoadTrend::Stable,
                ramp_rate: 0.0,
            });
        };

        let week_ago = as_of_date - Duration::days(TREND_WINDOW_DAYS);
        let previous_ctl = history
            .iter()
            .rev()
            .find(|d| d.date <= week_ago)
            .map_or(0.0, |d| d.ctl);

        Ok(TrainingLoad {
            as_of: as_of_date,
            ctl: today.ctl,
            atl: today.atl,
            tsb: today.tsb,
            trend: load_trend(previous_ctl, today.ctl),
            ramp_rate: today.ctl - previous_ctl,
        })
    }

    /// Score a finished session and store it.
    pub fn complete_session(&self, summary: &mut SessionSummary) -> AnalyticsResult<()> {
        let timeline = self.timeline(&summary.profile_id)?;
        let score = score_session(summary, &timeline, &self.defaults);
        apply_score(summary, score);
        self.store.append_session_record(summary)?;
        tracing::info!(
            "Scored session {}: {:?}",
            summary.session_id,
            summary.stress_score
        );
        Ok(())
    }

    /// Compare a capability now with its value `window_days` earlier.
    pub fn progression(
        &self,
        profile_id: &Uuid,
        kind: CapabilityKind,
        window_days: u32,
        as_of: DateTime<Utc>,
    ) -> AnalyticsResult<Progression> {
        let timeline = self.timeline(profile_id)?;
        Progression::from_timeline(&timeline, kind, window_days, as_of)
    }

    /// Store a capability record and re-score the sessions it governs.
    ///
    /// Only sessions starting between the record's `valid_from` and the next
    /// newer record of the same kind are examined. Setting `cancel` stops
    /// the batch between chunks; [`Self::resume_rescore`] continues it.
    pub fn insert_capability_record(
        &self,
        record: &CapabilityRecord,
        cancel: &AtomicBool,
    ) -> AnalyticsResult<RescoreReport> {
        self.store.insert_capability(record)?;
        tracing::info!(
            "Capability {} = {} from {} (backdated: {})",
            record.kind,
            record.value,
            record.valid_from,
            record.is_backdated()
        );

        if !record.kind.affects_scoring() {
            return Ok(RescoreReport {
                record_id: record.id,
                completed: true,
                ..RescoreReport::default()
            });
        }

        self.store
            .save_rescore_cursor(&record.id, &record.profile_id, None)?;
        self.rescore(record, None, cancel)
    }

    /// Continue an interrupted re-scoring batch.
    pub fn resume_rescore(
        &self,
        record_id: &Uuid,
        cancel: &AtomicBool,
    ) -> AnalyticsResult<RescoreReport> {
        let record = self
            .store
            .capability_record(record_id)?
            .ok_or_else(|| AnalyticsError::NotFound(format!("capability record {}", record_id)))?;

        match self.store.load_rescore_cursor(record_id)? {
            Some(cursor) => self.rescore(&record, cursor, cancel),
            None => Ok(RescoreReport {
                record_id: *record_id,
                completed: true,
                ..RescoreReport::default()
            }),
        }
    }

    fn rescore(
        &self,
        record: &CapabilityRecord,
        mut cursor: Option<SessionCursor>,
        cancel: &AtomicBool,
    ) -> AnalyticsResult<RescoreReport> {
        let timeline = self.timeline(&record.profile_id)?;
        let until = timeline.next_after(record).map(|next| next.valid_from);
        let batch = self.settings.rescore_batch_size.max(1);

        let mut report = RescoreReport {
            record_id: record.id,
            cursor,
            ..RescoreReport::default()
        };

        loop {
            if cancel.load(Ordering::Relaxed) {
                tracing::warn!(
                    "Re-scoring for record {} cancelled after {} sessions",
                    record.id,
                    report.examined
                );
                return Ok(report);
            }

            let chunk = self.store.completed_sessions(
                &record.profile_id,
                SessionQuery {
                    from: Some(record.valid_from),
                    until,
                    after: cursor,
                    limit: Some(batch),
                },
            )?;

            for session in &chunk {
                let score = score_session(session, &timeline, &self.defaults);
                if stored_score(session) != score.map(score_tuple) {
                    self.store.update_stress_score(
                        &session.session_id,
                        score.map(|s| s.stress_score),
                        score.map(|s| s.scored_with),
                        score.map(|s| s.basis),
                    )?;
                    report.rescored.push(session.session_id);
                }
                report.examined += 1;
                cursor = Some(SessionCursor {
                    started_at: session.started_at,
                    session_id: session.session_id,
                });
            }
            report.cursor = cursor;

            if chunk.len() < batch {
                break;
            }
            self.store
                .save_rescore_cursor(&record.id, &record.profile_id, cursor)?;
        }

        self.store.clear_rescore_cursor(&record.id)?;
        report.completed = true;
        tracing::info!(
            "Re-scored {} of {} sessions for record {}",
            report.rescored.len(),
            report.examined,
            record.id
        );
        Ok(report)
    }
}

/// Write a score into a summary.
pub fn apply_score(summary: &mut SessionSummary, score: Option<SessionScore>) {
    summary.stress_score = score.map(|s| s.stress_score);
    summary.scored_with = score.map(|s| s.scored_with);
    summary.score_basis = score.map(|s| s.basis);
}

fn score_tuple(score: SessionScore) -> (f64, f64, ScoreBasis) {
    (score.stress_score, score.scored_with, score.basis)
}

fn stored_score(summary: &SessionSummary) -> Option<(f64, f64, ScoreBasis)> {
    match (summary.stress_score, summary.scored_with, summary.score_basis) {
        (Some(score), Some(with), Some(basis)) => Some((score, with, basis)),
        _ => None,
    }
}

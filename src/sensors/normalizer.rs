//! Reading validation.
//!
//! Every reading entering a session passes through [`ReadingNormalizer`]
//! before it reaches the aggregator. Rejections are counted and never fatal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{MetricKind, Reading, ReadingValue, RejectReason, ValidationError};
use crate::storage::config::NormalizerSettings;

/// Per-reason rejection counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounters {
    /// Count per rejection reason
    pub by_reason: BTreeMap<RejectReason, u64>,
    /// Readings dropped because the session was paused
    pub dropped_while_paused: u64,
}

impl RejectionCounters {
    /// Total number of rejected readings.
    pub fn total(&self) -> u64 {
        self.by_reason.values().sum()
    }

    /// Count for a single reason.
    pub fn count(&self, reason: RejectReason) -> u64 {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }

    fn record(&mut self, reason: RejectReason) {
        *self.by_reason.entry(reason).or_insert(0) += 1;
    }
}

/// Serializable normalizer state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizerState {
    /// Last accepted timestamp per `metric/device` stream
    pub cursors: BTreeMap<String, DateTime<Utc>>,
    /// Last processed tick
    pub watermark: Option<DateTime<Utc>>,
    /// Rejection counts
    pub counters: RejectionCounters,
}

/// Validates readings against plausibility ranges and ordering rules.
pub struct ReadingNormalizer {
    settings: NormalizerSettings,
    state: NormalizerState,
}

impl ReadingNormalizer {
    /// Create a normalizer with the given settings.
    pub fn new(settings: NormalizerSettings) -> Self {
        Self {
            settings,
            state: NormalizerState::default(),
        }
    }

    /// Restore a normalizer from saved state.
    pub fn from_state(settings: NormalizerSettings, state: NormalizerState) -> Self {
        Self { settings, state }
    }

    /// Validate a reading. Accepted readings advance the stream cursor.
    pub fn normalize(&mut self, reading: Reading) -> Result<Reading, ValidationError> {
        if let Err(reason) = self.check(&reading) {
            self.state.counters.record(reason);
            tracing::debug!(
                "Rejected {} reading from {}: {}",
                reading.kind,
                reading.device_id,
                reason
            );
            return Err(ValidationError {
                kind: reading.kind,
                device_id: reading.device_id,
                reason,
            });
        }

        self.state
            .cursors
            .insert(stream_key(&reading), reading.captured_at);
        Ok(reading)
    }

    fn check(&self, reading: &Reading) -> Result<(), RejectReason> {
        match (reading.kind, &reading.value) {
            (MetricKind::Position, ReadingValue::Position(point)) => {
                if !point.lat.is_finite()
                    || !point.lng.is_finite()
                    || point.altitude.is_some_and(|a| !a.is_finite())
                {
                    return Err(RejectReason::NotFinite);
                }
                if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lng) {
                    return Err(RejectReason::OutOfRange);
                }
                if let Some(altitude) = point.altitude {
                    if !self.settings.altitude.contains(altitude) {
                        return Err(RejectReason::OutOfRange);
                    }
                }
                let accuracy = reading.quality.and_then(|q| q.accuracy_m);
                if accuracy.is_some_and(|a| a > self.settings.max_position_accuracy_m) {
                    return Err(RejectReason::LowAccuracy);
                }
            }
            (MetricKind::Position, ReadingValue::Scalar(_)) => return Err(RejectReason::WrongShape),
            (_, ReadingValue::Position(_)) => return Err(RejectReason::WrongShape),
            (kind, ReadingValue::Scalar(value)) => {
                if !value.is_finite() {
                    return Err(RejectReason::NotFinite);
                }
                let range = match kind {
                    MetricKind::HeartRate => self.settings.heart_rate,
                    MetricKind::Power => self.settings.power,
                    MetricKind::Cadence => self.settings.cadence,
                    MetricKind::Speed => self.settings.speed,
                    MetricKind::Grade => self.settings.grade,
                    MetricKind::Position => return Err(RejectReason::WrongShape),
                };
                if !range.contains(*value) {
                    return Err(RejectReason::OutOfRange);
                }
            }
        }

        if let Some(watermark) = self.state.watermark {
            if reading.captured_at < watermark {
                return Err(RejectReason::Stale);
            }
        }

        if let Some(last) = self.state.cursors.get(&stream_key(reading)) {
            if reading.captured_at < *last {
                return Err(RejectReason::OutOfOrder);
            }
        }

        Ok(())
    }

    /// Advance the watermark to the last processed tick.
    pub fn advance_watermark(&mut self, tick: DateTime<Utc>) {
        if self.state.watermark.map_or(true, |w| tick > w) {
            self.state.watermark = Some(tick);
        }
    }

    /// Count a reading dropped while the session was paused.
    pub fn count_paused_drop(&mut self) {
        self.state.counters.dropped_while_paused += 1;
    }

    /// Rejection counts so far.
    pub fn counters(&self) -> &RejectionCounters {
        &self.state.counters
    }

    /// Current watermark.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.state.watermark
    }

    /// Snapshot the state for checkpointing.
    pub fn state(&self) -> &NormalizerState {
        &self.state
    }

    /// Active settings.
    pub fn settings(&self) -> &NormalizerSettings {
        &self.settings
    }
}

fn stream_key(reading: &Reading) -> String {
    format!("{}/{}", reading.kind, reading.device_id)
}

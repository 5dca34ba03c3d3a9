//! Live training metrics.
//!
//! [`LiveMetricsEngine`] runs once per recording tick regardless of how
//! often readings arrive. Apart from the Normalized Power smoothing buffer
//! and the energy total it holds nothing; everything else is read from the
//! aggregator when a snapshot is taken.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregator::{MetricSnapshot, RollingAggregator};
use super::capability::CapabilityKind;
use crate::sensors::types::MetricKind;

/// Live metrics at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LiveMetricsSnapshot {
    /// Logical clock time of the snapshot
    pub at: Option<DateTime<Utc>>,
    /// Seconds since start, including pauses
    pub elapsed_secs: u64,
    /// Seconds spent recording
    pub moving_secs: u64,
    /// Total distance in meters
    pub distance_m: f64,
    /// Total ascent in meters
    pub ascent_m: f64,
    /// Per-metric values
    pub metrics: BTreeMap<MetricKind, MetricSnapshot>,
    /// Running Normalized Power
    pub normalized_power: Option<f64>,
    /// Running Intensity Factor
    pub intensity_factor: Option<f64>,
    /// Provisional stress score
    pub stress_score: Option<f64>,
    /// Mechanical work in kJ
    pub energy_kj: f64,
    /// Threshold power used for IF
    pub threshold_power: Option<f64>,
}

impl LiveMetricsSnapshot {
    /// Snapshot of a single metric.
    pub fn metric(&self, kind: MetricKind) -> Option<&MetricSnapshot> {
        self.metrics.get(&kind)
    }
}

/// Serializable engine state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LiveMetricsState {
    /// 30 s smoothing buffer and running 4th-power mean
    pub np: crate::metrics::smoothing::NormalizedPowerCalculator,
    /// Mechanical work in joules
    pub energy_j: f64,
}

/// Derives training metrics at a fixed 1 Hz cadence.
#[derive(Debug, Default)]
pub struct LiveMetricsEngine {
    state: LiveMetricsState,
}

impl LiveMetricsEngine {
    /// Create a new engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from saved state.
    pub fn from_state(state: LiveMetricsState) -> Self {
        Self { state }
    }

    /// Feed one second of recording time.
    ///
    /// Samples the current power, or zero if the power sensor has timed out
    /// after being seen. Nothing is fed before the first power reading.
    pub fn tick(&mut self, aggregator: &RollingAggregator) {
        if !aggregator.has_seen(MetricKind::Power) {
            return;
        }
        let power = aggregator
            .current_if_available(MetricKind::Power)
            .unwrap_or(0.0);
        self.state.np.add(power);
        self.state.energy_j += power;
    }

    /// Build a snapshot at `now`.
    pub fn snapshot(
        &self,
        now: DateTime<Utc>,
        elapsed_secs: u64,
        moving_secs: u64,
        aggregator: &mut RollingAggregator,
    ) -> LiveMetricsSnapshot {
        let threshold_power = aggregator.capabilities().value_or_default(
            CapabilityKind::ThresholdPower,
            now,
            aggregator.defaults(),
        );
        let normalized_power = self.state.np.normalized_power();
        let intensity_factor = match (normalized_power, threshold_power) {
            (Some(np), Some(ftp)) if ftp > 0.0 => Some(np / ftp),
            _ => None,
        };
        let stress_score =
            intensity_factor.map(|if_| stress_score(moving_secs, if_));

        let aggregates = aggregator.snapshot(now);

        LiveMetricsSnapshot {
            at: Some(now),
            elapsed_secs,
            moving_secs,
            distance_m: aggregates.distance_m,
            ascent_m: aggregates.ascent_m,
            metrics: aggregates.metrics,
            normalized_power,
            intensity_factor,
            stress_score,
            energy_kj: self.state.energy_j / 1000.0,
            threshold_power,
        }
    }

    /// Running Normalized Power.
    pub fn normalized_power(&self) -> Option<f64> {
        self.state.np.normalized_power()
    }

    /// Mechanical work in kJ.
    pub fn energy_kj(&self) -> f64 {
        self.state.energy_j / 1000.0
    }

    /// State for checkpointing.
    pub fn state(&self) -> &LiveMetricsState {
        &self.state
    }
}

/// Stress score: moving hours × IF² × 100.
pub fn stress_score(moving_secs: u64, intensity_factor: f64) -> f64 {
    let hours = moving_secs as f64 / 3600.0;
    hours * intensity_factor * intensity_factor * 100.0
}

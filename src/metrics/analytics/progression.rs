//! Capability progression over a time window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::{AnalyticsError, AnalyticsResult};
use crate::metrics::capability::{CapabilityKind, CapabilityTimeline};

/// Change in percent below which a capability counts as stable.
const STABLE_BAND_PERCENT: f64 = 1.0;

/// Direction of a capability over the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressionTrend {
    Increasing,
    Stable,
    Decreasing,
    /// No value at one end of the window
    InsufficientData,
}

/// Current value of a capability compared with its value one window earlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progression {
    /// Capability compared
    pub kind: CapabilityKind,
    /// Window length in days
    pub window_days: u32,
    /// Value valid at `as_of`
    pub current: Option<f64>,
    /// Value valid one window before `as_of`
    pub baseline: Option<f64>,
    /// Relative change from baseline
    pub change_percent: Option<f64>,
    /// Direction of the change
    pub trend: ProgressionTrend,
    /// Linear extrapolation one window ahead
    pub projected: Option<f64>,
}

impl Progression {
    /// Compute progression from a capability timeline.
    pub fn from_timeline(
        timeline: &CapabilityTimeline,
        kind: CapabilityKind,
        window_days: u32,
        as_of: DateTime<Utc>,
    ) -> AnalyticsResult<Self> {
        if window_days == 0 {
            return Err(AnalyticsError::InvalidInput(
                "Progression window must be at least one day".to_string(),
            ));
        }

        let current = timeline.value_at(kind, as_of);
        let baseline = timeline.value_at(kind, as_of - Duration::days(i64::from(window_days)));

        let (change_percent, trend, projected) = match (current, baseline) {
            (Some(current), Some(baseline)) if baseline != 0.0 => {
                let change = (current - baseline) / baseline * 100.0;
                let trend = if change > STABLE_BAND_PERCENT {
                    ProgressionTrend::Increasing
                } else if change < -STABLE_BAND_PERCENT {
                    ProgressionTrend::Decreasing
                } else {
                    ProgressionTrend::Stable
                };
                (Some(change), trend, Some(current + (current - baseline)))
            }
            _ => (None, ProgressionTrend::InsufficientData, None),
        };

        Ok(Self {
            kind,
            window_days,
            current,
            baseline,
            change_percent,
            trend,
            projected,
        })
    }
}

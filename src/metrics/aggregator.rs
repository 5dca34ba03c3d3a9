//! Rolling per-metric aggregation.
//!
//! The aggregator holds, for each metric, the instantaneous value, the fixed
//! time windows, the session totals and (for power and heart rate) the
//! seconds spent in each zone. It is fed accepted readings in time order and
//! ticked once per second of recording time.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::capability::{CapabilityKind, CapabilityTimeline};
use super::window::{MetricWindow, RunningSum};
use super::zones::{zone_count, HeartRateZones, PowerZones, ZoneAccumulator, ZoneTable};
use crate::sensors::types::{GeoPoint, MetricKind, Reading, ReadingValue};
use crate::storage::config::{CapabilityDefaults, NormalizerSettings};

/// Result of feeding a reading to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// Reading folded into the aggregates
    Accepted,
    /// Position fix implied an impossible jump and was dropped
    PositionDiscarded {
        /// Implied speed in m/s
        implied_speed: f64,
    },
}

/// Running state of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricState {
    /// Latest value
    pub current: Option<f64>,
    /// Timestamp of the latest reading
    pub last_at: Option<DateTime<Utc>>,
    /// Time windows
    pub windows: Vec<MetricWindow>,
    /// Session sum
    pub sum: RunningSum,
    /// Session sample count
    pub count: u64,
    /// Session maximum
    pub max: Option<f64>,
    /// Whole seconds the metric was available
    pub available_secs: u64,
    /// Whether the metric was available at the last tick
    pub available: bool,
    /// Zone of the latest value
    pub current_zone: Option<u8>,
    /// Seconds per zone
    pub zones: Option<ZoneAccumulator>,
}

impl MetricState {
    fn new(kind: MetricKind, spans: &[u32]) -> Self {
        let windows = if kind.is_scalar() {
            spans.iter().map(|&s| MetricWindow::new(s)).collect()
        } else {
            Vec::new()
        };
        Self {
            current: None,
            last_at: None,
            windows,
            sum: RunningSum::default(),
            count: 0,
            max: None,
            available_secs: 0,
            available: false,
            current_zone: None,
            zones: zone_count(kind).map(ZoneAccumulator::new),
        }
    }

    /// Session average.
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum.value() / self.count as f64)
        }
    }
}

/// Distance and elevation accumulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceState {
    /// Total distance in meters
    pub distance_m: f64,
    /// Total ascent in meters
    pub ascent_m: f64,
    /// Last retained position fix
    pub last_position: Option<(DateTime<Utc>, GeoPoint)>,
    /// Fixes discarded as discontinuities
    pub discarded_positions: u64,
}

/// Full serializable aggregator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorState {
    /// Per-metric state
    pub metrics: BTreeMap<MetricKind, MetricState>,
    /// Distance and ascent
    pub distance: DistanceState,
    /// Capability records used for zone boundaries
    pub capabilities: CapabilityTimeline,
    /// Integrate distance from speed when no position is available
    pub integrate_speed: bool,
}

/// Query view of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Latest value
    pub current: Option<f64>,
    /// Whether the sensor is within its timeout
    pub available: bool,
    /// Window averages as `(span_secs, average)`
    pub windows: Vec<(u32, Option<f64>)>,
    /// Session average
    pub average: Option<f64>,
    /// Session maximum
    pub max: Option<f64>,
    /// Seconds the metric was available
    pub available_secs: u64,
    /// Zone of the latest value
    pub zone: Option<u8>,
    /// Seconds per zone
    pub zone_seconds: Option<Vec<u64>>,
}

/// Query view of the whole aggregator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregatorSnapshot {
    /// Metrics that have produced at least one reading
    pub metrics: BTreeMap<MetricKind, MetricSnapshot>,
    /// Total distance in meters
    pub distance_m: f64,
    /// Total ascent in meters
    pub ascent_m: f64,
}

impl AggregatorSnapshot {
    /// Snapshot of a single metric.
    pub fn metric(&self, kind: MetricKind) -> Option<&MetricSnapshot> {
        self.metrics.get(&kind)
    }
}

/// Rolling aggregator.
pub struct RollingAggregator {
    settings: NormalizerSettings,
    defaults: CapabilityDefaults,
    state: AggregatorState,
}

impl RollingAggregator {
    /// Create an empty aggregator.
    pub fn new(
        settings: NormalizerSettings,
        defaults: CapabilityDefaults,
        capabilities: CapabilityTimeline,
        integrate_speed: bool,
    ) -> Self {
        let mut metrics = BTreeMap::new();
        for kind in MetricKind::SCALARS.into_iter().chain([MetricKind::Position]) {
            metrics.insert(kind, MetricState::new(kind, &settings.window_spans_secs));
        }
        Self {
            settings,
            defaults,
            state: AggregatorState {
                metrics,
                distance: DistanceState::default(),
                capabilities,
                integrate_speed,
            },
        }
    }

    /// Restore from saved state.
    pub fn from_state(
        settings: NormalizerSettings,
        defaults: CapabilityDefaults,
        state: AggregatorState,
    ) -> Self {
        Self {
            settings,
            defaults,
            state,
        }
    }

    /// Fold an accepted reading into the aggregates.
    pub fn ingest(&mut self, reading: &Reading) -> IngestOutcome {
        let at = reading.captured_at;
        let value = match reading.value {
            ReadingValue::Scalar(v) => v,
            ReadingValue::Position(point) => return self.ingest_position(at, point),
        };

        let zone = self.zone_table(reading.kind, at).map(|t| t.get_zone(value));
        let spans = &self.settings.window_spans_secs;
        let metric = self
            .state
            .metrics
            .entry(reading.kind)
            .or_insert_with(|| MetricState::new(reading.kind, spans));

        metric.current = Some(value);
        metric.last_at = Some(at);
        for window in &mut metric.windows {
            window.push(at, value);
        }
        metric.sum.add(value);
        metric.count += 1;
        metric.max = Some(metric.max.map_or(value, |m| m.max(value)));
        if zone.is_some() {
            metric.current_zone = zone;
        }

        IngestOutcome::Accepted
    }

    fn ingest_position(&mut self, at: DateTime<Utc>, point: GeoPoint) -> IngestOutcome {
        let max_speed = self.settings.max_position_speed_mps;
        let distance = &mut self.state.distance;

        if let Some((last_at, last)) = distance.last_position {
            let meters = last.distance_to(&point);
            let secs = (at - last_at).num_milliseconds() as f64 / 1000.0;
            let implied_speed = if secs > 0.0 {
                meters / secs
            } else if meters > 0.0 {
                f64::INFINITY
            } else {
                0.0
            };

            if implied_speed > max_speed {
                distance.discarded_positions += 1;
                tracing::warn!(
                    "Discarding position fix: implied speed {:.1} m/s exceeds {:.1} m/s",
                    implied_speed,
                    max_speed
                );
                return IngestOutcome::PositionDiscarded { implied_speed };
            }

            distance.distance_m += meters;
            if let (Some(prev), Some(cur)) = (last.altitude, point.altitude) {
                if cur > prev {
                    distance.ascent_m += cur - prev;
                }
            }
        }
        distance.last_position = Some((at, point));

        if let Some(metric) = self.state.metrics.get_mut(&MetricKind::Position) {
            metric.last_at = Some(at);
            metric.count += 1;
        }

        IngestOutcome::Accepted
    }

    /// Advance one second of recording time.
    ///
    /// Returns metrics that became unavailable on this tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<MetricKind> {
        let timeout = Duration::seconds(i64::from(self.settings.sensor_timeout_secs));
        let mut timed_out = Vec::new();

        for (kind, metric) in self.state.metrics.iter_mut() {
            let available = metric.last_at.is_some_and(|at| now - at <= timeout);
            if available {
                metric.available_secs += 1;
                if let (Some(zones), Some(zone)) = (metric.zones.as_mut(), metric.current_zone) {
                    zones.add_second(zone);
                }
            } else if metric.available {
                timed_out.push(*kind);
            }
            metric.available = available;
        }

        if self.state.integrate_speed && self.state.distance.last_position.is_none() {
            if let Some(speed) = self.current_if_available(MetricKind::Speed) {
                self.state.distance.distance_m += speed;
            }
        }

        timed_out
    }

    /// Latest value of a metric if it is within the sensor timeout.
    pub fn current_if_available(&self, kind: MetricKind) -> Option<f64> {
        let metric = self.state.metrics.get(&kind)?;
        if metric.available {
            metric.current
        } else {
            None
        }
    }

    /// Whether a metric has produced any reading this session.
    pub fn has_seen(&self, kind: MetricKind) -> bool {
        self.state
            .metrics
            .get(&kind)
            .is_some_and(|m| m.last_at.is_some())
    }

    /// Build a query view at `now`.
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> AggregatorSnapshot {
        let mut metrics = BTreeMap::new();
        for (kind, metric) in self.state.metrics.iter_mut() {
            if metric.last_at.is_none() {
                continue;
            }
            let windows = metric
                .windows
                .iter_mut()
                .map(|w| (w.span_secs(), w.average(now)))
                .collect();
            metrics.insert(
                *kind,
                MetricSnapshot {
                    current: metric.current,
                    available: metric.available,
                    windows,
                    average: metric.average(),
                    max: metric.max,
                    available_secs: metric.available_secs,
                    zone: metric.current_zone,
                    zone_seconds: metric.zones.as_ref().map(|z| z.seconds().to_vec()),
                },
            );
        }
        AggregatorSnapshot {
            metrics,
            distance_m: self.state.distance.distance_m,
            ascent_m: self.state.distance.ascent_m,
        }
    }

    /// Zone table for a metric at a point in time.
    pub fn zone_table(&self, kind: MetricKind, at: DateTime<Utc>) -> Option<ZoneTable> {
        let timeline = &self.state.capabilities;
        match kind {
            MetricKind::Power => timeline
                .value_or_default(CapabilityKind::ThresholdPower, at, &self.defaults)
                .map(PowerZones::from_ftp),
            MetricKind::HeartRate => timeline
                .value_or_default(CapabilityKind::ThresholdHeartRate, at, &self.defaults)
                .map(HeartRateZones::from_lthr),
            _ => None,
        }
    }

    /// Replace the capability timeline. Affects zone attribution going forward.
    pub fn set_capabilities(&mut self, capabilities: CapabilityTimeline) {
        self.state.capabilities = capabilities;
    }

    /// Capability timeline in use.
    pub fn capabilities(&self) -> &CapabilityTimeline {
        &self.state.capabilities
    }

    /// Capability defaults in use.
    pub fn defaults(&self) -> &CapabilityDefaults {
        &self.defaults
    }

    /// Total distance in meters.
    pub fn distance_m(&self) -> f64 {
        self.state.distance.distance_m
    }

    /// Total ascent in meters.
    pub fn ascent_m(&self) -> f64 {
        self.state.distance.ascent_m
    }

    /// Running state of a metric.
    pub fn metric(&self, kind: MetricKind) -> Option<&MetricState> {
        self.state.metrics.get(&kind)
    }

    /// Full state for checkpointing.
    pub fn state(&self) -> &AggregatorState {
        &self.state
    }
}

//! Reading types for sensor and location samples.
//!
//! Device drivers translate their payloads into [`Reading`] values before
//! handing them to a session; nothing past this point knows about BLE, ANT+
//! or GPS chipsets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of metric carried by a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Heart rate in BPM
    HeartRate,
    /// Power in watts
    Power,
    /// Cadence in RPM
    Cadence,
    /// Speed in m/s
    Speed,
    /// Geographic position
    Position,
    /// Road grade in percent
    Grade,
}

impl MetricKind {
    /// Scalar metrics tracked by the rolling aggregator.
    pub const SCALARS: [MetricKind; 5] = [
        MetricKind::HeartRate,
        MetricKind::Power,
        MetricKind::Cadence,
        MetricKind::Speed,
        MetricKind::Grade,
    ];

    /// Whether readings of this kind carry a scalar value.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, MetricKind::Position)
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::HeartRate => write!(f, "heart_rate"),
            MetricKind::Power => write!(f, "power"),
            MetricKind::Cadence => write!(f, "cadence"),
            MetricKind::Speed => write!(f, "speed"),
            MetricKind::Position => write!(f, "position"),
            MetricKind::Grade => write!(f, "grade"),
        }
    }
}

/// A geographic fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
    /// Altitude in meters (if the receiver reports it)
    pub altitude: Option<f64>,
}

impl GeoPoint {
    /// Create a point without altitude.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            altitude: None,
        }
    }

    /// Create a point with altitude.
    pub fn with_altitude(lat: f64, lng: f64, altitude: f64) -> Self {
        Self {
            lat,
            lng,
            altitude: Some(altitude),
        }
    }

    /// Great-circle distance to another point in meters (haversine).
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;

        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlng = (other.lng - self.lng).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Value carried by a reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingValue {
    /// Scalar measurement
    Scalar(f64),
    /// Position fix
    Position(GeoPoint),
}

/// Optional signal-quality metadata attached by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadingQuality {
    /// Horizontal accuracy in meters (position fixes)
    pub accuracy_m: Option<f64>,
    /// Received signal strength
    pub rssi: Option<i16>,
    /// Whether the sensor reported skin/contact detection
    pub contact: Option<bool>,
}

/// A single sample from a device or location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Metric kind
    pub kind: MetricKind,
    /// Measured value
    pub value: ReadingValue,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
    /// Source device identifier
    pub device_id: String,
    /// Optional quality metadata
    pub quality: Option<ReadingQuality>,
}

impl Reading {
    /// Create a scalar reading.
    pub fn scalar(
        kind: MetricKind,
        value: f64,
        captured_at: DateTime<Utc>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            value: ReadingValue::Scalar(value),
            captured_at,
            device_id: device_id.into(),
            quality: None,
        }
    }

    /// Create a position reading.
    pub fn position(point: GeoPoint, captured_at: DateTime<Utc>, device_id: impl Into<String>) -> Self {
        Self {
            kind: MetricKind::Position,
            value: ReadingValue::Position(point),
            captured_at,
            device_id: device_id.into(),
            quality: None,
        }
    }

    /// Attach quality metadata.
    pub fn with_quality(mut self, quality: ReadingQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Scalar value, if this reading carries one.
    pub fn scalar_value(&self) -> Option<f64> {
        match self.value {
            ReadingValue::Scalar(v) => Some(v),
            ReadingValue::Position(_) => None,
        }
    }

    /// Position value, if this reading carries one.
    pub fn position_value(&self) -> Option<GeoPoint> {
        match self.value {
            ReadingValue::Position(p) => Some(p),
            ReadingValue::Scalar(_) => None,
        }
    }
}

/// Reason a reading was rejected by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Value outside the plausible range for its kind
    OutOfRange,
    /// Value is NaN or infinite
    NotFinite,
    /// Value shape does not match the metric kind
    WrongShape,
    /// Older than the last accepted reading for the same metric and device
    OutOfOrder,
    /// Older than the session clock
    Stale,
    /// Position accuracy worse than the configured limit
    LowAccuracy,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::OutOfRange => write!(f, "out of range"),
            RejectReason::NotFinite => write!(f, "not finite"),
            RejectReason::WrongShape => write!(f, "wrong value shape"),
            RejectReason::OutOfOrder => write!(f, "out of order"),
            RejectReason::Stale => write!(f, "stale"),
            RejectReason::LowAccuracy => write!(f, "low accuracy"),
        }
    }
}

/// A rejected reading. Counted, never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Rejected {kind} reading from {device_id}: {reason}")]
pub struct ValidationError {
    /// Metric kind of the rejected reading
    pub kind: MetricKind,
    /// Source device
    pub device_id: String,
    /// Why it was rejected
    pub reason: RejectReason,
}

/// Operating state reported by a controllable machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineRunState {
    /// No status received yet
    #[default]
    Unknown,
    /// Idle / ready
    Idle,
    /// Running or resumed
    Running,
    /// Paused by the user or a safety key
    Paused,
    /// Stopped
    Stopped,
    /// Control permission lost
    ControlLost,
}

/// Asynchronous status notification from the controlled machine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MachineStatus {
    /// Run state
    pub state: MachineRunState,
    /// Target power the machine reports as active
    pub target_power_watts: Option<f64>,
    /// Grade the machine reports as active
    pub grade_percent: Option<f64>,
    /// Resistance level the machine reports as active
    pub resistance_level: Option<f64>,
}

//! Sensor readings and validation.

pub mod normalizer;
pub mod types;

pub use normalizer::{NormalizerState, ReadingNormalizer, RejectionCounters};
pub use types::{
    GeoPoint, MachineRunState, MachineStatus, MetricKind, Reading, ReadingQuality, ReadingValue,
    RejectReason, ValidationError,
};

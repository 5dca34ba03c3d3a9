//! Metrics module for live aggregation, zones and training load.

pub mod aggregator;
pub mod analytics;
pub mod calculator;
pub mod capability;
pub mod smoothing;
pub mod window;
pub mod zones;

pub use aggregator::{AggregatorSnapshot, IngestOutcome, MetricSnapshot, RollingAggregator};
pub use calculator::{LiveMetricsEngine, LiveMetricsSnapshot};
pub use capability::{CapabilityKind, CapabilityRecord, CapabilitySource, CapabilityTimeline};
pub use zones::{HeartRateZones, PowerZones, ZoneAccumulator, ZoneTable};

pub use analytics::{
    AnalyticsError, AnalyticsResult, DailyLoad, LoadTrend, Progression, ProgressionTrend,
    RescoreReport, TrainingLoad, TrainingLoadCalculator, TrainingLoadEngine,
};

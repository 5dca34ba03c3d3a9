//! Athlete capability records.
//!
//! Capability values (threshold power, heart-rate bounds, weight) are
//! timestamped records, valid from `valid_from` until a newer record of the
//! same kind supersedes them. Corrections are new records, never edits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::config::CapabilityDefaults;

/// Kind of capability value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Functional threshold power in watts
    ThresholdPower,
    /// Lactate threshold heart rate in BPM
    ThresholdHeartRate,
    /// Maximum heart rate in BPM
    MaxHeartRate,
    /// Resting heart rate in BPM
    RestingHeartRate,
    /// Body weight in kg
    Weight,
}

impl CapabilityKind {
    /// Stable identifier used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::ThresholdPower => "threshold_power",
            CapabilityKind::ThresholdHeartRate => "threshold_heart_rate",
            CapabilityKind::MaxHeartRate => "max_heart_rate",
            CapabilityKind::RestingHeartRate => "resting_heart_rate",
            CapabilityKind::Weight => "weight",
        }
    }

    /// Parse a storage identifier.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "threshold_power" => Some(CapabilityKind::ThresholdPower),
            "threshold_heart_rate" => Some(CapabilityKind::ThresholdHeartRate),
            "max_heart_rate" => Some(CapabilityKind::MaxHeartRate),
            "resting_heart_rate" => Some(CapabilityKind::RestingHeartRate),
            "weight" => Some(CapabilityKind::Weight),
            _ => None,
        }
    }

    /// Performance kinds belong to the performance log, the rest to the profile log.
    pub fn is_performance(&self) -> bool {
        matches!(
            self,
            CapabilityKind::ThresholdPower | CapabilityKind::ThresholdHeartRate
        )
    }

    /// Whether stored session scores depend on this kind.
    pub fn affects_scoring(&self) -> bool {
        self.is_performance()
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a capability value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySource {
    /// Entered by the athlete
    #[default]
    Manual,
    /// Derived from a test or detected from ride data
    Detected,
    /// Imported from another service
    Imported,
}

impl CapabilitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilitySource::Manual => "manual",
            CapabilitySource::Detected => "detected",
            CapabilitySource::Imported => "imported",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "detected" => CapabilitySource::Detected,
            "imported" => CapabilitySource::Imported,
            _ => CapabilitySource::Manual,
        }
    }
}

/// A timestamped capability record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Unique identifier
    pub id: Uuid,
    /// Athlete profile
    pub profile_id: Uuid,
    /// Kind of value
    pub kind: CapabilityKind,
    /// Value in the kind's unit
    pub value: f64,
    /// Start of validity
    pub valid_from: DateTime<Utc>,
    /// When the record was entered
    pub recorded_at: DateTime<Utc>,
    /// Origin of the value
    pub source: CapabilitySource,
}

impl CapabilityRecord {
    /// Create a manual record entered now.
    pub fn new(
        profile_id: Uuid,
        kind: CapabilityKind,
        value: f64,
        valid_from: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile_id,
            kind,
            value,
            valid_from,
            recorded_at: Utc::now(),
            source: CapabilitySource::Manual,
        }
    }

    /// Whether the record takes effect before it was entered.
    pub fn is_backdated(&self) -> bool {
        self.valid_from < self.recorded_at
    }
}

/// Capability records of one profile, ordered by `valid_from`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityTimeline {
    records: Vec<CapabilityRecord>,
}

impl CapabilityTimeline {
    /// Build a timeline from records in any order.
    pub fn new(mut records: Vec<CapabilityRecord>) -> Self {
        records.sort_by(|a, b| {
            a.valid_from
                .cmp(&b.valid_from)
                .then(a.recorded_at.cmp(&b.recorded_at))
        });
        Self { records }
    }

    /// Add a record, keeping order.
    pub fn insert(&mut self, record: CapabilityRecord) {
        let at = self.records.partition_point(|r| {
            (r.valid_from, r.recorded_at) <= (record.valid_from, record.recorded_at)
        });
        self.records.insert(at, record);
    }

    /// Most recent record of `kind` with `valid_from <= at`.
    pub fn record_at(&self, kind: CapabilityKind, at: DateTime<Utc>) -> Option<&CapabilityRecord> {
        self.records
            .iter()
            .rev()
            .find(|r| r.kind == kind && r.valid_from <= at)
    }

    /// Value of `kind` valid at `at`.
    pub fn value_at(&self, kind: CapabilityKind, at: DateTime<Utc>) -> Option<f64> {
        self.record_at(kind, at).map(|r| r.value)
    }

    /// Value of `kind` valid at `at`, falling back to configured defaults.
    pub fn value_or_default(
        &self,
        kind: CapabilityKind,
        at: DateTime<Utc>,
        defaults: &CapabilityDefaults,
    ) -> Option<f64> {
        self.value_at(kind, at).or(match kind {
            CapabilityKind::ThresholdPower => Some(defaults.threshold_power_w),
            CapabilityKind::ThresholdHeartRate => Some(defaults.threshold_heart_rate_bpm),
            CapabilityKind::Weight => Some(defaults.weight_kg),
            CapabilityKind::MaxHeartRate | CapabilityKind::RestingHeartRate => None,
        })
    }

    /// First record of the same kind that becomes valid after `record`.
    pub fn next_after(&self, record: &CapabilityRecord) -> Option<&CapabilityRecord> {
        self.records
            .iter()
            .find(|r| r.kind == record.kind && r.id != record.id && r.valid_from > record.valid_from)
    }

    /// All records in order.
    pub fn records(&self) -> &[CapabilityRecord] {
        &self.records
    }

    /// Records of one kind in order.
    pub fn of_kind(&self, kind: CapabilityKind) -> impl Iterator<Item = &CapabilityRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }
}

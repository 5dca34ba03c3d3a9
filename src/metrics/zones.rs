//! Power and heart rate zone calculations.
//!
//! Power zones follow the Coggan 7-zone model relative to threshold power.
//! Heart rate zones follow the Coggan 5-zone model relative to threshold
//! (lactate threshold) heart rate.

use serde::{Deserialize, Serialize};

use crate::sensors::types::MetricKind;

/// A zone range expressed as a share of threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRange {
    /// Zone number (1-based)
    pub zone: u8,
    /// Inclusive upper bound in percent of threshold (`None` = open-ended)
    pub max_percent: Option<f64>,
    /// Lower bound in absolute units
    pub min_value: f64,
    /// Upper bound in absolute units (`None` = open-ended)
    pub max_value: Option<f64>,
    /// Zone name
    pub name: String,
}

/// An ordered zone table built from a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneTable {
    /// Threshold the table was computed from
    pub threshold: f64,
    /// Zones in ascending order
    pub zones: Vec<ZoneRange>,
}

impl ZoneTable {
    fn build(threshold: f64, bounds: &[(Option<f64>, &str)]) -> Self {
        let mut zones = Vec::with_capacity(bounds.len());
        let mut min_value = 0.0;
        for (i, (max_percent, name)) in bounds.iter().enumerate() {
            let max_value = max_percent.map(|p| threshold * p / 100.0);
            zones.push(ZoneRange {
                zone: (i + 1) as u8,
                max_percent: *max_percent,
                min_value,
                max_value,
                name: (*name).to_string(),
            });
            min_value = max_value.unwrap_or(min_value);
        }
        Self { threshold, zones }
    }

    /// Number of zones in the table.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether the table has no zones.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Get the 1-based zone for a value.
    pub fn get_zone(&self, value: f64) -> u8 {
        for range in &self.zones {
            match range.max_value {
                Some(max) if value <= max => return range.zone,
                None => return range.zone,
                _ => {}
            }
        }
        self.zones.len() as u8
    }

    /// Get the zone range for a 1-based zone number.
    pub fn get_zone_range(&self, zone: u8) -> Option<&ZoneRange> {
        self.zones.get(usize::from(zone).checked_sub(1)?)
    }
}

/// Coggan 7-zone power zones.
pub struct PowerZones;

impl PowerZones {
    /// Number of power zones.
    pub const COUNT: usize = 7;

    /// Calculate power zones from threshold power.
    pub fn from_ftp(ftp: f64) -> ZoneTable {
        ZoneTable::build(
            ftp,
            &[
                (Some(55.0), "Active Recovery"),
                (Some(75.0), "Endurance"),
                (Some(90.0), "Tempo"),
                (Some(105.0), "Threshold"),
                (Some(120.0), "VO2max"),
                (Some(150.0), "Anaerobic"),
                (None, "Neuromuscular"),
            ],
        )
    }
}

/// Coggan 5-zone heart rate zones.
pub struct HeartRateZones;

impl HeartRateZones {
    /// Number of heart rate zones.
    pub const COUNT: usize = 5;

    /// Calculate heart rate zones from threshold heart rate.
    pub fn from_lthr(lthr: f64) -> ZoneTable {
        ZoneTable::build(
            lthr,
            &[
                (Some(68.0), "Recovery"),
                (Some(83.0), "Aerobic"),
                (Some(94.0), "Tempo"),
                (Some(105.0), "Threshold"),
                (None, "Anaerobic"),
            ],
        )
    }
}

/// Number of zones tracked for a metric, if it is zoned at all.
pub fn zone_count(kind: MetricKind) -> Option<usize> {
    match kind {
        MetricKind::Power => Some(PowerZones::COUNT),
        MetricKind::HeartRate => Some(HeartRateZones::COUNT),
        _ => None,
    }
}

/// Cumulative whole seconds spent in each zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneAccumulator {
    /// Seconds per zone, index 0 = zone 1
    seconds: Vec<u64>,
}

impl ZoneAccumulator {
    /// Create an accumulator with `zones` empty buckets.
    pub fn new(zones: usize) -> Self {
        Self {
            seconds: vec![0; zones],
        }
    }

    /// Credit one second to a 1-based zone. Out-of-table zones clamp to the ends.
    pub fn add_second(&mut self, zone: u8) {
        if self.seconds.is_empty() {
            return;
        }
        let index = usize::from(zone.max(1) - 1).min(self.seconds.len() - 1);
        self.seconds[index] += 1;
    }

    /// Seconds per zone.
    pub fn seconds(&self) -> &[u64] {
        &self.seconds
    }

    /// Total seconds across all zones.
    pub fn total(&self) -> u64 {
        self.seconds.iter().sum()
    }
}

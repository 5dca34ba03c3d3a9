//! Time-based rolling windows.
//!
//! Sums keep whole milli-units as an integer, so any sequence of insertions
//! and evictions leaves no drift, and carry the sub-milli remainder of each
//! value separately. Averages are therefore of the values as given.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Scale between a reading value and its stored integer form.
const MILLI: f64 = 1000.0;

/// Convert a reading value to milli-units.
pub fn to_milli(value: f64) -> i64 {
    (value * MILLI).round() as i64
}

/// Convert milli-units back to a reading value.
pub fn from_milli(value: i64) -> f64 {
    value as f64 / MILLI
}

/// A sum that supports removing values it was given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningSum {
    milli: i64,
    remainder: f64,
}

impl RunningSum {
    /// Add a value.
    pub fn add(&mut self, value: f64) {
        let milli = to_milli(value);
        self.milli += milli;
        self.remainder += value - from_milli(milli);
    }

    /// Remove a value previously added.
    pub fn remove(&mut self, value: f64) {
        let milli = to_milli(value);
        self.milli -= milli;
        self.remainder -= value - from_milli(milli);
    }

    /// Whole milli-units of the sum.
    pub fn milli(&self) -> i64 {
        self.milli
    }

    /// The sum.
    pub fn value(&self) -> f64 {
        from_milli(self.milli) + self.remainder
    }
}

/// A window covering `(now - span, now]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricWindow {
    /// Window span in seconds
    span_secs: u32,
    /// Samples in timestamp order
    samples: VecDeque<(DateTime<Utc>, f64)>,
    /// Sum of sample values
    sum: RunningSum,
}

impl MetricWindow {
    /// Create an empty window.
    pub fn new(span_secs: u32) -> Self {
        Self {
            span_secs,
            samples: VecDeque::new(),
            sum: RunningSum::default(),
        }
    }

    /// Window span in seconds.
    pub fn span_secs(&self) -> u32 {
        self.span_secs
    }

    /// Add a sample. Timestamps must be non-decreasing.
    pub fn push(&mut self, at: DateTime<Utc>, value: f64) {
        self.samples.push_back((at, value));
        self.sum.add(value);
        self.evict(at);
    }

    /// Drop samples that have fallen out of the window at `now`.
    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(i64::from(self.span_secs));
        while let Some(&(at, value)) = self.samples.front() {
            if at > cutoff {
                break;
            }
            self.samples.pop_front();
            self.sum.remove(value);
        }
    }

    /// Average of the samples in the window at `now`.
    pub fn average(&mut self, now: DateTime<Utc>) -> Option<f64> {
        self.evict(now);
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum.value() / self.samples.len() as f64)
        }
    }

    /// Number of samples in the window at `now`.
    pub fn count(&mut self, now: DateTime<Utc>) -> usize {
        self.evict(now);
        self.samples.len()
    }

    /// Sum of the samples in the window at `now`.
    pub fn sum(&mut self, now: DateTime<Utc>) -> f64 {
        self.evict(now);
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum.value()
        }
    }

    /// Whole milli-units of the sum at `now`.
    pub fn sum_milli(&mut self, now: DateTime<Utc>) -> i64 {
        self.evict(now);
        self.sum.milli()
    }
}

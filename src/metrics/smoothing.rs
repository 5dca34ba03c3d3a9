//! Power smoothing and Normalized Power.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Sample-count rolling average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingAverage {
    /// Buffer of recent values
    buffer: VecDeque<f64>,
    /// Window size in samples
    window_size: usize,
    /// Running sum for efficient calculation
    sum: f64,
}

impl RollingAverage {
    /// Create a new rolling average with the given window size.
    pub fn new(window_size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            sum: 0.0,
        }
    }

    /// Create a 30-sample rolling average (30 s at 1 Hz, for Normalized Power).
    pub fn thirty_second() -> Self {
        Self::new(30)
    }

    /// Add a new value and return the current average.
    pub fn add(&mut self, value: f64) -> f64 {
        self.buffer.push_back(value);
        self.sum += value;

        if self.buffer.len() > self.window_size {
            if let Some(old) = self.buffer.pop_front() {
                self.sum -= old;
            }
        }

        self.sum / self.buffer.len() as f64
    }
}

/// Normalized Power calculation.
///
/// NP = 4th root of the mean of (30-second rolling average power)^4.
/// The mean is maintained incrementally; history is never revisited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPowerCalculator {
    /// 30-second rolling average
    rolling_avg: RollingAverage,
    /// Sum of 4th powers
    sum_fourth_power: f64,
    /// Count of samples
    count: u64,
}

impl NormalizedPowerCalculator {
    /// Create a new Normalized Power calculator.
    pub fn new() -> Self {
        Self {
            rolling_avg: RollingAverage::thirty_second(),
            sum_fourth_power: 0.0,
            count: 0,
        }
    }

    /// Add a 1 Hz power sample and return the current NP.
    ///
    /// Partial windows count from the first sample, so short efforts still
    /// report a value.
    pub fn add(&mut self, power: f64) -> f64 {
        let avg = self.rolling_avg.add(power);
        self.sum_fourth_power += avg.powi(4);
        self.count += 1;
        self.value()
    }

    /// Get the current Normalized Power.
    pub fn normalized_power(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.value())
        }
    }

    fn value(&self) -> f64 {
        (self.sum_fourth_power / self.count as f64).powf(0.25)
    }

    /// Number of samples fed so far.
    pub fn samples(&self) -> u64 {
        self.count
    }
}

impl Default for NormalizedPowerCalculator {
    fn default() -> Self {
        Self::new()
    }
}

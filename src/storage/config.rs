//! Application configuration.
//!
//! Loaded from `config.toml` in the platform data directory. A missing file
//! yields the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Recording and checkpoint settings
    #[serde(default)]
    pub recording: RecordingSettings,
    /// Reading validation and aggregation settings
    #[serde(default)]
    pub sensors: NormalizerSettings,
    /// Trainer control settings
    #[serde(default)]
    pub trainer: TrainerSettings,
    /// Training load settings
    #[serde(default)]
    pub training_load: TrainingLoadSettings,
    /// Fallback capability values
    #[serde(default)]
    pub defaults: CapabilityDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            recording: RecordingSettings::default(),
            sensors: NormalizerSettings::default(),
            trainer: TrainerSettings::default(),
            training_load: TrainingLoadSettings::default(),
            defaults: CapabilityDefaults::default(),
        }
    }
}

/// Recording-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Checkpoint interval in seconds of session time
    pub checkpoint_interval_secs: u32,
    /// Number of checkpoints retained per session
    pub keep_checkpoints: u32,
    /// Consecutive write failures before a durability warning is raised
    pub durability_warning_after: u32,
    /// How far the logical clock trails the wall clock, in milliseconds
    pub tick_lag_ms: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval_secs: 30,
            keep_checkpoints: 3,
            durability_warning_after: 3,
            tick_lag_ms: 1000,
        }
    }
}

/// An inclusive plausibility range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Check whether a value falls inside the range.
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Reading validation and aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    /// Heart rate range in BPM
    pub heart_rate: ValueRange,
    /// Power range in watts
    pub power: ValueRange,
    /// Cadence range in RPM
    pub cadence: ValueRange,
    /// Speed range in m/s
    pub speed: ValueRange,
    /// Grade range in percent
    pub grade: ValueRange,
    /// Altitude range in meters
    pub altitude: ValueRange,
    /// Worst acceptable horizontal accuracy for position fixes, in meters
    pub max_position_accuracy_m: f64,
    /// Implied speed between fixes above which a fix is discarded, in m/s
    pub max_position_speed_mps: f64,
    /// Silence after which a metric is reported unavailable, in seconds
    pub sensor_timeout_secs: u32,
    /// Rolling window spans in seconds
    pub window_spans_secs: Vec<u32>,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            heart_rate: ValueRange::new(30.0, 250.0),
            power: ValueRange::new(0.0, 4000.0),
            cadence: ValueRange::new(0.0, 250.0),
            speed: ValueRange::new(0.0, 40.0),
            grade: ValueRange::new(-40.0, 40.0),
            altitude: ValueRange::new(-500.0, 9000.0),
            max_position_accuracy_m: 50.0,
            max_position_speed_mps: 40.0,
            sensor_timeout_secs: 5,
            window_spans_secs: vec![3, 10, 30],
        }
    }
}

/// Trainer control settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerSettings {
    /// Bounded wait for a command response, in milliseconds
    pub command_timeout_ms: u64,
    /// Bike mass added to rider weight for grade compensation, in kg
    pub bike_weight_kg: f64,
    /// Coefficient of rolling resistance sent with simulation parameters
    pub rolling_resistance: f64,
    /// Wind speed sent with simulation parameters, in m/s
    pub wind_speed_mps: f64,
    /// Smallest change in commanded power worth re-sending, in watts
    pub min_power_delta_w: f64,
    /// Smallest change in simulated grade worth re-sending, in percent
    pub min_grade_delta_pct: f64,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            command_timeout_ms: 2000,
            bike_weight_kg: 10.0,
            rolling_resistance: 0.004,
            wind_speed_mps: 0.0,
            min_power_delta_w: 1.0,
            min_grade_delta_pct: 0.1,
        }
    }
}

/// Training load settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingLoadSettings {
    /// Chronic load time constant in days
    pub ctl_days: f64,
    /// Acute load time constant in days
    pub atl_days: f64,
    /// Sessions re-scored per batch chunk
    pub rescore_batch_size: usize,
}

impl Default for TrainingLoadSettings {
    fn default() -> Self {
        Self {
            ctl_days: 42.0,
            atl_days: 7.0,
            rescore_batch_size: 50,
        }
    }
}

/// Values used when no capability record applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityDefaults {
    /// Threshold power in watts
    pub threshold_power_w: f64,
    /// Threshold heart rate in BPM
    pub threshold_heart_rate_bpm: f64,
    /// Athlete weight in kg
    pub weight_kg: f64,
}

impl Default for CapabilityDefaults {
    fn default() -> Self {
        Self {
            threshold_power_w: 200.0,
            threshold_heart_rate_bpm: 170.0,
            weight_kg: 75.0,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ridekeeper", "RideKeeper")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load application configuration from a specific file.
pub fn load_config_from(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        let config = AppConfig {
            data_dir: get_data_dir(),
            ..Default::default()
        };
        return Ok(config);
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.data_dir = get_data_dir();

    Ok(config)
}

/// Save application configuration to a file.
pub fn save_config_to(config: &AppConfig, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

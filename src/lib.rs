//! RideKeeper - session recording and training load
//!
//! Records fitness sessions from live sensor readings: validates and
//! aggregates readings, derives live training metrics, executes structured
//! plans, controls smart trainers, checkpoints for crash recovery, and
//! maintains long-term training load from stored sessions.

pub mod metrics;
pub mod recording;
pub mod sensors;
pub mod storage;
pub mod trainer;
pub mod workouts;

// Re-export commonly used types
pub use metrics::analytics::TrainingLoadEngine;
pub use metrics::calculator::LiveMetricsEngine;
pub use recording::recorder::SessionRecorder;
pub use recording::runtime::{SessionHandle, SessionRuntime};
pub use sensors::normalizer::ReadingNormalizer;
pub use storage::config::AppConfig;
pub use trainer::engine::TrainerControlEngine;
pub use workouts::engine::PlanExecutor;

//! Post-session training analytics.
//!
//! - Training load (CTL/ATL/TSB) from stored session scores
//! - Session scoring and retroactive re-scoring
//! - Capability progression

pub mod error;
pub mod progression;
pub mod training_load;

pub use error::{AnalyticsError, AnalyticsResult};
pub use progression::{Progression, ProgressionTrend};
pub use training_load::{
    score_session, DailyLoad, LoadTrend, RescoreReport, SessionScore, TrainingLoad,
    TrainingLoadCalculator, TrainingLoadEngine,
};

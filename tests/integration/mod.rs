//! Integration test modules.

mod recording_test;
mod recovery_test;
mod runtime_test;
mod trainer_plan_test;
mod training_load_test;

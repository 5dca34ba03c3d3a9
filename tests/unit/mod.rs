//! Unit test modules.

mod normalizer_test;
mod plan_executor_test;
mod trainer_protocol_test;
mod window_test;
mod zones_test;

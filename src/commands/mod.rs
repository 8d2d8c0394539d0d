pub mod benchmark;
pub mod copy_datasets;
pub mod fetch;
pub mod init_store;
pub mod predict;
pub mod prepare;
pub mod render;

pub const TRAIN_DATASET: &str = crate::handler::TRAIN_DATASET;
pub const TEST_DATASET: &str = "test";
pub const VALID_DATASET: &str = crate::handler::VALID_DATASET;
pub const BENCHMARK_DATASET: &str = "benchmark";
pub const PREDICTIONS_PREFIX: &str = "predictions";

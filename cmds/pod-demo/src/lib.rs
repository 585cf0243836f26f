pub mod config;
pub mod driver;
pub mod error;
pub mod k8s;
pub mod prompt;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod workload;

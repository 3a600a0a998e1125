pub mod config;
pub mod engine;
pub mod otp;
pub mod pool;
pub mod report;
pub mod runner;
pub mod sink;

pub use config::{AuthProtocol, Cli, LoadTestConfig};
pub use report::LoadTestReport;

pub async fn run_load_test(config: LoadTestConfig) -> anyhow::Result<LoadTestReport> {
    engine::run(config).await
}

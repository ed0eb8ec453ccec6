// src/main.rs
use anyhow::{Context, Result};
use log::info;

use offpolicy_lib::benchmark::run_synthetic_benchmark;
use offpolicy_lib::config::BenchmarkConfig;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = BenchmarkConfig::from_env();
    info!("Starting off-policy evaluation benchmark with {:?}", config);

    let report = run_synthetic_benchmark(config)
        .await
        .context("Synthetic benchmark failed")?;

    for (name, stats) in &report.estimators {
        info!(
            "{:<24} {} mean={:.4} std={:.4}",
            name,
            report.metric.as_str(),
            stats.mean,
            stats.std
        );
    }

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize benchmark report")?;
    println!("{}", json);
    Ok(())
}

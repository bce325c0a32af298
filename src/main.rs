use anyhow::Context;
use quota_guard::{config::GuardConfig, init_tracing, run};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/quota-guard.yaml".to_string());

    let config = GuardConfig::from_file(&config_path).with_context(|| {
        format!(
            "Failed to load configuration from {} (usage: quota-guard [config_file])",
            config_path
        )
    })?;

    init_tracing(config.server.json_logs);

    run(config).await.context("Quota guard error")?;

    Ok(())
}

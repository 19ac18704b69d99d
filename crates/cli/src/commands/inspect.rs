//! `skillbus list`, `health` and `stats`: read-only views of a fresh runtime.

use serde_json::json;
use skillbus_config::AppConfig;

use super::{print_json, start_runtime};

pub async fn list(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = start_runtime(config).await?;
    let skills = runtime.skills().list_skills();
    runtime.shutdown().await;
    print_json(&skills)
}

pub async fn health(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = start_runtime(config).await?;
    let health = runtime.skills().health_check();
    runtime.shutdown().await;
    print_json(&health)
}

pub async fn stats(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = start_runtime(config).await?;
    let report = json!({
        "skills": runtime.skills().get_stats(),
        "event_bus": runtime.bus().get_stats(),
    });
    runtime.shutdown().await;
    print_json(&report)
}

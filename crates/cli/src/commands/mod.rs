pub mod config_cmd;
pub mod doctor;
pub mod exec;
pub mod inspect;

use std::path::Path;

use serde::Serialize;
use skillbus_config::{AppConfig, ConfigError};
use skillbus_core::TaskContext;
use skillbus_runtime::Runtime;

/// Load `path` if given, otherwise the default location. Env overrides
/// apply in both cases.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    AppConfig::load_with_path(path)
}

/// Start a runtime with the built-in skills.
pub async fn start_runtime(config: AppConfig) -> Result<Runtime, Box<dyn std::error::Error>> {
    let runtime = Runtime::start(config, skillbus_skills::default_catalog()).await?;
    if !runtime.all_ready() {
        tracing::warn!("Some skills failed to initialize; see log above");
    }
    Ok(runtime)
}

/// Parse `--context`; absent means an empty context.
pub fn parse_context(raw: Option<&str>) -> Result<TaskContext, Box<dyn std::error::Error>> {
    let Some(raw) = raw else {
        return Ok(TaskContext::new());
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("--context is not valid JSON: {e}"))?;
    if !value.is_object() {
        return Err("--context must be a JSON object".into());
    }
    Ok(TaskContext::from_value(value)?)
}

pub fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

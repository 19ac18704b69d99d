//! `skillbus exec` and `skillbus capability`: run tasks.

use skillbus_config::AppConfig;
use skillbus_core::Capability;

use super::{parse_context, print_json, start_runtime};

pub async fn run(
    config: AppConfig,
    skill: &str,
    task: &str,
    context: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let context = parse_context(context)?;
    let runtime = start_runtime(config).await?;

    let result = runtime.skills().execute_skill(skill, task, &context).await;
    runtime.shutdown().await;

    print_json(&result)?;
    if !result.success {
        return Err(format!("skill '{skill}' failed").into());
    }
    Ok(())
}

pub async fn by_capability(
    config: AppConfig,
    capability: Capability,
    task: &str,
    context: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let context = parse_context(context)?;
    let runtime = start_runtime(config).await?;

    let results = runtime
        .skills()
        .execute_by_capability(capability, task, &context)
        .await;
    runtime.shutdown().await;

    print_json(&results)?;
    if results.is_empty() {
        eprintln!("No ready skills provide '{capability}'");
    }
    Ok(())
}

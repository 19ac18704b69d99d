//! `skillbus doctor`: diagnose configuration and skill health.

use std::path::Path;

use skillbus_config::{AppConfig, ConfigError};
use skillbus_runtime::Runtime;
use skillbus_skills::default_catalog;

pub async fn run(
    path: Option<&Path>,
    loaded: Result<AppConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 SkillBus Doctor: System Diagnostics");
    println!("======================================\n");

    let mut issues = 0;

    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path);
    if config_path.exists() {
        println!("  ✅ Config file found at {}", config_path.display());
    } else {
        println!("  ⚠️  No config file, using defaults (run `skillbus config --init`)");
        issues += 1;
    }

    let config = match loaded {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            summarize(issues + 1);
            return Ok(());
        }
    };

    // Every enabled skill must exist and accept its config table
    let catalog = default_catalog();
    for name in config.skills.enabled_or(catalog.names()) {
        if !catalog.contains(&name) {
            println!("  ❌ Unknown skill '{name}' in skills.enabled");
            issues += 1;
            continue;
        }
        match catalog.instantiate(&name, &config.skills.settings_for(&name)) {
            Ok(_) => println!("  ✅ Skill '{name}' configured"),
            Err(e) => {
                println!("  ❌ Skill '{name}': {e}");
                issues += 1;
            }
        }
    }

    // Start everything once and check health
    match Runtime::start(config, catalog).await {
        Ok(runtime) => {
            for (name, health) in runtime.skills().health_check() {
                if health.healthy {
                    println!("  ✅ Skill '{name}' healthy ({})", health.status);
                } else {
                    println!("  ❌ Skill '{name}' unhealthy ({})", health.status);
                    issues += 1;
                }
            }
            if !runtime.all_ready() {
                println!("  ❌ Some skills failed to initialize (rerun with -v for details)");
                issues += 1;
            }
            if !runtime.shutdown().await {
                println!("  ⚠️  Some skills did not clean up cleanly");
                issues += 1;
            }
        }
        Err(e) => {
            println!("  ❌ Runtime failed to start: {e}");
            issues += 1;
        }
    }

    summarize(issues);
    Ok(())
}

fn summarize(issues: usize) {
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }
}

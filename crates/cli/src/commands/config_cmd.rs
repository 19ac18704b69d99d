//! `skillbus config`: show, locate, or initialize the configuration file.

use std::path::Path;

use skillbus_config::AppConfig;

pub fn show(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(target: &Path) {
    println!("{}", target.display());
}

/// Write the default configuration to `target`. Refuses to overwrite an
/// existing file unless `force` is set.
pub fn init(target: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if target.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            target.display()
        )
        .into());
    }
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(target, AppConfig::default_toml())?;
    println!("✅ Wrote default config to {}", target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_loadable_config_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("config.toml");

        init(&target, false).unwrap();
        let loaded = AppConfig::load_from(&target).unwrap();
        assert_eq!(loaded.event_bus.history_size, 100);

        assert!(init(&target, false).is_err());
        assert!(init(&target, true).is_ok());
    }
}

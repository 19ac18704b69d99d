//! Built-in skills for SkillBus.
//!
//! Each skill reads its own table from `[skills.<name>]`; missing keys fall
//! back to the defaults on the skill's config struct.

pub mod code;
pub mod memory;
pub mod research;
pub mod system;
pub mod workspace;

pub use code::CodeSkill;
pub use memory::MemorySkill;
pub use research::ResearchSkill;
pub use system::SystemSkill;

use serde::de::DeserializeOwned;
use skillbus_core::{SkillCatalog, SkillError};

/// Create a catalog with all built-in skills registered.
pub fn default_catalog() -> SkillCatalog {
    let mut catalog = SkillCatalog::new();
    catalog.register_fn("research", |config| {
        Ok(Box::new(ResearchSkill::from_config(config)?))
    });
    catalog.register_fn("code", |config| Ok(Box::new(CodeSkill::from_config(config)?)));
    catalog.register_fn("memory", |config| {
        Ok(Box::new(MemorySkill::from_config(config)?))
    });
    catalog.register_fn("system", |config| {
        Ok(Box::new(SystemSkill::from_config(config)?))
    });
    catalog
}

/// Deserialize a skill's config slice. `null` yields the defaults.
pub(crate) fn parse_config<T>(skill: &str, config: &serde_json::Value) -> Result<T, SkillError>
where
    T: DeserializeOwned + Default,
{
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone())
        .map_err(|e| SkillError::InvalidConfig(format!("{skill}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_catalog_has_all_builtins() {
        let catalog = default_catalog();
        assert_eq!(catalog.names(), vec!["code", "memory", "research", "system"]);
    }

    #[test]
    fn builtins_instantiate_from_empty_config() {
        let catalog = default_catalog();
        for name in catalog.names() {
            let skill = catalog.instantiate(&name, &json!(null)).unwrap();
            assert_eq!(skill.describe().name, name);
        }
    }

    #[test]
    fn bad_config_is_rejected() {
        let catalog = default_catalog();
        let err = catalog
            .instantiate("research", &json!({"max_cache_size": "lots"}))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Invalid configuration"));
    }
}

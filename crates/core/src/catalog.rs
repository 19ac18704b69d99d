//! Skill catalog: name → factory.
//!
//! The catalog knows how to build skills; it holds no live instances.
//! It is an ordinary owned value handed to the manager, so separate
//! managers (and tests) never share registrations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result, SkillError};
use crate::skill::Skill;

/// Builds a fresh skill from its configuration slice.
pub type SkillFactory =
    Arc<dyn Fn(&serde_json::Value) -> std::result::Result<Box<dyn Skill>, SkillError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct SkillCatalog {
    factories: HashMap<String, SkillFactory>,
}

impl SkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Replaces (and returns) any previous factory with
    /// the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: SkillFactory) -> Option<SkillFactory> {
        self.factories.insert(name.into(), factory)
    }

    /// Register a plain function or closure as a factory.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, factory: F) -> Option<SkillFactory>
    where
        F: Fn(&serde_json::Value) -> std::result::Result<Box<dyn Skill>, SkillError>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Arc::new(factory))
    }

    pub fn get(&self, name: &str) -> Option<SkillFactory> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build a new instance of `name` from `config`.
    pub fn instantiate(&self, name: &str, config: &serde_json::Value) -> Result<Box<dyn Skill>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownSkill(name.to_string()))?;
        Ok(factory(config)?)
    }
}

impl fmt::Debug for SkillCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillCatalog")
            .field("skills", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SkillContext;
    use crate::skill::{ExecutionResult, SkillMetadata, TaskContext};
    use async_trait::async_trait;
    use serde_json::json;

    struct Named(String);

    #[async_trait]
    impl Skill for Named {
        fn describe(&self) -> SkillMetadata {
            SkillMetadata::new(self.0.clone(), "1.0.0", "test skill")
        }
        async fn initialize(&self, _ctx: &SkillContext<'_>) -> std::result::Result<(), SkillError> {
            Ok(())
        }
        async fn execute(
            &self,
            _task: &str,
            _context: &TaskContext,
        ) -> std::result::Result<ExecutionResult, SkillError> {
            Ok(ExecutionResult::ok(json!(self.0)))
        }
    }

    fn named_factory(config: &serde_json::Value) -> std::result::Result<Box<dyn Skill>, SkillError> {
        let label = config["label"].as_str().unwrap_or("default").to_string();
        Ok(Box::new(Named(label)))
    }

    #[test]
    fn register_lookup_and_names() {
        let mut catalog = SkillCatalog::new();
        assert!(catalog.is_empty());
        assert!(catalog.register_fn("b", named_factory).is_none());
        catalog.register_fn("a", named_factory);
        assert_eq!(catalog.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(catalog.contains("a"));
        assert!(catalog.get("missing").is_none());
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn register_overwrites_existing() {
        let mut catalog = SkillCatalog::new();
        catalog.register_fn("x", named_factory);
        let previous = catalog.register_fn("x", |_cfg: &serde_json::Value| {
            Err(SkillError::InvalidConfig("always".into()))
        });
        assert!(previous.is_some());
        assert_eq!(catalog.len(), 1);
        assert!(matches!(
            catalog.instantiate("x", &json!({})),
            Err(Error::Skill(SkillError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn instantiate_passes_config_through() {
        let mut catalog = SkillCatalog::new();
        catalog.register_fn("named", named_factory);
        let skill = catalog.instantiate("named", &json!({"label": "custom"})).unwrap();
        assert_eq!(skill.describe().name, "custom");

        let err = catalog.instantiate("nope", &json!({})).err().unwrap();
        assert!(matches!(err, Error::UnknownSkill(name) if name == "nope"));
    }

    #[test]
    fn clones_are_independent() {
        let mut original = SkillCatalog::new();
        original.register_fn("a", named_factory);
        let mut copy = original.clone();
        copy.register_fn("b", named_factory);
        assert_eq!(original.len(), 1);
        assert_eq!(copy.len(), 2);
    }
}

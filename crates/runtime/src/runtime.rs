//! Runtime: wires a bus and a skills manager from configuration.

use std::sync::Arc;

use skillbus_config::{AppConfig, ConfigError};
use skillbus_core::{EventBus, SkillCatalog};
use tracing::info;

use crate::manager::SkillsManager;

pub struct Runtime {
    bus: EventBus,
    skills: Arc<SkillsManager>,
    all_ready: bool,
}

impl Runtime {
    /// Validate `config`, start the bus, then initialize every enabled skill.
    ///
    /// A skill that fails to come up does not fail the runtime; check
    /// [`all_ready`](Self::all_ready) to decide whether to proceed.
    pub async fn start(config: AppConfig, catalog: SkillCatalog) -> Result<Self, ConfigError> {
        config.validate()?;

        let bus = EventBus::new(config.event_bus.to_bus_options());
        bus.start().await;

        let skills = Arc::new(SkillsManager::new(bus.clone(), catalog, config.skills));
        let all_ready = skills.initialize().await;
        info!(all_ready, skills = skills.list_skills().len(), "Runtime started");

        Ok(Self {
            bus,
            skills,
            all_ready,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn skills(&self) -> &Arc<SkillsManager> {
        &self.skills
    }

    /// Whether every attempted skill initialized at startup.
    pub fn all_ready(&self) -> bool {
        self.all_ready
    }

    /// Clean up all skills, then stop the bus. Returns whether every skill
    /// cleaned up successfully.
    pub async fn shutdown(&self) -> bool {
        let clean = self.skills.cleanup().await;
        self.bus.stop().await;
        info!(clean, "Runtime stopped");
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillbus_core::{Capability, TaskContext};
    use std::collections::BTreeMap;

    fn config_in(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.event_bus.poll_interval_ms = 20;
        config.skills.enabled = Some(vec!["research".into(), "memory".into(), "code".into()]);
        config.skills.settings = BTreeMap::from([
            (
                "memory".to_string(),
                serde_json::json!({"memory_file": dir.join("memory.json")}),
            ),
            (
                "code".to_string(),
                serde_json::json!({"workspace_path": dir}),
            ),
        ]);
        config
    }

    #[tokio::test]
    async fn start_execute_and_shutdown_with_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::start(config_in(dir.path()), skillbus_skills::default_catalog())
            .await
            .unwrap();
        assert!(runtime.all_ready());
        assert!(runtime.bus().is_running());
        assert_eq!(runtime.skills().list_skills().len(), 3);

        let ctx = TaskContext::new().with("persistent", true).with("key", "k");
        let stored = runtime.skills().execute_skill("memory", "remember", &ctx).await;
        assert!(stored.success);

        let research = runtime
            .skills()
            .execute_by_capability(Capability::Research, "rust", &TaskContext::new())
            .await;
        assert_eq!(research.len(), 1);
        assert_eq!(research[0].skill, "research");

        assert!(runtime.shutdown().await);
        assert!(!runtime.bus().is_running());
        assert!(runtime.skills().list_skills().is_empty());
        assert!(dir.path().join("memory.json").exists());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_start() {
        let mut config = AppConfig::default();
        config.event_bus.max_queue_size = 0;
        let result = Runtime::start(config, skillbus_skills::default_catalog()).await;
        assert!(result.is_err());
    }
}

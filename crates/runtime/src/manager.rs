//! Skills manager: owns the live skill registry.
//!
//! Lifecycle operations (initialize, reload, add, remove, cleanup) run one
//! at a time under an async mutex. Executions only take a short read lock to
//! find the host, so they run concurrently with each other and with
//! lifecycle changes; the host itself refuses work once it is torn down.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde_json::json;
use skillbus_config::SkillsConfig;
use skillbus_core::{
    Capability, EventBus, EventPriority, ExecutionResult, Metadata, SkillCatalog, SkillFactory,
    SkillHealth, SkillHost, SkillStats, SkillStatus, TaskContext,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Read-only view of one registered skill.
#[derive(Debug, Clone, Serialize)]
pub struct SkillInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub status: SkillStatus,
    pub capabilities: Vec<Capability>,
    pub experimental: bool,
}

/// One entry of an [`SkillsManager::execute_by_capability`] fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityResult {
    pub skill: String,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub total_skills: usize,
    pub enabled_skills: Vec<String>,
    pub experimental_skills: Vec<String>,
    pub skills: BTreeMap<String, SkillStats>,
}

pub struct SkillsManager {
    bus: EventBus,
    config: SkillsConfig,
    enabled: Vec<String>,
    catalog: RwLock<SkillCatalog>,
    skills: RwLock<BTreeMap<String, Arc<SkillHost>>>,
    lifecycle: Mutex<()>,
}

impl SkillsManager {
    /// The enabled list defaults to every name in `catalog`.
    pub fn new(bus: EventBus, catalog: SkillCatalog, config: SkillsConfig) -> Self {
        let enabled = config.enabled_or(catalog.names());
        info!(enabled = ?enabled, "Skills manager created");
        Self {
            bus,
            config,
            enabled,
            catalog: RwLock::new(catalog),
            skills: RwLock::new(BTreeMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Names the catalog can build, registered or not.
    pub fn available_skills(&self) -> Vec<String> {
        read(&self.catalog).names()
    }

    /// Start every enabled skill. Unknown names are skipped with a warning
    /// and do not count as attempts. Returns true only if every attempted
    /// skill came up; skills that did are kept either way.
    pub async fn initialize(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        info!(count = self.enabled.len(), "Initializing skills");

        let mut attempted = 0usize;
        let mut succeeded = 0usize;
        for name in &self.enabled {
            if !read(&self.catalog).contains(name) {
                warn!(skill = %name, "Unknown skill, skipping");
                continue;
            }
            attempted += 1;
            if self.start_skill(name).await {
                succeeded += 1;
            }
        }
        self.check_requirements();

        let live = self.registered_names();
        info!(success_count = succeeded, total_count = attempted, "Skills initialized");
        self.bus.publish_with(
            "skills.initialized",
            json!({
                "success_count": succeeded,
                "total_count": attempted,
                "skills": live,
            }),
            "SkillsManager",
            EventPriority::High,
            Metadata::new(),
        );

        succeeded == attempted
    }

    pub async fn execute_skill(
        &self,
        name: &str,
        task: &str,
        context: &TaskContext,
    ) -> ExecutionResult {
        let Some(host) = self.get_skill(name) else {
            return ExecutionResult::failure(format!(
                "Skill '{name}' not found or not initialized"
            ));
        };
        if !host.is_ready() {
            return ExecutionResult::failure(format!(
                "Skill '{name}' not ready (status: {})",
                host.status()
            ));
        }
        host.safe_execute(task, context).await
    }

    /// Run `task` on every ready skill that has `capability`, in name order.
    pub async fn execute_by_capability(
        &self,
        capability: Capability,
        task: &str,
        context: &TaskContext,
    ) -> Vec<CapabilityResult> {
        let targets: Vec<Arc<SkillHost>> = read(&self.skills)
            .values()
            .filter(|host| host.has_capability(capability) && host.is_ready())
            .cloned()
            .collect();

        let mut results = Vec::with_capacity(targets.len());
        for host in targets {
            info!(skill = %host.name(), %capability, "Executing task by capability");
            let result = host.safe_execute(task, context).await;
            results.push(CapabilityResult {
                skill: host.name().to_string(),
                result,
            });
        }

        if results.is_empty() {
            warn!(%capability, "No ready skills with capability");
        }
        results
    }

    /// Tear down the live instance (if any) and start a fresh one from the
    /// catalog.
    pub async fn reload_skill(&self, name: &str) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        info!(skill = %name, "Reloading skill");
        if !read(&self.catalog).contains(name) {
            warn!(skill = %name, "Cannot reload a skill missing from the catalog");
            return false;
        }
        let started = self.start_skill(name).await;
        self.check_requirements();
        started
    }

    /// Register `factory` under `name` (replacing any previous factory) and
    /// start it immediately.
    pub async fn add_skill(&self, name: &str, factory: SkillFactory) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        info!(skill = %name, "Adding skill");
        if write(&self.catalog).register(name, factory).is_some() {
            info!(skill = %name, "Replaced existing catalog entry");
        }
        let started = self.start_skill(name).await;
        self.check_requirements();
        started
    }

    /// Clean up `name` and drop it from the registry. Returns `false` only
    /// when no such skill is registered; a failed cleanup is logged and the
    /// skill is removed anyway.
    pub async fn remove_skill(&self, name: &str) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(host) = write(&self.skills).remove(name) else {
            warn!(skill = %name, "Skill not found");
            return false;
        };
        info!(skill = %name, "Removing skill");
        if !host.cleanup().await {
            warn!(skill = %name, "Skill cleanup reported failure during removal");
        }
        true
    }

    pub fn health_check(&self) -> BTreeMap<String, SkillHealth> {
        read(&self.skills)
            .iter()
            .map(|(name, host)| (name.clone(), host.health_check()))
            .collect()
    }

    pub fn get_skill(&self, name: &str) -> Option<Arc<SkillHost>> {
        read(&self.skills).get(name).cloned()
    }

    pub fn list_skills(&self) -> Vec<SkillInfo> {
        read(&self.skills)
            .iter()
            .map(|(name, host)| {
                let meta = host.metadata();
                SkillInfo {
                    name: name.clone(),
                    version: meta.version.clone(),
                    description: meta.description.clone(),
                    status: host.status(),
                    capabilities: host.capabilities().into_iter().collect(),
                    experimental: meta.experimental || self.config.is_experimental(name),
                }
            })
            .collect()
    }

    pub fn get_skills_by_capability(&self, capability: Capability) -> Vec<String> {
        read(&self.skills)
            .iter()
            .filter(|(_, host)| host.has_capability(capability))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Clean up every live skill, then empty the registry. Every skill is
    /// cleaned up even if an earlier one fails.
    pub async fn cleanup(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let hosts = std::mem::take(&mut *write(&self.skills));
        info!(count = hosts.len(), "Cleaning up all skills");

        let mut success = true;
        for (name, host) in hosts {
            if !host.cleanup().await {
                error!(skill = %name, "Skill cleanup failed");
                success = false;
            }
        }
        info!(success, "Skills cleanup complete");
        success
    }

    pub fn get_stats(&self) -> ManagerStats {
        let skills: BTreeMap<String, SkillStats> = read(&self.skills)
            .iter()
            .map(|(name, host)| (name.clone(), host.stats()))
            .collect();
        ManagerStats {
            total_skills: skills.len(),
            enabled_skills: self.enabled.clone(),
            experimental_skills: self.config.experimental.clone(),
            skills,
        }
    }

    // --- Internals ---

    fn registered_names(&self) -> Vec<String> {
        read(&self.skills).keys().cloned().collect()
    }

    /// Build, initialize and register `name`. Caller holds the lifecycle lock.
    async fn start_skill(&self, name: &str) -> bool {
        let previous = write(&self.skills).remove(name);
        if let Some(previous) = previous {
            info!(skill = %name, "Replacing live instance");
            previous.cleanup().await;
        }

        let config = self.config.settings_for(name);
        let skill = match read(&self.catalog).instantiate(name, &config) {
            Ok(skill) => skill,
            Err(e) => {
                error!(skill = %name, error = %e, "Failed to construct skill");
                return false;
            }
        };

        let host = SkillHost::new(name, skill, self.bus.clone(), config);
        if !host.initialize().await {
            error!(skill = %name, "Failed to initialize skill");
            host.cleanup().await;
            return false;
        }

        if host.metadata().experimental || self.config.is_experimental(name) {
            info!(skill = %name, "Experimental skill enabled");
        }
        write(&self.skills).insert(name.to_string(), host);
        info!(skill = %name, "Skill registered");
        true
    }

    fn check_requirements(&self) {
        let skills = read(&self.skills);
        for (name, host) in skills.iter() {
            for required in &host.metadata().requires_skills {
                if !skills.contains_key(required) {
                    warn!(skill = %name, requires = %required, "Required skill is not running");
                }
            }
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

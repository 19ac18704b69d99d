//! Memory skill: short-term ring plus a persisted long-term key/value map.
//!
//! Long-term entries live in a single JSON object on disk (`memory_file`).
//! The file is loaded on initialize, written through on persistent stores,
//! and saved again on optimize and cleanup. A missing file means a fresh
//! store; an unreadable one is logged and replaced on the next save.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use skillbus_core::{
    Capability, ExecutionResult, Metadata, Skill, SkillContext, SkillError, SkillMetadata,
    TaskContext, handler_fn,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::parse_config;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_short_term_memory: usize,
    pub memory_file: PathBuf,
    pub context_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_short_term_memory: 50,
            memory_file: PathBuf::from("memory_store.json"),
            context_window: 10,
        }
    }
}

/// One remembered item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub data: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Important entries survive short-term overflow and optimization
    #[serde(default)]
    pub important: bool,
}

fn default_kind() -> String {
    "general".into()
}

impl MemoryEntry {
    fn from_task(data: &str, context: &TaskContext) -> Self {
        let tags = context
            .get("tags")
            .and_then(|t| t.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let metadata = context
            .get("metadata")
            .and_then(|m| m.as_object())
            .cloned()
            .unwrap_or_default();

        Self {
            data: data.to_string(),
            timestamp: Utc::now(),
            kind: context.get_str("type").map_or_else(default_kind, str::to_string),
            tags,
            metadata,
            important: context.get_bool("important").unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub short_term_count: usize,
    pub long_term_count: usize,
    pub context_window: usize,
    pub total_entries: usize,
}

#[derive(Debug, Default)]
struct State {
    short_term: VecDeque<MemoryEntry>,
    long_term: BTreeMap<String, MemoryEntry>,
}

/// The shared state behind the skill and its event handlers.
pub struct MemoryStore {
    config: MemoryConfig,
    state: RwLock<State>,
    next_key: AtomicU64,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State::default()),
            next_key: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.memory_file
    }

    /// Replace long-term memory with the file's contents.
    pub async fn load(&self) {
        let content = match tokio::fs::read_to_string(self.path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path().display(), "No existing memory file, starting fresh");
                return;
            }
            Err(e) => {
                warn!(path = %self.path().display(), error = %e, "Failed to read memory file");
                return;
            }
        };
        match serde_json::from_str::<BTreeMap<String, MemoryEntry>>(&content) {
            Ok(long_term) => {
                info!(count = long_term.len(), "Loaded long-term memories");
                self.state.write().await.long_term = long_term;
            }
            Err(e) => {
                warn!(path = %self.path().display(), error = %e, "Ignoring corrupted memory file");
            }
        }
    }

    /// Write long-term memory to disk.
    pub async fn save(&self) -> Result<(), SkillError> {
        let content = {
            let state = self.state.read().await;
            serde_json::to_string_pretty(&state.long_term)
                .map_err(|e| SkillError::Storage(format!("Failed to serialize memory: {e}")))?
        };

        if let Some(parent) = self.path().parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SkillError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }
        tokio::fs::write(self.path(), content)
            .await
            .map_err(|e| SkillError::Storage(format!("Failed to write memory file: {e}")))?;
        debug!(path = %self.path().display(), "Saved long-term memory");
        Ok(())
    }

    fn generate_key(&self) -> String {
        let n = self.next_key.fetch_add(1, Ordering::Relaxed);
        format!("memory_{}_{n}", Utc::now().timestamp_micros())
    }

    pub async fn store(&self, data: &str, context: &TaskContext) -> Result<serde_json::Value, SkillError> {
        let entry = MemoryEntry::from_task(data, context);
        let persistent = context.get_bool("persistent").unwrap_or(false);

        let (entry_id, key) = {
            let mut state = self.state.write().await;
            state.short_term.push_back(entry.clone());

            if state.short_term.len() > self.config.max_short_term_memory
                && let Some(oldest) = state.short_term.pop_front()
                && oldest.important
            {
                let key = self.generate_key();
                debug!(key = %key, "Promoted important memory to long-term");
                state.long_term.insert(key, oldest);
            }

            let key = persistent.then(|| {
                let key = context
                    .get_str("key")
                    .map_or_else(|| self.generate_key(), str::to_string);
                state.long_term.insert(key.clone(), entry);
                key
            });
            (state.short_term.len().saturating_sub(1), key)
        };

        if persistent {
            self.save().await?;
        }

        Ok(json!({
            "success": true,
            "stored": true,
            "entry_id": entry_id,
            "key": key,
        }))
    }

    /// Long-term lookup by exact key, then the newest short-term entry whose
    /// data starts with `key`.
    pub async fn retrieve(&self, key: &str) -> serde_json::Value {
        let state = self.state.read().await;
        if let Some(entry) = state.long_term.get(key) {
            return json!({"success": true, "data": entry, "source": "long_term"});
        }
        if let Some(entry) = state.short_term.iter().rev().find(|e| e.data.starts_with(key)) {
            return json!({"success": true, "data": entry, "source": "short_term"});
        }
        json!({"success": false, "data": null, "error": "Memory not found"})
    }

    pub async fn search(&self, query: &str) -> serde_json::Value {
        let needle = query.to_lowercase();
        let state = self.state.read().await;

        let mut results: Vec<serde_json::Value> = state
            .short_term
            .iter()
            .filter(|e| e.data.to_lowercase().contains(&needle))
            .map(|e| json!({"entry": e, "source": "short_term"}))
            .collect();
        results.extend(
            state
                .long_term
                .iter()
                .filter(|(_, e)| e.data.to_lowercase().contains(&needle))
                .map(|(key, e)| json!({"entry": e, "source": "long_term", "key": key})),
        );

        json!({"success": true, "count": results.len(), "results": results})
    }

    /// The most recent `context_window` short-term entries, oldest first.
    pub async fn context(&self) -> serde_json::Value {
        let state = self.state.read().await;
        let skip = state
            .short_term
            .len()
            .saturating_sub(self.config.context_window);
        let recent: Vec<&MemoryEntry> = state.short_term.iter().skip(skip).collect();
        json!({"success": true, "window_size": recent.len(), "context": recent})
    }

    /// Drop entries older than 24 hours unless marked important, then save.
    pub async fn optimize(&self) -> Result<serde_json::Value, SkillError> {
        let cutoff = Utc::now() - Duration::hours(24);
        let keep = |e: &MemoryEntry| e.important || e.timestamp > cutoff;

        let summary = {
            let mut state = self.state.write().await;
            let short_before = state.short_term.len();
            let long_before = state.long_term.len();
            state.short_term.retain(|e| keep(e));
            state.long_term.retain(|_, e| keep(e));
            json!({
                "success": true,
                "short_term_removed": short_before - state.short_term.len(),
                "long_term_removed": long_before - state.long_term.len(),
                "current_short_term": state.short_term.len(),
                "current_long_term": state.long_term.len(),
            })
        };

        self.save().await?;
        info!(%summary, "Memory optimized");
        Ok(summary)
    }

    pub async fn clear_short_term(&self) -> usize {
        let mut state = self.state.write().await;
        let cleared = state.short_term.len();
        state.short_term.clear();
        cleared
    }

    pub async fn stats(&self) -> MemoryStats {
        let state = self.state.read().await;
        MemoryStats {
            short_term_count: state.short_term.len(),
            long_term_count: state.long_term.len(),
            context_window: self.config.context_window,
            total_entries: state.short_term.len() + state.long_term.len(),
        }
    }
}

pub struct MemorySkill {
    store: Arc<MemoryStore>,
}

impl MemorySkill {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::new(config)),
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, SkillError> {
        Ok(Self::new(parse_config("memory", config)?))
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl Skill for MemorySkill {
    fn describe(&self) -> SkillMetadata {
        SkillMetadata::new(
            "memory",
            "1.0.0",
            "Short-term and long-term memory with context management",
        )
        .with_capabilities([Capability::Memory])
    }

    async fn initialize(&self, ctx: &SkillContext<'_>) -> Result<(), SkillError> {
        self.store.load().await;

        let store = Arc::clone(&self.store);
        let publisher = ctx.publisher();
        ctx.subscribe(
            "memory.store",
            handler_fn("memory.store", move |event| {
                let store = Arc::clone(&store);
                let publisher = publisher.clone();
                async move {
                    let data = event.payload["data"].as_str().unwrap_or_default();
                    let context =
                        TaskContext::from_value(event.payload["context"].clone()).unwrap_or_default();
                    let result = store.store(data, &context).await.unwrap_or_else(|e| {
                        json!({"success": false, "stored": false, "error": e.to_string()})
                    });
                    publisher.publish("memory.stored", result);
                    Ok(())
                }
            }),
        );

        let store = Arc::clone(&self.store);
        let publisher = ctx.publisher();
        ctx.subscribe(
            "memory.retrieve",
            handler_fn("memory.retrieve", move |event| {
                let store = Arc::clone(&store);
                let publisher = publisher.clone();
                async move {
                    let key = event.payload["key"].as_str().unwrap_or_default();
                    publisher.publish("memory.retrieved", store.retrieve(key).await);
                    Ok(())
                }
            }),
        );

        let store = Arc::clone(&self.store);
        let publisher = ctx.publisher();
        ctx.subscribe(
            "memory.clear",
            handler_fn("memory.clear", move |_event| {
                let store = Arc::clone(&store);
                let publisher = publisher.clone();
                async move {
                    let cleared = store.clear_short_term().await;
                    info!(cleared, "Cleared short-term memory");
                    publisher.publish("memory.cleared", json!({"success": true}));
                    Ok(())
                }
            }),
        );

        Ok(())
    }

    async fn execute(
        &self,
        task: &str,
        context: &TaskContext,
    ) -> Result<ExecutionResult, SkillError> {
        let operation = context.get_str("operation").unwrap_or("store");
        let outcome = match operation {
            "store" => self.store.store(task, context).await?,
            "retrieve" => {
                let key = context.get_str("key").unwrap_or(task);
                self.store.retrieve(key).await
            }
            "search" => self.store.search(task).await,
            "get_context" => self.store.context().await,
            "optimize" => self.store.optimize().await?,
            "stats" => json!({"success": true, "stats": self.store.stats().await}),
            other => {
                return Ok(ExecutionResult::failure(format!("Unknown operation: {other}")));
            }
        };

        if outcome["success"].as_bool().unwrap_or(false) {
            return Ok(ExecutionResult::ok(outcome));
        }
        let mut result =
            ExecutionResult::failure(outcome["error"].as_str().unwrap_or("Memory operation failed"));
        result.result = outcome;
        Ok(result)
    }

    async fn cleanup(&self, _ctx: &SkillContext<'_>) -> Result<(), SkillError> {
        let saved = self.store.save().await;
        self.store.clear_short_term().await;
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillbus_core::{BusOptions, EventBus, SkillHost};

    fn skill_at(path: &Path, max_short_term: usize) -> MemorySkill {
        MemorySkill::new(MemoryConfig {
            max_short_term_memory: max_short_term,
            memory_file: path.to_path_buf(),
            context_window: 3,
        })
    }

    fn op(operation: &str) -> TaskContext {
        TaskContext::new().with("operation", operation)
    }

    #[tokio::test]
    async fn store_then_retrieve_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let skill = skill_at(&dir.path().join("mem.json"), 50);

        let stored = skill.execute("favourite colour is green", &TaskContext::new()).await.unwrap();
        assert!(stored.success);
        assert_eq!(stored.result["entry_id"], 0);

        let found = skill
            .execute("favourite", &op("retrieve"))
            .await
            .unwrap();
        assert!(found.success);
        assert_eq!(found.result["source"], "short_term");
        assert_eq!(found.result["data"]["data"], "favourite colour is green");
        assert_eq!(found.result["data"]["type"], "general");

        let missing = skill.execute("nothing", &op("retrieve")).await.unwrap();
        assert!(!missing.success);
        assert_eq!(missing.error.as_deref(), Some("Memory not found"));
    }

    #[tokio::test]
    async fn persistent_store_writes_through_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mem.json");
        let skill = skill_at(&path, 50);

        let ctx = TaskContext::new()
            .with("persistent", true)
            .with("key", "user_name")
            .with("tags", json!(["profile"]));
        let stored = skill.execute("Ada", &ctx).await.unwrap();
        assert_eq!(stored.result["key"], "user_name");
        assert!(path.exists());

        let reloaded = MemoryStore::new(MemoryConfig {
            memory_file: path.clone(),
            ..MemoryConfig::default()
        });
        reloaded.load().await;
        let found = reloaded.retrieve("user_name").await;
        assert_eq!(found["source"], "long_term");
        assert_eq!(found["data"]["data"], "Ada");
        assert_eq!(found["data"]["tags"], json!(["profile"]));
    }

    #[tokio::test]
    async fn overflow_promotes_important_entries() {
        let dir = tempfile::tempdir().unwrap();
        let skill = skill_at(&dir.path().join("mem.json"), 2);

        let important = TaskContext::new().with("important", true);
        skill.execute("keep me", &important).await.unwrap();
        skill.execute("second", &TaskContext::new()).await.unwrap();
        skill.execute("third", &TaskContext::new()).await.unwrap();
        skill.execute("fourth", &TaskContext::new()).await.unwrap();

        let stats = skill.store().stats().await;
        assert_eq!(stats.short_term_count, 2);
        // "keep me" was promoted, "second" was dropped.
        assert_eq!(stats.long_term_count, 1);

        let search = skill.execute("KEEP", &op("search")).await.unwrap();
        assert_eq!(search.result["count"], 1);
        assert_eq!(search.result["results"][0]["source"], "long_term");
    }

    #[tokio::test]
    async fn context_window_returns_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let skill = skill_at(&dir.path().join("mem.json"), 50);
        for i in 0..5 {
            skill.execute(&format!("entry {i}"), &TaskContext::new()).await.unwrap();
        }
        let ctx = skill.execute("", &op("get_context")).await.unwrap();
        assert_eq!(ctx.result["window_size"], 3);
        assert_eq!(ctx.result["context"][0]["data"], "entry 2");
        assert_eq!(ctx.result["context"][2]["data"], "entry 4");
    }

    #[tokio::test]
    async fn optimize_drops_stale_unimportant_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mem.json");
        let skill = skill_at(&path, 50);
        skill.execute("fresh", &TaskContext::new()).await.unwrap();
        {
            let mut state = skill.store().state.write().await;
            let old = Utc::now() - Duration::hours(48);
            let stale = |data: &str, important: bool| MemoryEntry {
                data: data.into(),
                timestamp: old,
                kind: default_kind(),
                tags: vec![],
                metadata: Metadata::new(),
                important,
            };
            state.short_term.push_back(stale("old short", false));
            state.long_term.insert("old".into(), stale("old long", false));
            state.long_term.insert("vital".into(), stale("old vital", true));
        }

        let result = skill.execute("", &op("optimize")).await.unwrap();
        assert!(result.success);
        assert_eq!(result.result["short_term_removed"], 1);
        assert_eq!(result.result["long_term_removed"], 1);
        assert_eq!(result.result["current_long_term"], 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn corrupted_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mem.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = MemoryStore::new(MemoryConfig {
            memory_file: path,
            ..MemoryConfig::default()
        });
        store.load().await;
        assert_eq!(store.stats().await.long_term_count, 0);
    }

    #[tokio::test]
    async fn unknown_operation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let skill = skill_at(&dir.path().join("mem.json"), 50);
        let result = skill.execute("x", &op("forget_everything")).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("Unknown operation: forget_everything"));
    }

    #[tokio::test]
    async fn events_store_retrieve_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mem.json");
        let bus = EventBus::new(BusOptions {
            poll_interval: std::time::Duration::from_millis(20),
            ..BusOptions::default()
        });
        bus.start().await;
        let host = SkillHost::new("memory", Box::new(skill_at(&path, 50)), bus.clone(), json!({}));
        assert!(host.initialize().await);

        bus.publish("memory.store", json!({"data": "hello bus"}), "test");
        bus.publish("memory.retrieve", json!({"key": "hello"}), "test");
        bus.publish("memory.clear", json!({}), "test");

        for _ in 0..100 {
            if !bus.get_history(Some("memory.cleared")).is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(bus.get_history(Some("memory.stored"))[0].payload["stored"], true);
        let retrieved = bus.get_history(Some("memory.retrieved"));
        assert_eq!(retrieved[0].payload["data"]["data"], "hello bus");
        assert_eq!(bus.get_history(Some("memory.cleared"))[0].payload["success"], true);

        assert!(host.cleanup().await);
        assert!(path.exists());
        bus.stop().await;
    }
}

//! Research skill: query answering with a bounded result cache.
//!
//! Results are produced offline and deterministically; the skill's job on
//! the bus is the request/response plumbing and the cache.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use skillbus_core::{
    Capability, ExecutionResult, PrivacyLevel, Skill, SkillContext, SkillError, SkillMetadata,
    TaskContext, handler_fn,
};
use tracing::{debug, info};

use crate::parse_config;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub max_cache_size: usize,
    pub search_enabled: bool,
    pub max_results: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 100,
            search_enabled: true,
            max_results: 10,
        }
    }
}

/// Insertion-ordered cache; trims the oldest fifth when it overflows.
#[derive(Debug, Default)]
struct ResultCache {
    entries: HashMap<String, serde_json::Value>,
    order: VecDeque<String>,
}

impl ResultCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: serde_json::Value, max_size: usize) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        if self.entries.len() > max_size {
            let remove = (max_size / 5).max(1);
            for _ in 0..remove {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            debug!(removed = remove, remaining = self.entries.len(), "Trimmed research cache");
        }
    }

    fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.order.clear();
        count
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cache_size: usize,
    pub max_cache_size: usize,
    /// First few keys, oldest first
    pub cache_keys: Vec<String>,
}

pub struct ResearchSkill {
    config: ResearchConfig,
    cache: Arc<Mutex<ResultCache>>,
}

impl ResearchSkill {
    pub fn new(config: ResearchConfig) -> Self {
        Self {
            config,
            cache: Arc::new(Mutex::new(ResultCache::default())),
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, SkillError> {
        Ok(Self::new(parse_config("research", config)?))
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = lock(&self.cache);
        CacheStats {
            cache_size: cache.entries.len(),
            max_cache_size: self.config.max_cache_size,
            cache_keys: cache.order.iter().take(5).cloned().collect(),
        }
    }

    fn cache_key(task: &str, context: &TaskContext) -> String {
        // serde_json maps iterate in key order, so equal contexts give equal keys.
        let context = serde_json::to_string(context.as_map()).unwrap_or_default();
        format!("{task}:{context}")
    }

    fn research(&self, query: &str, context: &TaskContext) -> serde_json::Value {
        let max_results = context
            .get_u64("max_results")
            .map(|n| n as usize)
            .unwrap_or(self.config.max_results);

        let results: Vec<serde_json::Value> = [json!({
            "title": format!("Research result for: {query}"),
            "url": "https://example.com",
            "snippet": format!("Relevant information about {query}..."),
            "relevance": 0.95,
        })]
        .into_iter()
        .take(max_results)
        .collect();

        json!({
            "query": query,
            "result_count": results.len(),
            "results": results,
            "summary": format!("Research summary for query: {query}"),
            "sources": ["example.com"],
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

#[async_trait]
impl Skill for ResearchSkill {
    fn describe(&self) -> SkillMetadata {
        SkillMetadata::new(
            "research",
            "1.0.0",
            "Web search, information gathering, and summarization",
        )
        .with_capabilities([Capability::Research, Capability::Analysis])
        .with_privacy(PrivacyLevel::Cloud)
    }

    async fn initialize(&self, ctx: &SkillContext<'_>) -> Result<(), SkillError> {
        let executor = ctx.executor();
        let publisher = ctx.publisher();
        ctx.subscribe(
            "research.query",
            handler_fn("research.query", move |event| {
                let executor = executor.clone();
                let publisher = publisher.clone();
                async move {
                    debug!(source = %event.source, "Research query event");
                    let query = event.payload["query"].as_str().unwrap_or_default();
                    let context =
                        TaskContext::from_value(event.payload["context"].clone()).unwrap_or_default();
                    let result = executor.execute(query, &context).await;
                    publisher.publish(
                        "research.result",
                        serde_json::to_value(&result).unwrap_or_default(),
                    );
                    Ok(())
                }
            }),
        );

        let cache = Arc::clone(&self.cache);
        let publisher = ctx.publisher();
        ctx.subscribe(
            "research.clear_cache",
            handler_fn("research.clear_cache", move |_event| {
                let cache = Arc::clone(&cache);
                let publisher = publisher.clone();
                async move {
                    let entries = lock(&cache).clear();
                    info!(entries, "Research cache cleared");
                    publisher.publish(
                        "research.cache_cleared",
                        json!({
                            "cleared": true,
                            "entries": entries,
                            "timestamp": Utc::now().to_rfc3339(),
                        }),
                    );
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
        if !self.config.search_enabled {
            return Ok(ExecutionResult::failure(
                "Research skill is disabled in configuration",
            ));
        }
        let query = task.trim();
        if query.is_empty() {
            return Ok(ExecutionResult::failure("Research query is empty"));
        }

        let key = Self::cache_key(query, context);
        if let Some(hit) = lock(&self.cache).get(&key) {
            debug!(query = %query, "Research cache hit");
            return Ok(ExecutionResult::ok(hit).with_metadata("cached", json!(true)));
        }

        info!(query = %query, "Researching");
        let result = self.research(query, context);
        lock(&self.cache).insert(key, result.clone(), self.config.max_cache_size);

        Ok(ExecutionResult::ok(result).with_metadata("cached", json!(false)))
    }

    async fn cleanup(&self, _ctx: &SkillContext<'_>) -> Result<(), SkillError> {
        lock(&self.cache).clear();
        Ok(())
    }
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

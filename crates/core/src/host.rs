//! Skill host: lifecycle, counters and subscriptions for one skill instance.
//!
//! The host wraps a boxed [`Skill`] and is the only place its status
//! changes. Every handler a skill registers through [`SkillContext`] is
//! wrapped in a guard, so once [`SkillHost::cleanup`] returns none of the
//! skill's handlers will run again, even for events already queued.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, error, info, trace, warn};

use crate::bus::EventBus;
use crate::error::{HandlerError, panic_message};
use crate::event::{Event, EventHandler, EventPriority, Metadata, same_handler};
use crate::skill::{Capability, ExecutionResult, Skill, SkillMetadata, SkillStatus, TaskContext};

struct Lifecycle {
    status: SkillStatus,
    in_flight: usize,
}

struct Subscription {
    event_name: String,
    handler: Arc<dyn EventHandler>,
    guarded: Arc<dyn EventHandler>,
}

/// Owner of one live skill instance.
pub struct SkillHost {
    name: String,
    skill: Box<dyn Skill>,
    metadata: SkillMetadata,
    config: serde_json::Value,
    bus: EventBus,
    lifecycle: Mutex<Lifecycle>,
    execution_count: AtomicU64,
    error_count: AtomicU64,
    last_execution: Mutex<Option<DateTime<Utc>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    active: Arc<AtomicBool>,
    // Held shared by running handlers / executions, exclusively by cleanup.
    handler_gate: Arc<RwLock<()>>,
    exec_gate: RwLock<()>,
    this: Weak<SkillHost>,
}

/// Per-skill counters, as reported by health checks and stats.
#[derive(Debug, Clone, Serialize)]
pub struct SkillStats {
    pub name: String,
    pub version: String,
    pub status: SkillStatus,
    pub execution_count: u64,
    pub error_count: u64,
    pub last_execution: Option<DateTime<Utc>>,
    pub subscribed_events: Vec<String>,
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillHealth {
    pub healthy: bool,
    pub status: SkillStatus,
    pub stats: SkillStats,
}

impl SkillHost {
    /// Wrap `skill` under the registry key `name`. The host starts
    /// `Uninitialized`; call [`initialize`](Self::initialize) next.
    pub fn new(
        name: impl Into<String>,
        skill: Box<dyn Skill>,
        bus: EventBus,
        config: serde_json::Value,
    ) -> Arc<Self> {
        let name = name.into();
        let metadata = skill.describe();
        if metadata.name != name {
            debug!(skill = %name, described = %metadata.name, "Skill registered under a different name");
        }

        Arc::new_cyclic(|this| Self {
            name,
            skill,
            metadata,
            config,
            bus,
            lifecycle: Mutex::new(Lifecycle {
                status: SkillStatus::Uninitialized,
                in_flight: 0,
            }),
            execution_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_execution: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            active: Arc::new(AtomicBool::new(true)),
            handler_gate: Arc::new(RwLock::new(())),
            exec_gate: RwLock::new(()),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &SkillMetadata {
        &self.metadata
    }

    pub fn capabilities(&self) -> BTreeSet<Capability> {
        self.skill.capabilities()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn status(&self) -> SkillStatus {
        lock(&self.lifecycle).status
    }

    /// True only in `Ready`; a `Busy` skill is healthy but not ready.
    pub fn is_ready(&self) -> bool {
        self.status() == SkillStatus::Ready
    }

    /// A weak handle for running this skill from its own event handlers.
    pub fn executor(&self) -> SkillExecutor {
        SkillExecutor {
            host: self.this.clone(),
        }
    }

    pub fn subscribed_events(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.subscriptions)
            .iter()
            .map(|s| s.event_name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn stats(&self) -> SkillStats {
        SkillStats {
            name: self.name.clone(),
            version: self.metadata.version.clone(),
            status: self.status(),
            execution_count: self.execution_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_execution: *lock(&self.last_execution),
            subscribed_events: self.subscribed_events(),
            capabilities: self.capabilities().into_iter().collect(),
        }
    }

    /// Healthy means `Ready` or `Busy`.
    pub fn health_check(&self) -> SkillHealth {
        let stats = self.stats();
        SkillHealth {
            healthy: matches!(stats.status, SkillStatus::Ready | SkillStatus::Busy),
            status: stats.status,
            stats,
        }
    }

    // --- Lifecycle ---

    /// Run the skill's setup. `Ready` on success, `Error` otherwise; on
    /// failure every subscription made during setup is removed again.
    pub async fn initialize(&self) -> bool {
        if !self.transition(SkillStatus::Initializing) {
            return false;
        }
        info!(skill = %self.name, version = %self.metadata.version, "Initializing skill");

        let ctx = SkillContext { host: self };
        let outcome = AssertUnwindSafe(self.skill.initialize(&ctx))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => {
                self.transition(SkillStatus::Ready);
                info!(skill = %self.name, "Skill ready");
                return true;
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("initialization panicked: {}", panic_message(&*panic)),
        };

        error!(skill = %self.name, error = %failure, "Skill initialization failed");
        self.active.store(false, Ordering::Release);
        self.release_subscriptions();
        self.transition(SkillStatus::Error);
        false
    }

    /// Execute a task with status tracking, metrics and failure capture.
    ///
    /// Never fails: errors and panics from the skill come back as a failed
    /// [`ExecutionResult`], move the skill to `Error` and publish
    /// `skill.<name>.error`. Successful runs publish `skill.<name>.completed`.
    pub async fn safe_execute(&self, task: &str, context: &TaskContext) -> ExecutionResult {
        let _running = self.exec_gate.read().await;

        if let Err(status) = self.enter() {
            debug!(skill = %self.name, %status, "Execution refused");
            return ExecutionResult::failure(format!(
                "Skill '{}' not ready (status: {status})",
                self.name
            ))
            .with_metadata("skill_name", json!(self.name))
            .with_metadata("timestamp", json!(Utc::now().to_rfc3339()));
        }

        self.execution_count.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_execution) = Some(Utc::now());
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.skill.execute(task, context))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(mut result)) => {
                let duration = started.elapsed().as_secs_f64();
                self.leave(false);
                result.metadata.insert("duration".into(), json!(duration));
                result.metadata.insert("skill_name".into(), json!(self.name));
                result
                    .metadata
                    .insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
                debug!(skill = %self.name, duration, success = result.success, "Skill execution finished");
                self.publish(
                    format!("skill.{}.completed", self.name),
                    serde_json::to_value(&result).unwrap_or_default(),
                    EventPriority::Normal,
                );
                return result;
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("execution panicked: {}", panic_message(&*panic)),
        };

        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.leave(true);
        error!(skill = %self.name, task = %task, error = %failure, "Skill execution failed");

        let result = ExecutionResult::failure(failure)
            .with_metadata("skill_name", json!(self.name))
            .with_metadata("timestamp", json!(Utc::now().to_rfc3339()));
        self.publish(
            format!("skill.{}.error", self.name),
            serde_json::to_value(&result).unwrap_or_default(),
            EventPriority::High,
        );
        result
    }

    /// Tear the skill down. Returns whether the skill's own cleanup succeeded;
    /// the host ends up `Disabled` with no subscriptions either way.
    pub async fn cleanup(&self) -> bool {
        if self.status() == SkillStatus::Disabled {
            debug!(skill = %self.name, "Skill already disabled");
            return true;
        }
        info!(skill = %self.name, "Cleaning up skill");

        self.active.store(false, Ordering::Release);
        let _handlers = self.handler_gate.write().await;
        let _executions = self.exec_gate.write().await;

        let ctx = SkillContext { host: self };
        let outcome = AssertUnwindSafe(self.skill.cleanup(&ctx))
            .catch_unwind()
            .await;

        self.release_subscriptions();
        self.transition(SkillStatus::Disabled);

        match outcome {
            Ok(Ok(())) => {
                info!(skill = %self.name, "Skill disabled");
                true
            }
            Ok(Err(e)) => {
                error!(skill = %self.name, error = %e, "Skill cleanup failed");
                false
            }
            Err(panic) => {
                error!(skill = %self.name, panic = %panic_message(&*panic), "Skill cleanup panicked");
                false
            }
        }
    }

    // --- Internals ---

    fn transition(&self, next: SkillStatus) -> bool {
        let mut lifecycle = lock(&self.lifecycle);
        let current = lifecycle.status;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(skill = %self.name, from = %current, to = %next, "Refusing invalid status transition");
            return false;
        }
        trace!(skill = %self.name, from = %current, to = %next, "Status transition");
        lifecycle.status = next;
        true
    }

    fn enter(&self) -> Result<(), SkillStatus> {
        let mut lifecycle = lock(&self.lifecycle);
        match lifecycle.status {
            SkillStatus::Ready => {
                lifecycle.status = SkillStatus::Busy;
                lifecycle.in_flight = 1;
                Ok(())
            }
            SkillStatus::Busy => {
                lifecycle.in_flight += 1;
                Ok(())
            }
            other => Err(other),
        }
    }

    fn leave(&self, failed: bool) {
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.in_flight = lifecycle.in_flight.saturating_sub(1);
        if failed {
            if lifecycle.status.can_transition_to(SkillStatus::Error) {
                lifecycle.status = SkillStatus::Error;
            }
        } else if lifecycle.in_flight == 0 && lifecycle.status == SkillStatus::Busy {
            lifecycle.status = SkillStatus::Ready;
        }
    }

    fn publish(&self, event_name: String, payload: serde_json::Value, priority: EventPriority) {
        self.bus
            .publish_with(event_name, payload, &self.name, priority, Metadata::new());
    }

    fn release_subscriptions(&self) {
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        for sub in subscriptions {
            self.bus.unsubscribe(&sub.event_name, &sub.guarded);
        }
    }
}

/// What a skill sees during `initialize` and `cleanup`.
pub struct SkillContext<'a> {
    host: &'a SkillHost,
}

impl SkillContext<'_> {
    pub fn name(&self) -> &str {
        &self.host.name
    }

    /// The skill's configuration slice, verbatim.
    pub fn config(&self) -> &serde_json::Value {
        &self.host.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.host.bus
    }

    /// A cloneable publisher that stamps this skill as the event source.
    pub fn publisher(&self) -> SkillPublisher {
        SkillPublisher {
            bus: self.host.bus.clone(),
            source: self.host.name.clone(),
        }
    }

    pub fn executor(&self) -> SkillExecutor {
        self.host.executor()
    }

    /// Subscribe a handler on behalf of this skill. The host removes it on
    /// cleanup and stops invoking it as soon as cleanup begins.
    pub fn subscribe(&self, event_name: impl Into<String>, handler: Arc<dyn EventHandler>) -> bool {
        let event_name = event_name.into();
        let mut subscriptions = lock(&self.host.subscriptions);
        if subscriptions
            .iter()
            .any(|s| s.event_name == event_name && same_handler(&s.handler, &handler))
        {
            return false;
        }

        let guarded: Arc<dyn EventHandler> = Arc::new(GuardedHandler {
            skill: self.host.name.clone(),
            inner: Arc::clone(&handler),
            active: Arc::clone(&self.host.active),
            gate: Arc::clone(&self.host.handler_gate),
        });
        self.host.bus.subscribe(event_name.clone(), Arc::clone(&guarded));
        subscriptions.push(Subscription {
            event_name,
            handler,
            guarded,
        });
        true
    }

    pub fn unsubscribe(&self, event_name: &str, handler: &Arc<dyn EventHandler>) -> bool {
        let mut subscriptions = lock(&self.host.subscriptions);
        let Some(index) = subscriptions
            .iter()
            .position(|s| s.event_name == event_name && same_handler(&s.handler, handler))
        else {
            return false;
        };
        let sub = subscriptions.remove(index);
        self.host.bus.unsubscribe(&sub.event_name, &sub.guarded)
    }
}

/// Publishes events with a fixed source.
#[derive(Clone)]
pub struct SkillPublisher {
    bus: EventBus,
    source: String,
}

impl SkillPublisher {
    pub fn publish(&self, event_name: impl Into<String>, payload: serde_json::Value) -> bool {
        self.bus.publish(event_name, payload, self.source.clone())
    }

    pub fn publish_with_priority(
        &self,
        event_name: impl Into<String>,
        payload: serde_json::Value,
        priority: EventPriority,
    ) -> bool {
        self.bus.publish_with(
            event_name,
            payload,
            self.source.clone(),
            priority,
            Metadata::new(),
        )
    }
}

/// Runs a skill's `safe_execute` without keeping the skill alive.
#[derive(Clone)]
pub struct SkillExecutor {
    host: Weak<SkillHost>,
}

impl SkillExecutor {
    pub async fn execute(&self, task: &str, context: &TaskContext) -> ExecutionResult {
        match self.host.upgrade() {
            Some(host) => host.safe_execute(task, context).await,
            None => ExecutionResult::failure("Skill is no longer available"),
        }
    }
}

struct GuardedHandler {
    skill: String,
    inner: Arc<dyn EventHandler>,
    active: Arc<AtomicBool>,
    gate: Arc<RwLock<()>>,
}

#[async_trait]
impl EventHandler for GuardedHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError> {
        let _gate = self.gate.read().await;
        if !self.active.load(Ordering::Acquire) {
            trace!(skill = %self.skill, event = %event.name, "Skill inactive, handler skipped");
            return Ok(());
        }
        self.inner.handle(event).await
    }
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusOptions;
    use crate::error::SkillError;
    use crate::event::handler_fn;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Echoes the task back; subscribes to `ping` and answers with `pong`.
    struct EchoSkill {
        hits: Arc<AtomicUsize>,
        cleaned: Arc<AtomicBool>,
    }

    impl EchoSkill {
        fn new() -> Self {
            Self {
                hits: Arc::new(AtomicUsize::new(0)),
                cleaned: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl Skill for EchoSkill {
        fn describe(&self) -> SkillMetadata {
            SkillMetadata::new("echo", "1.0.0", "Echoes input")
                .with_capabilities([Capability::Communication])
        }

        async fn initialize(&self, ctx: &SkillContext<'_>) -> Result<(), SkillError> {
            let publisher = ctx.publisher();
            let hits = Arc::clone(&self.hits);
            ctx.subscribe(
                "ping",
                handler_fn("echo.ping", move |event| {
                    let publisher = publisher.clone();
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        publisher.publish("pong", event.payload.clone());
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
            match context.get_str("mode") {
                Some("fail") => Err(SkillError::ExecutionFailed(format!("cannot {task}"))),
                Some("panic") => panic!("echo exploded"),
                Some("slow") => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(ExecutionResult::ok(json!(task)))
                }
                _ => Ok(ExecutionResult::ok(json!(task))),
            }
        }

        async fn cleanup(&self, _ctx: &SkillContext<'_>) -> Result<(), SkillError> {
            self.cleaned.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenInit;

    #[async_trait]
    impl Skill for BrokenInit {
        fn describe(&self) -> SkillMetadata {
            SkillMetadata::new("broken", "0.1.0", "Never starts")
        }

        async fn initialize(&self, ctx: &SkillContext<'_>) -> Result<(), SkillError> {
            ctx.subscribe("ping", handler_fn("broken.ping", |_e| async { Ok(()) }));
            Err(SkillError::InitializationFailed("missing resource".into()))
        }

        async fn execute(&self, _: &str, _: &TaskContext) -> Result<ExecutionResult, SkillError> {
            Ok(ExecutionResult::ok(json!(null)))
        }
    }

    fn test_bus() -> EventBus {
        EventBus::new(BusOptions {
            max_queue_size: 100,
            poll_interval: Duration::from_millis(20),
            ..BusOptions::default()
        })
    }

    async fn settle(bus: &EventBus) {
        for _ in 0..200 {
            if bus.queue_size() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn initialize_moves_to_ready_and_tracks_subscriptions() {
        let bus = test_bus();
        let host = SkillHost::new("echo", Box::new(EchoSkill::new()), bus.clone(), json!({}));
        assert_eq!(host.status(), SkillStatus::Uninitialized);
        assert!(host.initialize().await);
        assert!(host.is_ready());
        assert_eq!(host.subscribed_events(), vec!["ping".to_string()]);
        assert_eq!(bus.subscriber_count("ping"), 1);
    }

    #[tokio::test]
    async fn failed_initialize_sets_error_and_unsubscribes() {
        let bus = test_bus();
        let host = SkillHost::new("broken", Box::new(BrokenInit), bus.clone(), json!({}));
        assert!(!host.initialize().await);
        assert_eq!(host.status(), SkillStatus::Error);
        assert_eq!(bus.subscriber_count("ping"), 0);
        assert!(host.subscribed_events().is_empty());
    }

    #[tokio::test]
    async fn safe_execute_injects_metadata_and_publishes_completion() {
        let bus = test_bus();
        bus.start().await;
        let host = SkillHost::new("echo", Box::new(EchoSkill::new()), bus.clone(), json!({}));
        host.initialize().await;

        let result = host.safe_execute("hello", &TaskContext::new()).await;
        assert!(result.success);
        assert_eq!(result.result, json!("hello"));
        assert!(result.metadata.contains_key("duration"));
        assert_eq!(result.metadata["skill_name"], "echo");
        assert!(result.metadata.contains_key("timestamp"));
        assert!(host.is_ready());

        settle(&bus).await;
        let completed = bus.get_history(Some("skill.echo.completed"));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].priority, EventPriority::Normal);
        assert_eq!(completed[0].payload["result"], "hello");
        bus.stop().await;
    }

    #[tokio::test]
    async fn execution_error_is_captured_as_data() {
        let bus = test_bus();
        bus.start().await;
        let host = SkillHost::new("echo", Box::new(EchoSkill::new()), bus.clone(), json!({}));
        host.initialize().await;

        let ctx = TaskContext::new().with("mode", "fail");
        let result = host.safe_execute("fly", &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Execution failed: cannot fly"));
        assert_eq!(result.metadata["skill_name"], "echo");
        assert_eq!(host.status(), SkillStatus::Error);

        let stats = host.stats();
        assert_eq!(stats.execution_count, 1);
        assert_eq!(stats.error_count, 1);
        assert!(stats.last_execution.is_some());

        settle(&bus).await;
        let errors = bus.get_history(Some("skill.echo.error"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].priority, EventPriority::High);
        bus.stop().await;
    }

    #[tokio::test]
    async fn panicking_execute_is_captured() {
        let bus = test_bus();
        let host = SkillHost::new("echo", Box::new(EchoSkill::new()), bus.clone(), json!({}));
        host.initialize().await;

        let result = host
            .safe_execute("boom", &TaskContext::new().with("mode", "panic"))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("echo exploded"));
        assert_eq!(host.status(), SkillStatus::Error);
    }

    #[tokio::test]
    async fn execution_refused_unless_ready() {
        let bus = test_bus();
        let host = SkillHost::new("echo", Box::new(EchoSkill::new()), bus.clone(), json!({}));

        let result = host.safe_execute("early", &TaskContext::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("status: uninitialized"));
        assert_eq!(host.stats().execution_count, 0);
    }

    #[tokio::test]
    async fn concurrent_executions_return_to_ready() {
        let bus = test_bus();
        let host = SkillHost::new("echo", Box::new(EchoSkill::new()), bus.clone(), json!({}));
        host.initialize().await;

        let slow = TaskContext::new().with("mode", "slow");
        let first = host.safe_execute("a", &slow);
        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(host.status(), SkillStatus::Busy);
            host.safe_execute("b", &slow).await
        };
        let (a, b) = tokio::join!(first, second);
        assert!(a.success && b.success);
        assert_eq!(host.status(), SkillStatus::Ready);
        assert_eq!(host.stats().execution_count, 2);
    }

    #[tokio::test]
    async fn cleanup_disables_and_stops_handlers() {
        let bus = test_bus();
        bus.start().await;
        let skill = EchoSkill::new();
        let hits = Arc::clone(&skill.hits);
        let cleaned = Arc::clone(&skill.cleaned);
        let host = SkillHost::new("echo", Box::new(skill), bus.clone(), json!({}));
        host.initialize().await;

        bus.publish("ping", json!({"n": 1}), "test");
        settle(&bus).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.get_history(Some("pong"))[0].payload, json!({"n": 1}));

        assert!(host.cleanup().await);
        assert!(cleaned.load(Ordering::SeqCst));
        assert_eq!(host.status(), SkillStatus::Disabled);
        assert_eq!(bus.subscriber_count("ping"), 0);

        bus.publish("ping", json!({"n": 2}), "test");
        settle(&bus).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Disabled is terminal.
        assert!(!host.initialize().await);
        assert!(host.cleanup().await);
        let refused = host.safe_execute("late", &TaskContext::new()).await;
        assert!(refused.error.unwrap().contains("disabled"));
        bus.stop().await;
    }

    #[tokio::test]
    async fn queued_event_after_cleanup_is_not_delivered() {
        let bus = test_bus();
        let skill = EchoSkill::new();
        let hits = Arc::clone(&skill.hits);
        let host = SkillHost::new("echo", Box::new(skill), bus.clone(), json!({}));
        host.initialize().await;

        // Captured before cleanup, as the dispatch worker would have done.
        let stale: Vec<_> = {
            let handle = host.subscriptions.lock().unwrap();
            handle.iter().map(|s| Arc::clone(&s.guarded)).collect()
        };
        host.cleanup().await;

        let event = Arc::new(Event::new("ping", json!(null), "test"));
        for handler in stale {
            handler.handle(Arc::clone(&event)).await.unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn executor_does_not_outlive_host() {
        let bus = test_bus();
        let host = SkillHost::new("echo", Box::new(EchoSkill::new()), bus, json!({}));
        host.initialize().await;
        let executor = host.executor();
        assert!(executor.execute("x", &TaskContext::new()).await.success);

        drop(host);
        let result = executor.execute("x", &TaskContext::new()).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn context_duplicate_subscribe_and_unsubscribe() {
        let bus = test_bus();
        let host = SkillHost::new("echo", Box::new(EchoSkill::new()), bus.clone(), json!({"k": 1}));
        let ctx = SkillContext { host: host.as_ref() };
        assert_eq!(ctx.config()["k"], 1);
        assert_eq!(ctx.name(), "echo");

        let handler = handler_fn("h", |_e| async { Ok(()) });
        assert!(ctx.subscribe("topic", Arc::clone(&handler)));
        assert!(!ctx.subscribe("topic", Arc::clone(&handler)));
        assert_eq!(bus.subscriber_count("topic"), 1);
        assert!(ctx.unsubscribe("topic", &handler));
        assert!(!ctx.unsubscribe("topic", &handler));
        assert_eq!(bus.subscriber_count("topic"), 0);
    }

    #[tokio::test]
    async fn health_reflects_status() {
        let bus = test_bus();
        let host = SkillHost::new("echo", Box::new(EchoSkill::new()), bus, json!({}));
        assert!(!host.health_check().healthy);
        host.initialize().await;
        let health = host.health_check();
        assert!(health.healthy);
        assert_eq!(health.status, SkillStatus::Ready);
        assert_eq!(health.stats.capabilities, vec![Capability::Communication]);
        assert!(host.has_capability(Capability::Communication));
    }
}

//! Events and event handlers.
//!
//! An [`Event`] is built once by a publisher and then handed to the bus.
//! From that point on it is shared read-only: the dispatch worker wraps it in
//! an `Arc` and every matching handler receives a clone of that `Arc`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HandlerError;

/// Free-form string → JSON mapping used for event and result metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Advisory priority carried on every event.
///
/// The bus delivers strictly in enqueue order; consumers may use the
/// priority to filter or triage.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Something that happened, as seen by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id, used to correlate log lines
    pub id: Uuid,

    /// Event name subscribers match on (e.g. `memory.store`)
    pub name: String,

    /// Opaque payload
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Emitting skill or component
    pub source: String,

    #[serde(default)]
    pub priority: EventPriority,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload,
            source: source.into(),
            priority: EventPriority::Normal,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A subscriber callback.
///
/// Handlers for the same event run concurrently and share one `Arc<Event>`.
/// A returned error is logged and counted by the bus; it never affects
/// sibling handlers or the dispatch worker.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs when this handler fails.
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}

/// Build a shareable handler from an async closure.
///
/// ```ignore
/// let pong = handler_fn("echo", move |event| {
///     let bus = bus.clone();
///     async move {
///         bus.publish("pong", event.payload.clone(), "echo");
///         Ok(())
///     }
/// });
/// bus.subscribe("ping", pong);
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// Handler identity is the identity of the shared allocation.
pub(crate) fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn new_event_defaults_to_normal_priority() {
        let event = Event::new("ping", serde_json::json!({"n": 1}), "test");
        assert_eq!(event.priority, EventPriority::Normal);
        assert!(event.metadata.is_empty());
        assert_eq!(event.payload["n"], 1);
    }

    #[test]
    fn priority_ordering_and_serde() {
        assert!(EventPriority::Critical > EventPriority::High);
        assert!(EventPriority::Low < EventPriority::Normal);
        assert_eq!(
            serde_json::to_value(EventPriority::High).unwrap(),
            serde_json::json!("high")
        );
        assert_eq!(EventPriority::Critical as u8, 4);
    }

    #[test]
    fn event_serializes_with_metadata() {
        let mut meta = Metadata::new();
        meta.insert("trace".into(), serde_json::json!("abc"));
        let event = Event::new("x", serde_json::Value::Null, "src")
            .with_priority(EventPriority::Low)
            .with_metadata(meta);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["priority"], "low");
        assert_eq!(json["metadata"]["trace"], "abc");
        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn handler_fn_invokes_closure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handler = handler_fn("counter", move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert_eq!(handler.name(), "counter");
        let event = Arc::new(Event::new("tick", serde_json::Value::Null, "test"));
        handler.handle(Arc::clone(&event)).await.unwrap();
        handler.handle(event).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}

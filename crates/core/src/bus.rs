//! The event bus: bounded queue, subscriber registry, single dispatch worker.
//!
//! Publishing never blocks. Events go into a bounded `mpsc` queue with
//! `try_send`; when the queue is full the event is dropped, a warning is
//! logged and the `dropped` counter goes up.
//!
//! One worker drains the queue in FIFO order. For every event it records the
//! event in the history ring, spawns all matching handlers into a `JoinSet`
//! and waits for the whole fan-out before taking the next event. Priority is
//! carried on the event but does not reorder delivery.
//!
//! The worker stops on [`EventBus::stop`] or when the last `EventBus`
//! handle is dropped.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::error::panic_message;
use crate::event::{Event, EventHandler, EventPriority, Metadata, same_handler};

/// Tuning knobs for an [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusOptions {
    /// Queue capacity. Publishing beyond it drops the event. Minimum 1.
    pub max_queue_size: usize,

    /// Number of dispatched events kept for introspection. Minimum 1.
    pub history_size: usize,

    /// How long the worker waits on an empty queue before re-checking
    /// its shutdown signal.
    pub poll_interval: Duration,

    /// How long `stop()` waits for the worker to finish its current
    /// fan-out. `None` waits forever.
    pub shutdown_timeout: Option<Duration>,

    /// Cap on handlers running at once for a single event. `None` is
    /// unbounded.
    pub max_concurrent_handlers: Option<usize>,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            history_size: 100,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Some(Duration::from_secs(5)),
            max_concurrent_handlers: None,
        }
    }
}

impl BusOptions {
    pub fn with_capacity(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            ..Self::default()
        }
    }
}

/// Snapshot returned by [`EventBus::get_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub running: bool,
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub subscribers: BTreeMap<String, usize>,
    pub history_size: usize,
    pub published: u64,
    pub dropped: u64,
    pub dispatched: u64,
    pub handler_failures: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
    dispatched: AtomicU64,
    handler_failures: AtomicU64,
}

type Subscribers = HashMap<String, Vec<Arc<dyn EventHandler>>>;

struct Inner {
    options: BusOptions,
    sender: mpsc::Sender<Event>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    subscribers: RwLock<Subscribers>,
    history: Mutex<VecDeque<Arc<Event>>>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    limiter: Option<Arc<Semaphore>>,
    counters: Counters,
}

/// Cloneable handle to a shared event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
    _lifeline: Arc<Lifeline>,
}

/// Shared by every handle but not by the worker, so it drops with the last
/// handle and tells a still-running worker to exit.
struct Lifeline(Weak<Inner>);

impl Drop for Lifeline {
    fn drop(&mut self) {
        if let Some(inner) = self.0.upgrade()
            && inner.running.swap(false, Ordering::SeqCst)
        {
            debug!("Last event bus handle dropped, stopping dispatch worker");
            inner.shutdown.send_replace(true);
        }
    }
}

impl EventBus {
    pub fn new(mut options: BusOptions) -> Self {
        options.max_queue_size = options.max_queue_size.max(1);
        options.history_size = options.history_size.max(1);
        let limiter = options
            .max_concurrent_handlers
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let (sender, receiver) = mpsc::channel(options.max_queue_size);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            history: Mutex::new(VecDeque::with_capacity(options.history_size)),
            options,
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            subscribers: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            shutdown,
            worker: tokio::sync::Mutex::new(None),
            limiter,
            counters: Counters::default(),
        });
        let lifeline = Arc::new(Lifeline(Arc::downgrade(&inner)));
        Self {
            inner,
            _lifeline: lifeline,
        }
    }

    /// Create a bus with the given queue capacity and default options.
    pub fn with_capacity(max_queue_size: usize) -> Self {
        Self::new(BusOptions::with_capacity(max_queue_size))
    }

    pub fn options(&self) -> &BusOptions {
        &self.inner.options
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // --- Lifecycle ---

    /// Spawn the dispatch worker. Calling it on a running bus only logs a warning.
    pub async fn start(&self) {
        let mut worker = self.inner.worker.lock().await;
        if worker.is_some() {
            warn!("Event bus is already running");
            return;
        }

        self.inner.shutdown.send_replace(false);
        let shutdown = self.inner.shutdown.subscribe();
        let inner = Arc::clone(&self.inner);
        *worker = Some(tokio::spawn(inner.run(shutdown)));
        self.inner.running.store(true, Ordering::SeqCst);

        info!(
            capacity = self.inner.options.max_queue_size,
            history = self.inner.options.history_size,
            "Event bus started"
        );
    }

    /// Signal the worker and wait for it to exit.
    ///
    /// A handler that never returns blocks the worker; after
    /// `shutdown_timeout` the worker is aborted, which also aborts the
    /// handlers of the event it was dispatching.
    pub async fn stop(&self) {
        let mut worker = self.inner.worker.lock().await;
        let Some(mut handle) = worker.take() else {
            debug!("Event bus is not running");
            return;
        };

        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);

        match self.inner.options.shutdown_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, &mut handle).await.is_err() {
                    warn!(
                        timeout_secs = limit.as_secs_f64(),
                        "Dispatch worker did not finish in time, aborting it"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
            None => {
                let _ = handle.await;
            }
        }

        info!("Event bus stopped");
    }

    // --- Subscriptions ---

    /// Register `handler` for `event_name`. Returns `false` if that exact
    /// handler was already registered for the name.
    pub fn subscribe(&self, event_name: impl Into<String>, handler: Arc<dyn EventHandler>) -> bool {
        let event_name = event_name.into();
        let mut subscribers = write(&self.inner.subscribers);
        let handlers = subscribers.entry(event_name.clone()).or_default();
        if handlers.iter().any(|h| same_handler(h, &handler)) {
            trace!(event = %event_name, handler = handler.name(), "Duplicate subscription ignored");
            return false;
        }
        debug!(event = %event_name, handler = handler.name(), "Handler subscribed");
        handlers.push(handler);
        true
    }

    /// Remove `handler` from `event_name`. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, event_name: &str, handler: &Arc<dyn EventHandler>) -> bool {
        let mut subscribers = write(&self.inner.subscribers);
        let Some(handlers) = subscribers.get_mut(event_name) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            subscribers.remove(event_name);
        }
        if removed {
            debug!(event = %event_name, handler = handler.name(), "Handler unsubscribed");
        }
        removed
    }

    pub fn subscriber_count(&self, event_name: &str) -> usize {
        read(&self.inner.subscribers)
            .get(event_name)
            .map_or(0, Vec::len)
    }

    // --- Publishing ---

    /// Publish an event with normal priority and no metadata.
    pub fn publish(
        &self,
        event_name: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
    ) -> bool {
        self.publish_event(Event::new(event_name, payload, source))
    }

    pub fn publish_with(
        &self,
        event_name: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
        priority: EventPriority,
        metadata: Metadata,
    ) -> bool {
        self.publish_event(
            Event::new(event_name, payload, source)
                .with_priority(priority)
                .with_metadata(metadata),
        )
    }

    /// Enqueue a prebuilt event without waiting for space.
    ///
    /// Returns `false` when the event was dropped. Never blocks.
    pub fn publish_event(&self, event: Event) -> bool {
        match self.inner.sender.try_send(event) {
            Ok(()) => {
                self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = %event.name,
                    source = %event.source,
                    capacity = self.inner.options.max_queue_size,
                    "Event queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(event = %event.name, "Event queue closed, dropping event");
                false
            }
        }
    }

    // --- Introspection ---

    /// Copy of the dispatched-event history, oldest first, optionally
    /// filtered by event name.
    pub fn get_history(&self, event_name: Option<&str>) -> Vec<Event> {
        lock(&self.inner.history)
            .iter()
            .filter(|e| event_name.is_none_or(|name| e.name == name))
            .map(|e| Event::clone(e))
            .collect()
    }

    pub fn get_stats(&self) -> BusStats {
        let subscribers = read(&self.inner.subscribers)
            .iter()
            .map(|(name, handlers)| (name.clone(), handlers.len()))
            .collect();
        let counters = &self.inner.counters;

        BusStats {
            running: self.is_running(),
            queue_size: self.queue_size(),
            max_queue_size: self.inner.options.max_queue_size,
            subscribers,
            history_size: lock(&self.inner.history).len(),
            published: counters.published.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            handler_failures: counters.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// Events currently waiting in the queue.
    pub fn queue_size(&self) -> usize {
        let sender = &self.inner.sender;
        sender.max_capacity() - sender.capacity()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusOptions::default())
    }
}

impl Inner {
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut queue = self.receiver.lock().await;
        debug!("Dispatch worker started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = tokio::time::timeout(self.options.poll_interval, queue.recv()) => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    warn!("Event queue closed, dispatch worker exiting");
                    break;
                }
                // Idle tick: loop back to the shutdown check.
                Err(_) => continue,
            };

            let name = event.name.clone();
            if let Err(panic) = AssertUnwindSafe(self.dispatch(event)).catch_unwind().await {
                error!(
                    event = %name,
                    panic = %panic_message(&*panic),
                    "Dispatch step panicked, worker continues"
                );
            }
        }

        debug!("Dispatch worker exited");
    }

    async fn dispatch(&self, event: Event) {
        let event = Arc::new(event);
        self.record(&event);
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        let handlers: Vec<Arc<dyn EventHandler>> = read(&self.subscribers)
            .get(&event.name)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            trace!(event = %event.name, "No subscribers");
            return;
        }

        trace!(event = %event.name, id = %event.id, handlers = handlers.len(), "Dispatching");

        let mut fan_out = JoinSet::new();
        for handler in handlers {
            let event = Arc::clone(&event);
            let limiter = self.limiter.clone();
            fan_out.spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
                (handler.name().to_string(), outcome)
            });
        }

        while let Some(joined) = fan_out.join_next().await {
            match joined {
                Ok((_, Ok(Ok(())))) => {}
                Ok((handler, Ok(Err(e)))) => {
                    self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(event = %event.name, handler = %handler, error = %e, "Event handler failed");
                }
                Ok((handler, Err(panic))) => {
                    self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        event = %event.name,
                        handler = %handler,
                        panic = %panic_message(&*panic),
                        "Event handler panicked"
                    );
                }
                Err(e) => {
                    self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(event = %event.name, error = %e, "Event handler task did not complete");
                }
            }
        }
    }

    fn record(&self, event: &Arc<Event>) {
        let mut history = lock(&self.history);
        history.push_back(Arc::clone(event));
        while history.len() > self.options.history_size {
            history.pop_front();
        }
    }
}

// Handlers never run while these locks are held; poison is ignored.
fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

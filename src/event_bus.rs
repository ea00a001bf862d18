//! In-process event bus: zero-or-more handlers per event type, with
//! fire-and-forget and acknowledge-and-wait publish modes.
//!
//! The bus provides at-least-once delivery and observability, not
//! exactly-once side effects: a failing handler never rolls back the
//! already-stored event, so each handler owns its own idempotent
//! application logic (e.g. upsert a projection row by id, ignore if
//! already at or past the event's version).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{EventBusError, HandlerError};
use crate::event::Event;

/// Boxed future returned by type-erased event handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A type-erased event handler stored in the bus registry.
pub type EventHandler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Configuration for an [`EventBus`].
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Upper bound on concurrently running handler invocations across
    /// both publish modes. Excess invocations queue on the bound rather
    /// than spawning unbounded work.
    pub max_in_flight: usize,
    /// Optional ceiling on how long [`EventBus::publish_and_acknowledge`]
    /// waits for all handlers. `None` waits indefinitely (or until the
    /// caller cancels by dropping the future).
    pub ack_timeout: Option<Duration>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            ack_timeout: None,
        }
    }
}

/// In-process pub/sub dispatcher for persisted events.
///
/// Cheap to clone -- all internal state is `Arc`-wrapped. Constructed
/// once by composition code at process start; handlers are registered
/// through [`subscribe`](EventBus::subscribe) before traffic flows.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    limiter: Arc<Semaphore>,
    ack_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl EventBus {
    /// Create a bus with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a bus with an explicit configuration.
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                limiter: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
                ack_timeout: config.ack_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Box a handler closure into the registry's type-erased form.
    ///
    /// Useful for building heterogeneous handler sets to pass to
    /// [`reset`](EventBus::reset).
    pub fn handler<F, Fut>(f: F) -> EventHandler
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Arc::new(move |event| Box::pin(f(event)) as HandlerFuture)
    }

    /// Register an additional handler for an event type.
    ///
    /// Existing handlers for the type are kept; use
    /// [`reset`](EventBus::reset) to replace the full set atomically.
    pub fn subscribe<F, Fut>(&self, event_type: impl Into<String>, f: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let event_type = event_type.into();
        tracing::info!(event_type = %event_type, "subscribing event handler");
        let mut handlers = self.inner.handlers.write().expect("handler registry poisoned");
        handlers.entry(event_type).or_default().push(Self::handler(f));
    }

    /// Replace the full handler set for an event type atomically.
    ///
    /// Composition code that re-registers the well-known handler set for
    /// a type at process start uses this instead of stacking duplicates
    /// via repeated [`subscribe`](EventBus::subscribe) calls.
    pub fn reset(
        &self,
        event_type: impl Into<String>,
        new_handlers: impl IntoIterator<Item = EventHandler>,
    ) {
        let event_type = event_type.into();
        tracing::info!(event_type = %event_type, "resetting event handlers");
        let mut handlers = self.inner.handlers.write().expect("handler registry poisoned");
        handlers.insert(event_type, new_handlers.into_iter().collect());
    }

    /// Remove every handler for an event type.
    pub fn unsubscribe(&self, event_type: &str) {
        tracing::info!(event_type = %event_type, "unsubscribing event handlers");
        let mut handlers = self.inner.handlers.write().expect("handler registry poisoned");
        handlers.remove(event_type);
    }

    /// Stop accepting publishes. In-flight handler tasks run to
    /// completion; subsequent publish calls fail with
    /// [`EventBusError::Closed`].
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Snapshot the handler list for an event's type.
    fn handlers_for(&self, event_type: &str) -> Vec<EventHandler> {
        let handlers = self.inner.handlers.read().expect("handler registry poisoned");
        handlers.get(event_type).cloned().unwrap_or_default()
    }

    /// Publish an event without waiting for handler completion.
    ///
    /// Every registered handler for the event's type is invoked on its
    /// own spawned task, gated by the bus-wide concurrency bound; the
    /// call returns as soon as dispatch has been initiated, regardless
    /// of handler latency. Handler failures are reported via
    /// `tracing::error!`, never silently dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Closed`] if the bus no longer accepts
    /// dispatch. Zero registered handlers is a successful no-op.
    pub fn publish(&self, event: Event) -> Result<(), EventBusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EventBusError::Closed);
        }

        let handlers = self.handlers_for(&event.event_type);
        tracing::debug!(
            event_type = %event.event_type,
            stream_id = %event.stream_id,
            handlers = handlers.len(),
            "publishing event"
        );

        for handler in handlers {
            let event = event.clone();
            let limiter = Arc::clone(&self.inner.limiter);
            tokio::spawn(async move {
                // The permit is acquired inside the task so that publish
                // itself never blocks on backpressure; excess work queues
                // here until a slot frees up.
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return;
                };
                if let Err(error) = handler(event.clone()).await {
                    tracing::error!(
                        event_type = %event.event_type,
                        stream_id = %event.stream_id,
                        version = event.version,
                        error = %error,
                        "event handler failed"
                    );
                }
            });
        }

        Ok(())
    }

    /// Publish an event and wait until every handler has returned.
    ///
    /// All handlers run concurrently (bounded by the bus-wide limit);
    /// the call blocks until each one completes, fails, or the
    /// configured acknowledge timeout elapses. The first handler error
    /// is returned; additional failures are logged. Used by
    /// [`Repository::save_and_acknowledge`](crate::Repository) when the
    /// caller needs read-after-write consistency against a projection.
    ///
    /// Cancellation-safe: dropping this future stops the wait promptly
    /// while the spawned handler tasks run to completion.
    ///
    /// # Errors
    ///
    /// * [`EventBusError::Closed`] -- the bus no longer accepts dispatch.
    /// * [`EventBusError::Timeout`] -- the acknowledge timeout elapsed.
    /// * [`EventBusError::Handler`] -- at least one handler failed.
    pub async fn publish_and_acknowledge(&self, event: Event) -> Result<(), EventBusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EventBusError::Closed);
        }

        let handlers = self.handlers_for(&event.event_type);
        tracing::debug!(
            event_type = %event.event_type,
            stream_id = %event.stream_id,
            handlers = handlers.len(),
            "publishing event with acknowledgement"
        );
        if handlers.is_empty() {
            return Ok(());
        }

        // Plain `tokio::spawn` handles rather than a `JoinSet`: dropping
        // a JoinSet aborts its tasks, but an abandoned acknowledge wait
        // must leave handlers running to completion.
        let tasks: Vec<_> = handlers
            .into_iter()
            .map(|handler| {
                let event = event.clone();
                let limiter = Arc::clone(&self.inner.limiter);
                tokio::spawn(async move {
                    let _permit = limiter
                        .acquire_owned()
                        .await
                        .map_err(|_| anyhow::anyhow!("event bus limiter closed"))?;
                    handler(event).await
                })
            })
            .collect();

        let await_all = Self::collect_results(&event, tasks);
        match self.inner.ack_timeout {
            Some(limit) => tokio::time::timeout(limit, await_all)
                .await
                .map_err(|_| EventBusError::Timeout)?,
            None => await_all.await,
        }
    }

    /// Await every handler task, returning the first failure and logging
    /// the rest.
    async fn collect_results(
        event: &Event,
        tasks: Vec<tokio::task::JoinHandle<anyhow::Result<()>>>,
    ) -> Result<(), EventBusError> {
        let mut first_error: Option<HandlerError> = None;
        for task in tasks {
            let outcome = match task.await {
                Ok(result) => result,
                Err(join_error) => Err(anyhow::anyhow!(
                    "event handler task ended abnormally: {join_error}"
                )),
            };
            if let Err(error) = outcome {
                if first_error.is_none() {
                    first_error = Some(error);
                } else {
                    tracing::error!(
                        event_type = %event.event_type,
                        stream_id = %event.stream_id,
                        error = %error,
                        "additional event handler failure"
                    );
                }
            }
        }

        match first_error {
            Some(error) => Err(EventBusError::Handler(error)),
            None => Ok(()),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

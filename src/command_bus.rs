//! In-process command bus: exactly one active handler per command name.
//!
//! Commands express intent to a single authoritative handler, so there
//! is no fan-out here: subscribing a handler for a name atomically
//! replaces whatever was registered before. Dispatch is synchronous from
//! the caller's point of view -- `publish` blocks until the handler
//! returns, the configured dispatch timeout elapses, or the caller
//! cancels by dropping the future.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::command::Command;
use crate::error::CommandBusError;

/// Boxed future returned by type-erased command handlers.
type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Type-erased command handler.
type CommandHandler = Arc<dyn Fn(Command) -> HandlerFuture + Send + Sync>;

/// Configuration for a [`CommandBus`].
#[derive(Debug, Clone)]
pub struct CommandBusConfig {
    /// Upper bound on in-flight handler invocations across all command
    /// names. Excess `publish` calls queue on the bound rather than
    /// spawning unbounded concurrent work.
    pub max_in_flight: usize,
    /// Optional ceiling on how long a `publish` call waits for its
    /// handler (queueing included). `None` waits indefinitely.
    pub dispatch_timeout: Option<Duration>,
}

impl Default for CommandBusConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            dispatch_timeout: None,
        }
    }
}

/// In-process dispatcher routing each command to exactly one handler.
///
/// Cheap to clone -- all internal state is `Arc`-wrapped. Constructed
/// once by composition code at process start.
#[derive(Clone)]
pub struct CommandBus {
    inner: Arc<Inner>,
}

struct Inner {
    handlers: RwLock<HashMap<String, CommandHandler>>,
    limiter: Arc<Semaphore>,
    dispatch_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl std::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBus")
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl CommandBus {
    /// Create a bus with the default configuration.
    pub fn new() -> Self {
        Self::with_config(CommandBusConfig::default())
    }

    /// Create a bus with an explicit configuration.
    pub fn with_config(config: CommandBusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                limiter: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
                dispatch_timeout: config.dispatch_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register the handler for a command name, atomically replacing any
    /// previous handler for that name.
    pub fn subscribe<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let handler: CommandHandler = Arc::new(move |cmd| Box::pin(f(cmd)) as HandlerFuture);
        let mut handlers = self.inner.handlers.write().expect("handler registry poisoned");
        let replaced = handlers.insert(name.clone(), handler).is_some();
        tracing::info!(command = %name, replaced, "subscribing command handler");
    }

    /// Remove the handler for a command name. Subsequent publishes for
    /// that name fail with [`CommandBusError::NoHandler`].
    pub fn unsubscribe(&self, name: &str) {
        tracing::info!(command = %name, "unsubscribing command handler");
        let mut handlers = self.inner.handlers.write().expect("handler registry poisoned");
        handlers.remove(name);
    }

    /// Stop accepting publishes. In-flight handler tasks run to
    /// completion; subsequent publish calls fail with
    /// [`CommandBusError::Closed`].
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Dispatch a command to its registered handler and wait for the
    /// result.
    ///
    /// The handler runs on its own spawned task gated by the bus-wide
    /// concurrency bound, so a caller that times out or drops this
    /// future abandons the wait without killing the handler: the
    /// invocation is at-most-once, but the caller cannot assume the side
    /// effect did not happen after a [`CommandBusError::Timeout`].
    ///
    /// # Errors
    ///
    /// * [`CommandBusError::NoHandler`] -- nothing registered for the
    ///   command's name.
    /// * [`CommandBusError::Timeout`] -- the configured dispatch timeout
    ///   elapsed while waiting.
    /// * [`CommandBusError::Handler`] -- the handler ran and failed.
    /// * [`CommandBusError::HandlerGone`] -- the handler task panicked
    ///   or was cancelled before producing a result.
    /// * [`CommandBusError::Closed`] -- the bus no longer accepts
    ///   publishes.
    pub async fn publish(&self, command: Command) -> Result<(), CommandBusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CommandBusError::Closed);
        }

        let handler = {
            let handlers = self.inner.handlers.read().expect("handler registry poisoned");
            handlers.get(&command.name).cloned()
        }
        .ok_or_else(|| CommandBusError::NoHandler(command.name.clone()))?;

        tracing::debug!(command = %command.name, "dispatching command");

        let limiter = Arc::clone(&self.inner.limiter);
        let task = tokio::spawn(async move {
            let _permit = limiter
                .acquire_owned()
                .await
                .map_err(|_| anyhow::anyhow!("command bus limiter closed"))?;
            handler(command).await
        });

        let joined = match self.inner.dispatch_timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| CommandBusError::Timeout)?,
            None => task.await,
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(CommandBusError::Handler(error)),
            Err(_join_error) => Err(CommandBusError::HandlerGone),
        }
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

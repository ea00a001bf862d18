//! Crate-level error types, one focused enum per failure domain.
//!
//! Domain-rule violations are not represented here: each aggregate's
//! operations return their own error type (see the `Aggregate` docs),
//! which callers surface alongside these infrastructure errors.

use uuid::Uuid;

/// A subscriber handler's own failure, surfaced by acknowledge-mode
/// publishes and logged (never silently dropped) in fire-and-forget mode.
///
/// Handlers return `anyhow::Result<()>`, so this is a thin named wrapper
/// around whatever the handler produced.
pub type HandlerError = anyhow::Error;

/// Error building an [`Event`](crate::Event) envelope from a domain event.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The domain event could not be serialized to JSON.
    #[error("failed to serialize domain event: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The domain event did not serialize to an adjacently tagged object
    /// (`{"type": ..., "data": ...}`). Indicates a missing
    /// `#[serde(tag = "type", content = "data")]` attribute on the enum.
    #[error("domain event did not serialize to an adjacently tagged object")]
    NotAdjacentlyTagged,
}

/// Fatal error while replaying a stream into an aggregate.
///
/// Replay failures indicate a serialization or versioning bug, not a
/// recoverable runtime condition. Callers should log loudly and abort
/// the operation; they must not treat the partially folded state as
/// usable.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// An event's type tag is not part of the aggregate's domain event
    /// enum, or its payload does not match the variant's shape.
    #[error("unhandled event type '{event_type}' at version {version} in stream '{stream_name}'")]
    UnknownEventType {
        /// Stream the offending event belongs to.
        stream_name: String,
        /// The unrecognized type discriminator.
        event_type: String,
        /// Version of the offending event.
        version: u64,
        /// The underlying deserialization failure.
        #[source]
        source: serde_json::Error,
    },

    /// An event's version does not match its position in the history,
    /// meaning the sequence has a gap or is out of order.
    #[error("version mismatch in stream '{stream_name}': expected {expected}, got {actual}")]
    VersionMismatch {
        /// Stream being replayed.
        stream_name: String,
        /// Version implied by the fold position.
        expected: u64,
        /// Version found on the event.
        actual: u64,
    },
}

/// Error returned by an [`EventStore`](crate::EventStore) operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency guard: a version in the batch already
    /// exists for its stream. The caller must reload and retry or
    /// abandon; the store never auto-retries.
    #[error("version {version} already exists in stream '{stream_name}' ({stream_id})")]
    Conflict {
        /// Stream the conflicting event targets.
        stream_name: String,
        /// Instance identifier of the stream.
        stream_id: Uuid,
        /// The version that already exists.
        version: u64,
    },

    /// `store` was called with an empty batch.
    #[error("cannot store an empty event batch")]
    EmptyBatch,

    /// All events in one batch must belong to the same stream.
    #[error("event batch spans multiple streams")]
    MixedStreams,

    /// Backend transport or persistence failure. Fatal to the current
    /// operation; not auto-retried by the core.
    #[error("storage backend failure: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Error returned by [`Repository`](crate::Repository) operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The aggregate's stream has never been written.
    #[error("aggregate {id} not found in stream '{stream_name}'")]
    NotFound {
        /// Stream name of the aggregate type.
        stream_name: String,
        /// The requested instance identifier.
        id: Uuid,
    },

    /// Replaying the stored history failed fatally.
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// The event store rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Event publication could not be initiated or acknowledged. Storage
    /// has already succeeded when this surfaces; the event log is
    /// authoritative and recovery is projection replay.
    #[error(transparent)]
    Publish(#[from] EventBusError),
}

/// Error returned by [`CommandBus::publish`](crate::CommandBus::publish).
#[derive(Debug, thiserror::Error)]
pub enum CommandBusError {
    /// No handler is registered for the command's name.
    #[error("no handler registered for command '{0}'")]
    NoHandler(String),

    /// The configured dispatch timeout elapsed while waiting for the
    /// handler. The handler task is not killed and may complete its work
    /// after the caller has received this error.
    #[error("timed out waiting for command handler")]
    Timeout,

    /// The handler ran and returned an error.
    #[error("command handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// The handler task was cancelled or panicked before producing a
    /// result.
    #[error("command handler task ended abnormally")]
    HandlerGone,

    /// The bus has been closed and no longer accepts publishes.
    #[error("command bus is closed")]
    Closed,
}

/// Error returned by [`EventBus`](crate::EventBus) publish operations.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// The bus has been closed; dispatch could not be initiated.
    #[error("event bus is closed")]
    Closed,

    /// Acknowledge mode only: the configured acknowledge timeout elapsed
    /// before every handler finished. Spawned handlers keep running.
    #[error("timed out waiting for event handlers")]
    Timeout,

    /// Acknowledge mode only: at least one handler failed. Carries the
    /// first failure; the rest are logged.
    #[error("event handler failed: {0}")]
    Handler(#[source] HandlerError),
}

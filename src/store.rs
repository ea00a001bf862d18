//! Append-only event persistence: the [`EventStore`] trait and the
//! built-in in-memory backend.
//!
//! The store is the aggregate's sole source of durable truth. Batch
//! appends are all-or-nothing and guarded by optimistic version checks;
//! reads return a stream's full history in ascending version order.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::Event;

/// Append-only persistence abstraction for event streams.
///
/// Implementations may be relational, log-structured, or embedded; the
/// core only requires transactional appends keyed by
/// `(stream_name, stream_id, version)` and ordered range reads. The
/// store is a shared, long-lived resource: implementations must allow
/// full read/write concurrency across distinct streams and serialize
/// only what the backend itself requires.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically append a non-empty batch of events for one stream.
    ///
    /// Either every event in the batch is durably appended or none is,
    /// even under partial failure mid-write. A subsequent load never
    /// observes a partial prefix of the batch.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Conflict`] -- a version in the batch already
    ///   exists for its stream (optimistic concurrency guard).
    /// * [`StoreError::EmptyBatch`] / [`StoreError::MixedStreams`] --
    ///   malformed input.
    /// * [`StoreError::Storage`] -- backend transport or persistence
    ///   failure.
    async fn store(&self, events: &[Event]) -> Result<(), StoreError>;

    /// Read a stream's full history in ascending version order.
    ///
    /// Returns an empty `Vec` (not an error) if the stream has never
    /// been written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on backend failure.
    async fn stream(&self, stream_id: Uuid, stream_name: &str) -> Result<Vec<Event>, StoreError>;
}

/// Stream key: `(stream_name, stream_id)`.
type StreamKey = (String, Uuid);

/// In-memory [`EventStore`] backend.
///
/// Streams live in a `HashMap` behind a single `std::sync::RwLock`; the
/// critical sections are short (validate + extend), so lock-per-call is
/// sufficient for full cross-stream concurrency in practice. Batch
/// validation happens entirely before the first mutation, which is what
/// makes the append all-or-nothing.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<Event>>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store(&self, events: &[Event]) -> Result<(), StoreError> {
        let first = events.first().ok_or(StoreError::EmptyBatch)?;
        let key: StreamKey = (first.stream_name.clone(), first.stream_id);

        if events
            .iter()
            .any(|e| e.stream_name != key.0 || e.stream_id != key.1)
        {
            return Err(StoreError::MixedStreams);
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::Storage(anyhow::anyhow!("event store lock poisoned")))?;
        let stream = streams.entry(key).or_default();

        // Validate the whole batch against the current stream head before
        // touching anything, so a mid-batch conflict appends nothing.
        let mut next = stream.len() as u64;
        for event in events {
            if event.version < next {
                return Err(StoreError::Conflict {
                    stream_name: event.stream_name.clone(),
                    stream_id: event.stream_id,
                    version: event.version,
                });
            }
            if event.version > next {
                return Err(StoreError::Storage(anyhow::anyhow!(
                    "version gap in batch for stream '{}': expected {}, got {}",
                    event.stream_name,
                    next,
                    event.version
                )));
            }
            next += 1;
        }

        stream.extend_from_slice(events);

        tracing::debug!(
            stream_name = %first.stream_name,
            stream_id = %first.stream_id,
            count = events.len(),
            first_version = first.version,
            "appended event batch"
        );

        Ok(())
    }

    async fn stream(&self, stream_id: Uuid, stream_name: &str) -> Result<Vec<Event>, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::Storage(anyhow::anyhow!("event store lock poisoned")))?;
        Ok(streams
            .get(&(stream_name.to_string(), stream_id))
            .cloned()
            .unwrap_or_default())
    }
}

//! Event-sourced repository: the per-aggregate-type coordinator between
//! the event store and the event bus.

use std::marker::PhantomData;
use std::sync::Arc;

use uuid::Uuid;

use crate::aggregate::{Aggregate, Root};
use crate::error::RepositoryError;
use crate::event_bus::EventBus;
use crate::store::EventStore;

/// Loads aggregates by replaying their stream and saves them by
/// appending their pending changes, then forwarding each stored event to
/// the event bus.
///
/// One repository instance serves one aggregate type; construct one per
/// type at process start and share it freely (`Clone` is cheap).
pub struct Repository<A: Aggregate> {
    store: Arc<dyn EventStore>,
    bus: EventBus,
    _marker: PhantomData<fn() -> A>,
}

// Manual `Clone` because `A` itself need not be `Clone` -- only the
// store handle and bus are duplicated.
impl<A: Aggregate> Clone for Repository<A> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            bus: self.bus.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: Aggregate> std::fmt::Debug for Repository<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("stream_name", &A::STREAM_NAME)
            .finish()
    }
}

impl<A: Aggregate> Repository<A> {
    /// Create a repository over the given store and bus.
    pub fn new(store: Arc<dyn EventStore>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            _marker: PhantomData,
        }
    }

    /// Load an aggregate by replaying its stream.
    ///
    /// # Errors
    ///
    /// * [`RepositoryError::NotFound`] -- the stream has never been
    ///   written. A missing aggregate is an error, never a silently
    ///   returned zero-value root.
    /// * [`RepositoryError::Replay`] -- the stored history contains an
    ///   unknown event type or a version gap (fatal).
    /// * [`RepositoryError::Store`] -- the backend read failed.
    pub async fn get(&self, id: Uuid) -> Result<Root<A>, RepositoryError> {
        let events = self.store.stream(id, A::STREAM_NAME).await?;
        if events.is_empty() {
            return Err(RepositoryError::NotFound {
                stream_name: A::STREAM_NAME.to_string(),
                id,
            });
        }

        tracing::debug!(
            stream_name = A::STREAM_NAME,
            stream_id = %id,
            events = events.len(),
            "replaying aggregate"
        );
        Ok(Root::from_history(&events)?)
    }

    /// Persist the aggregate's pending changes, then publish each stored
    /// event fire-and-forget.
    ///
    /// Returns as soon as storage has succeeded and every publish has
    /// been issued; delivery to subscribers races with the caller's
    /// continuation. A save with no pending changes is a successful
    /// no-op.
    ///
    /// If storage fails, nothing is published, the change list is
    /// retained, and the caller should reload and reapply (the store's
    /// version guard is the only deduplication there is). If a publish
    /// fails after storage succeeded, the change list has already been
    /// cleared: the event log is authoritative and consistent, earlier
    /// publishes in the batch stand, and recovery is projection replay,
    /// not event re-emission.
    pub async fn save(&self, root: &mut Root<A>) -> Result<(), RepositoryError> {
        let Some(stored) = self.store_changes(root).await? else {
            return Ok(());
        };

        for event in stored {
            self.bus.publish(event)?;
        }
        Ok(())
    }

    /// Persist the aggregate's pending changes, then publish each stored
    /// event and wait until all its handlers have completed (or failed)
    /// before moving to the next.
    ///
    /// Used when the caller needs read-after-write consistency against a
    /// projection maintained by those handlers. Storage and change-list
    /// semantics are identical to [`save`](Repository::save).
    pub async fn save_and_acknowledge(&self, root: &mut Root<A>) -> Result<(), RepositoryError> {
        let Some(stored) = self.store_changes(root).await? else {
            return Ok(());
        };

        for event in stored {
            self.bus.publish_and_acknowledge(event).await?;
        }
        Ok(())
    }

    /// Shared storage step: append the change list atomically and clear
    /// it on success. Returns `None` for a no-op save.
    async fn store_changes(
        &self,
        root: &mut Root<A>,
    ) -> Result<Option<Vec<crate::event::Event>>, RepositoryError> {
        if root.changes().is_empty() {
            tracing::debug!(
                stream_name = A::STREAM_NAME,
                stream_id = %root.id(),
                "save with no pending changes"
            );
            return Ok(None);
        }

        self.store.store(root.changes()).await?;

        tracing::debug!(
            stream_name = A::STREAM_NAME,
            stream_id = %root.id(),
            events = root.changes().len(),
            version = root.version(),
            "stored aggregate changes"
        );

        let stored = root.changes().to_vec();
        root.mark_committed();
        Ok(Some(stored))
    }
}

//! Event-sourcing and CQRS building blocks: immutable event envelopes,
//! replayable aggregate roots, an atomic append-only event store, and
//! in-process command and event buses.

mod aggregate;
pub use aggregate::{Aggregate, Root};
mod command;
pub use command::{Command, CommandContext};
mod command_bus;
pub use command_bus::{CommandBus, CommandBusConfig};
mod error;
pub use error::{
    CommandBusError, EventBusError, EventError, HandlerError, ReplayError, RepositoryError,
    StoreError,
};
mod event;
pub use event::{Event, Identity, decode_domain_event, encode_domain_event};
mod event_bus;
pub use event_bus::{EventBus, EventBusConfig, EventHandler, HandlerFuture};
mod repository;
pub use repository::Repository;
mod store;
pub use store::{EventStore, InMemoryEventStore};

//! Command envelope and dispatch context types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Identity;

/// Cross-cutting metadata passed alongside a command.
///
/// Carries the acting principal, correlation, and tracing information
/// without polluting domain command or event types. The actor is stamped
/// onto every event the command produces; an empty context means the
/// operation is system-originated.
///
/// # Examples
///
/// ```
/// use eventum::{CommandContext, Identity};
/// use uuid::Uuid;
///
/// let ctx = CommandContext::default()
///     .with_actor(Identity::new(Uuid::new_v4()))
///     .with_correlation_id("req-abc-123");
///
/// assert!(ctx.actor.is_some());
/// assert_eq!(ctx.correlation_id.as_deref(), Some("req-abc-123"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandContext {
    /// Identity of the principal issuing the command.
    pub actor: Option<Identity>,
    /// Correlation ID for tracing a request across aggregates.
    pub correlation_id: Option<String>,
    /// Arbitrary metadata forwarded to handlers.
    pub metadata: Option<Value>,
}

impl CommandContext {
    /// Set the acting principal.
    pub fn with_actor(mut self, actor: Identity) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Set the correlation ID.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set arbitrary metadata.
    pub fn with_metadata(mut self, meta: Value) -> Self {
        self.metadata = Some(meta);
        self
    }
}

/// A type-erased command envelope dispatched through the
/// [`CommandBus`](crate::CommandBus).
///
/// The `payload` is a `serde_json::Value` because the bus does not know
/// the concrete command type at compile time; handlers are keyed by
/// `name` and deserialize the payload via [`Command::payload_as`]. An
/// unknown name at dispatch time is a `NoHandler` error, never a silent
/// drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Command name, the dispatch key (e.g. `"RegisterUserWithEmail"`).
    pub name: String,
    /// JSON-serialized command fields.
    pub payload: Value,
    /// Cross-cutting metadata forwarded to the handler.
    pub context: CommandContext,
}

impl Command {
    /// Build a command envelope from a serializable payload.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the payload cannot be serialized.
    pub fn new<P: Serialize>(
        name: impl Into<String>,
        payload: &P,
        context: CommandContext,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            name: name.into(),
            payload: serde_json::to_value(payload)?,
            context,
        })
    }

    /// Deserialize the payload into a concrete command type.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the payload does not match `P`.
    pub fn payload_as<P: DeserializeOwned>(&self) -> serde_json::Result<P> {
        serde_json::from_value(self.payload.clone())
    }
}

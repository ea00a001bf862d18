//! The immutable event envelope and the codec between domain event enums
//! and the envelope's `(event_type, payload)` pair.
//!
//! This module provides the foundational data types and pure functions
//! that the aggregate, store, repository, and bus modules all depend on.
//! No I/O occurs here.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EventError, ReplayError};

/// Identity of the principal that caused an event.
///
/// Attached to outgoing events via
/// [`CommandContext::actor`](crate::CommandContext); absent for
/// system-originated events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique identifier of the principal.
    pub id: Uuid,
    /// Email address, if the principal is a user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    /// Create an identity with just an id.
    pub fn new(id: Uuid) -> Self {
        Self { id, email: None }
    }

    /// Attach an email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// An immutable fact describing a past state change.
///
/// Events are produced by aggregate transitions, persisted by the
/// [`EventStore`](crate::EventStore), and delivered to subscribers via
/// the [`EventBus`](crate::EventBus). Once created they are never
/// mutated or deleted; the version sequence within a
/// `(stream_id, stream_name)` pair is gapless and starts at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique event identifier (UUID v4, generated at creation).
    pub id: Uuid,
    /// Aggregate instance identifier.
    pub stream_id: Uuid,
    /// Aggregate-type discriminator (e.g. `"User"`).
    pub stream_name: String,
    /// Zero-based position within the stream; defines total replay order.
    pub version: u64,
    /// Discriminator identifying the concrete payload shape.
    pub event_type: String,
    /// Serialized domain-specific fields; `Null` for fieldless events.
    pub payload: Value,
    /// Creation time, set once.
    pub occurred_at: DateTime<Utc>,
    /// Principal that caused the event, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<Identity>,
}

/// Encode a domain event into an [`Event`] envelope.
///
/// The domain event must use `#[serde(tag = "type", content = "data")]`
/// adjacently tagged serialization. The `"type"` field becomes
/// [`Event::event_type`] and the `"data"` field (absent for unit
/// variants) becomes [`Event::payload`].
///
/// # Arguments
///
/// * `domain_event` - The domain event to encode.
/// * `stream_id` - Aggregate instance identifier.
/// * `stream_name` - Aggregate-type discriminator.
/// * `version` - Version to stamp on the envelope.
/// * `actor` - Principal causing the event, if any.
///
/// # Errors
///
/// Returns [`EventError::Serialize`] if the domain event cannot be
/// serialized, or [`EventError::NotAdjacentlyTagged`] if it does not
/// serialize to a `{"type": ...}` object.
pub fn encode_domain_event<E: Serialize>(
    domain_event: &E,
    stream_id: Uuid,
    stream_name: &str,
    version: u64,
    actor: Option<Identity>,
) -> Result<Event, EventError> {
    // Serialize the adjacently tagged domain event. This produces JSON like:
    //   {"type": "AccessTokenWasRequested"}                  (unit variant)
    //   {"type": "WasRegisteredWithEmail", "data": {...}}    (variant with fields)
    let value = serde_json::to_value(domain_event).map_err(EventError::Serialize)?;
    let obj = value.as_object().ok_or(EventError::NotAdjacentlyTagged)?;

    let event_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(EventError::NotAdjacentlyTagged)?
        .to_string();

    // The "data" field is absent for unit variants, so default to null.
    let payload = obj.get("data").cloned().unwrap_or(Value::Null);

    Ok(Event {
        id: Uuid::new_v4(),
        stream_id,
        stream_name: stream_name.to_string(),
        version,
        event_type,
        payload,
        occurred_at: Utc::now(),
        actor,
    })
}

/// Decode an [`Event`] envelope back into a domain event.
///
/// Reconstructs the adjacently tagged JSON object from
/// [`Event::event_type`] and [`Event::payload`] and deserializes it into
/// the target enum.
///
/// # Errors
///
/// Returns [`ReplayError::UnknownEventType`] if the event's type tag is
/// not a variant of `E` or its payload does not match the variant shape.
/// This is a fatal condition during replay: it indicates a
/// serialization or versioning bug, never something to skip silently.
pub fn decode_domain_event<E: DeserializeOwned>(event: &Event) -> Result<E, ReplayError> {
    let tagged = if event.payload.is_null() {
        serde_json::json!({ "type": event.event_type })
    } else {
        serde_json::json!({
            "type": event.event_type,
            "data": event.payload,
        })
    };

    serde_json::from_value(tagged).map_err(|source| ReplayError::UnknownEventType {
        stream_name: event.stream_name.clone(),
        event_type: event.event_type.clone(),
        version: event.version,
        source,
    })
}

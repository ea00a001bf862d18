//! Aggregate trait and the event-sourced `Root` wrapper.

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::command::CommandContext;
use crate::error::{EventError, ReplayError};
use crate::event::{Event, decode_domain_event, encode_domain_event};

/// A domain aggregate whose state is derived from its event history.
///
/// The implementing type is the aggregate's state; identity, version,
/// and the uncommitted change list live in the [`Root`] wrapper. State
/// is built by folding domain events through [`apply`](Aggregate::apply).
///
/// # Contract
///
/// - `DomainEvent` is a closed, adjacently tagged enum
///   (`#[serde(tag = "type", content = "data")]`); the compiler enforces
///   an exhaustive fold, and an unknown type tag encountered during
///   replay is a fatal [`ReplayError`], never a silent skip.
/// - [`apply`](Aggregate::apply) must be a pure, total, side-effect-free
///   function of the current state and the event, so replay is
///   deterministic and repeatable.
/// - Domain operations validate business rules against the current state
///   and record exactly one event via [`Root::record`] on success; on a
///   rule violation they return the aggregate's own error type and leave
///   state and changes untouched.
pub trait Aggregate: Default + Send + Sync + 'static {
    /// Logical stream name for this aggregate type (e.g. `"User"`).
    const STREAM_NAME: &'static str;

    /// The closed set of events this aggregate can produce and apply.
    type DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Fold a single event into the state.
    fn apply(&mut self, event: &Self::DomainEvent);
}

/// The authoritative in-memory representation of one aggregate instance:
/// identity, version, uncommitted changes, and the folded state.
///
/// A `Root` is owned exclusively by the unit of work that loaded it; it
/// is not shared across concurrent mutations. Concurrent writers racing
/// on the same stream are resolved by the event store's version guard,
/// not by locking the in-memory instance.
#[derive(Debug)]
pub struct Root<A: Aggregate> {
    id: Uuid,
    version: u64,
    changes: Vec<Event>,
    state: A,
}

impl<A: Aggregate> Root<A> {
    /// Create a fresh aggregate root with no history.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            changes: Vec::new(),
            state: A::default(),
        }
    }

    /// Rebuild an aggregate root by folding its event history in order.
    ///
    /// The input must already be sorted by ascending version, which is
    /// what [`EventStore::stream`](crate::EventStore::stream) guarantees.
    /// The resulting root has `version() == events.len()` and an empty
    /// change list.
    ///
    /// # Errors
    ///
    /// * [`ReplayError::UnknownEventType`] -- an event's type tag is not
    ///   part of `A::DomainEvent`. Fatal: it indicates a serialization
    ///   or versioning bug, not a recoverable condition.
    /// * [`ReplayError::VersionMismatch`] -- an event's version does not
    ///   match its fold position (gap or disorder in the history).
    pub fn from_history(events: &[Event]) -> Result<Self, ReplayError> {
        let id = events.first().map(|e| e.stream_id).unwrap_or(Uuid::nil());
        let mut root = Self::new(id);

        for (position, event) in events.iter().enumerate() {
            let expected = position as u64;
            if event.version != expected {
                return Err(ReplayError::VersionMismatch {
                    stream_name: A::STREAM_NAME.to_string(),
                    expected,
                    actual: event.version,
                });
            }
            let domain_event = decode_domain_event::<A::DomainEvent>(event)?;
            root.state.apply(&domain_event);
            root.version += 1;
        }

        Ok(root)
    }

    /// Record a single domain event produced by a domain operation.
    ///
    /// Encodes the envelope at the current version with the actor from
    /// `ctx`, folds it into the state, appends it to the uncommitted
    /// change list, and increments the version. Domain operations call
    /// this exactly once after their business-rule checks pass.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] if the domain event cannot be encoded; the
    /// state and change list are left untouched in that case.
    pub fn record(
        &mut self,
        ctx: &CommandContext,
        domain_event: A::DomainEvent,
    ) -> Result<(), EventError> {
        let event = encode_domain_event(
            &domain_event,
            self.id,
            A::STREAM_NAME,
            self.version,
            ctx.actor.clone(),
        )?;

        tracing::debug!(
            stream_name = A::STREAM_NAME,
            stream_id = %self.id,
            version = event.version,
            event_type = %event.event_type,
            "recorded event"
        );

        self.state.apply(&domain_event);
        self.changes.push(event);
        self.version += 1;
        Ok(())
    }

    /// Aggregate instance identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Count of events applied so far; also the version the next
    /// recorded event will receive.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The folded domain state.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Events recorded during the current unit of work, in order, not
    /// yet persisted.
    pub fn changes(&self) -> &[Event] {
        &self.changes
    }

    /// Discard the uncommitted change list after persistence.
    ///
    /// Called by [`Repository`](crate::Repository) once the event store
    /// append has succeeded; the aggregate never persists itself.
    pub fn mark_committed(&mut self) {
        self.changes.clear();
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use serde::{Deserialize, Serialize};

    use super::{Aggregate, Root};
    use crate::command::CommandContext;
    use crate::error::EventError;

    /// User aggregate state used as a test fixture across the crate.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct User {
        pub email: Option<String>,
    }

    impl User {
        pub(crate) fn is_registered(&self) -> bool {
            self.email.is_some()
        }
    }

    /// Domain events produced by the `User` aggregate.
    ///
    /// Uses adjacently tagged serialization (`"type"` + `"data"`), the
    /// convention for all `DomainEvent` types in this crate.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    pub(crate) enum UserEvent {
        WasRegisteredWithEmail { email: String },
        EmailAddressWasChanged { email: String },
        AccessTokenWasRequested,
    }

    /// Business-rule violations for `User` operations.
    #[derive(Debug, thiserror::Error)]
    pub(crate) enum UserError {
        #[error("user is already registered")]
        AlreadyRegistered,
        #[error("user is not registered")]
        NotRegistered,
        #[error("invalid email address: {0}")]
        InvalidEmail(String),
        #[error(transparent)]
        Event(#[from] EventError),
    }

    impl Aggregate for User {
        const STREAM_NAME: &'static str = "User";

        type DomainEvent = UserEvent;

        fn apply(&mut self, event: &UserEvent) {
            match event {
                UserEvent::WasRegisteredWithEmail { email } => self.email = Some(email.clone()),
                UserEvent::EmailAddressWasChanged { email } => self.email = Some(email.clone()),
                UserEvent::AccessTokenWasRequested => {}
            }
        }
    }

    /// Register a new user. Fails if the user already exists or the
    /// email is malformed; records exactly one event on success.
    pub(crate) fn register_with_email(
        root: &mut Root<User>,
        ctx: &CommandContext,
        email: &str,
    ) -> Result<(), UserError> {
        if root.state().is_registered() {
            return Err(UserError::AlreadyRegistered);
        }
        if !email.contains('@') {
            return Err(UserError::InvalidEmail(email.to_string()));
        }
        root.record(
            ctx,
            UserEvent::WasRegisteredWithEmail {
                email: email.to_string(),
            },
        )?;
        Ok(())
    }

    /// Change a registered user's email address.
    pub(crate) fn change_email_address(
        root: &mut Root<User>,
        ctx: &CommandContext,
        email: &str,
    ) -> Result<(), UserError> {
        if !root.state().is_registered() {
            return Err(UserError::NotRegistered);
        }
        if !email.contains('@') {
            return Err(UserError::InvalidEmail(email.to_string()));
        }
        root.record(
            ctx,
            UserEvent::EmailAddressWasChanged {
                email: email.to_string(),
            },
        )?;
        Ok(())
    }

    /// Request an access token for a registered user.
    pub(crate) fn request_access_token(
        root: &mut Root<User>,
        ctx: &CommandContext,
    ) -> Result<(), UserError> {
        if !root.state().is_registered() {
            return Err(UserError::NotRegistered);
        }
        root.record(ctx, UserEvent::AccessTokenWasRequested)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::test_fixtures::{
        User, UserError, UserEvent, change_email_address, register_with_email,
        request_access_token,
    };
    use super::*;
    use crate::event::Identity;

    fn ctx() -> CommandContext {
        CommandContext::default()
    }

    #[test]
    fn register_records_exactly_one_event_at_version_zero() {
        let id = Uuid::new_v4();
        let mut root = Root::<User>::new(id);

        register_with_email(&mut root, &ctx(), "a@b.com").expect("register should succeed");

        assert_eq!(root.changes().len(), 1);
        let event = &root.changes()[0];
        assert_eq!(event.event_type, "WasRegisteredWithEmail");
        assert_eq!(event.version, 0);
        assert_eq!(event.stream_id, id);
        assert_eq!(event.stream_name, "User");
        assert_eq!(root.version(), 1);
        assert_eq!(root.state().email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn rejected_operation_leaves_state_and_changes_untouched() {
        let mut root = Root::<User>::new(Uuid::new_v4());
        register_with_email(&mut root, &ctx(), "a@b.com").expect("register should succeed");

        let err = register_with_email(&mut root, &ctx(), "other@b.com")
            .expect_err("second register must fail");
        assert!(matches!(err, UserError::AlreadyRegistered));

        // No new event, no state change, no version bump.
        assert_eq!(root.changes().len(), 1);
        assert_eq!(root.version(), 1);
        assert_eq!(root.state().email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn operation_on_missing_aggregate_is_rejected() {
        let mut root = Root::<User>::new(Uuid::new_v4());
        let err = change_email_address(&mut root, &ctx(), "a@b.com")
            .expect_err("change on unregistered user must fail");
        assert!(matches!(err, UserError::NotRegistered));
        assert!(root.changes().is_empty());
    }

    #[test]
    fn record_stamps_actor_from_context() {
        let actor = Identity::new(Uuid::new_v4()).with_email("admin@example.com");
        let ctx = CommandContext::default().with_actor(actor.clone());

        let mut root = Root::<User>::new(Uuid::new_v4());
        register_with_email(&mut root, &ctx, "a@b.com").expect("register should succeed");

        assert_eq!(root.changes()[0].actor, Some(actor));
    }

    #[test]
    fn system_originated_events_have_no_actor() {
        let mut root = Root::<User>::new(Uuid::new_v4());
        register_with_email(&mut root, &ctx(), "a@b.com").expect("register should succeed");
        assert_eq!(root.changes()[0].actor, None);
    }

    #[test]
    fn versions_increase_across_successive_operations() {
        let mut root = Root::<User>::new(Uuid::new_v4());
        register_with_email(&mut root, &ctx(), "a@b.com").expect("register should succeed");
        change_email_address(&mut root, &ctx(), "new@b.com").expect("change should succeed");
        request_access_token(&mut root, &ctx()).expect("token request should succeed");

        let versions: Vec<u64> = root.changes().iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![0, 1, 2]);
        assert_eq!(root.version(), 3);
    }

    #[test]
    fn replay_is_deterministic_and_counts_versions() {
        let mut root = Root::<User>::new(Uuid::new_v4());
        register_with_email(&mut root, &ctx(), "a@b.com").expect("register should succeed");
        change_email_address(&mut root, &ctx(), "new@b.com").expect("change should succeed");
        let history = root.changes().to_vec();

        let first = Root::<User>::from_history(&history).expect("first replay should succeed");
        let second = Root::<User>::from_history(&history).expect("second replay should succeed");

        assert_eq!(first.state(), second.state());
        assert_eq!(first.version(), 2);
        assert_eq!(second.version(), 2);
        assert!(first.changes().is_empty(), "replay produces no changes");
        assert_eq!(first.id(), root.id());
        assert_eq!(first.state().email.as_deref(), Some("new@b.com"));
    }

    #[test]
    fn replay_fails_fatally_on_unknown_event_type() {
        let mut root = Root::<User>::new(Uuid::new_v4());
        register_with_email(&mut root, &ctx(), "a@b.com").expect("register should succeed");
        let mut history = root.changes().to_vec();

        // Simulate an event written by a newer schema revision.
        let mut rogue = history[0].clone();
        rogue.id = Uuid::new_v4();
        rogue.version = 1;
        rogue.event_type = "WasSuspended".to_string();
        rogue.payload = serde_json::Value::Null;
        history.push(rogue);

        let err = Root::<User>::from_history(&history).expect_err("replay must fail");
        assert!(
            matches!(err, ReplayError::UnknownEventType { ref event_type, .. } if event_type == "WasSuspended"),
            "expected UnknownEventType, got: {err:?}"
        );
    }

    #[test]
    fn replay_fails_on_version_gap() {
        let event = Event {
            id: Uuid::new_v4(),
            stream_id: Uuid::new_v4(),
            stream_name: "User".to_string(),
            version: 2, // history starts at 0
            event_type: "WasRegisteredWithEmail".to_string(),
            payload: serde_json::json!({"email": "a@b.com"}),
            occurred_at: Utc::now(),
            actor: None,
        };

        let err = Root::<User>::from_history(&[event]).expect_err("replay must fail");
        assert!(
            matches!(
                err,
                ReplayError::VersionMismatch {
                    expected: 0,
                    actual: 2,
                    ..
                }
            ),
            "expected VersionMismatch, got: {err:?}"
        );
    }

    #[test]
    fn mark_committed_clears_changes_but_keeps_state() {
        let mut root = Root::<User>::new(Uuid::new_v4());
        register_with_email(&mut root, &ctx(), "a@b.com").expect("register should succeed");

        root.mark_committed();

        assert!(root.changes().is_empty());
        assert_eq!(root.version(), 1);
        assert_eq!(root.state().email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn recorded_events_replay_into_equal_state() {
        let mut root = Root::<User>::new(Uuid::new_v4());
        register_with_email(&mut root, &ctx(), "a@b.com").expect("register should succeed");
        request_access_token(&mut root, &ctx()).expect("token request should succeed");

        let replayed =
            Root::<User>::from_history(root.changes()).expect("replay should succeed");
        assert_eq!(replayed.state(), root.state());
        assert_eq!(replayed.version(), root.version());
    }

    #[test]
    fn fold_matches_direct_application() {
        let mut by_apply = User::default();
        by_apply.apply(&UserEvent::WasRegisteredWithEmail {
            email: "a@b.com".to_string(),
        });
        by_apply.apply(&UserEvent::EmailAddressWasChanged {
            email: "new@b.com".to_string(),
        });

        assert_eq!(by_apply.email.as_deref(), Some("new@b.com"));
    }
}

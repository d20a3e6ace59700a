//! Listener events and traits.

use crate::change::{ChangeType, EntityChangeDescription};
use crate::constraint::ViolationSet;
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::session::Session;
use crate::types::SessionId;
use std::collections::BTreeMap;
use transient_store::Value;

/// Pipeline phase of a session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Before validation. Listeners may still change the session.
    BeforeFlushBeforeConstraints,
    /// After successful validation, before durability. Listeners must not
    /// change the session.
    BeforeFlushAfterConstraints,
    /// Validation failed; the event carries every violation.
    AfterConstraintsFail,
    /// Changes are durable.
    Flushed,
}

/// Pipeline phase of an entity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityPhase {
    /// Before validation.
    BeforeConstraints,
    /// After successful validation, before durability.
    AfterConstraints,
    /// Changes are durable; delivered on the flushing thread.
    Flushed,
    /// Changes are durable; delivered on the async dispatcher.
    Async,
}

/// Event delivered to session listeners.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    /// Pipeline phase.
    pub phase: SessionPhase,
    /// The flushing session.
    pub session_id: SessionId,
    /// Every pending change. In the `Flushed` phase New entities carry
    /// their store IDs.
    pub changes: Vec<EntityChangeDescription>,
    /// Violations, only in the `AfterConstraintsFail` phase.
    pub violations: Option<ViolationSet>,
}

/// Event delivered to entity listeners, one per changed entity.
#[derive(Debug, Clone)]
pub struct EntityEvent {
    /// Pipeline phase.
    pub phase: EntityPhase,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Handle of the changed entity.
    pub entity: Entity,
    /// Type name of the entity.
    pub type_name: String,
    /// Full change description.
    pub description: EntityChangeDescription,
    /// Snapshot values of the changed properties.
    pub old_values: BTreeMap<String, Option<Value>>,
}

impl EntityEvent {
    /// Returns the snapshot value of a changed property.
    #[must_use]
    pub fn old_value(&self, name: &str) -> Option<&Value> {
        self.old_values.get(name).and_then(Option::as_ref)
    }
}

/// Receives session events.
///
/// An error returned before durability rejects the flush; errors in the
/// `Flushed` and `AfterConstraintsFail` phases are logged and ignored.
pub trait SessionListener: Send + Sync {
    /// Handles one event.
    fn on_event(&self, session: &mut Session, event: &SessionEvent) -> CoreResult<()>;
}

impl<F> SessionListener for F
where
    F: Fn(&mut Session, &SessionEvent) -> CoreResult<()> + Send + Sync,
{
    fn on_event(&self, session: &mut Session, event: &SessionEvent) -> CoreResult<()> {
        self(session, event)
    }
}

/// Receives entity events.
///
/// Same error policy as [`SessionListener`]; `Async` phase errors are
/// logged by the dispatcher.
pub trait EntityListener: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &EntityEvent) -> CoreResult<()>;
}

impl<F> EntityListener for F
where
    F: Fn(&EntityEvent) -> CoreResult<()> + Send + Sync,
{
    fn on_event(&self, event: &EntityEvent) -> CoreResult<()> {
        self(event)
    }
}

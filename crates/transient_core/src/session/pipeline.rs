//! Flush and commit pipeline.

use super::Session;
use crate::change::{ChangeTracker, EntityChangeDescription};
use crate::conflict::{ConflictDetector, ConflictReport};
use crate::constraint::ViolationSet;
use crate::entity::{Identity, TempId};
use crate::error::{CoreError, CoreResult};
use crate::listener::{
    EntityEvent, EntityPhase, Listener, Registration, SessionEvent, SessionPhase,
};
use crate::types::SessionState;
use std::collections::HashMap;
use std::thread;
use transient_store::EntityId;

/// Why one durability attempt did not succeed.
enum Failure {
    /// Version conflict; the attempt may be replayed.
    Conflict(ConflictReport),
    /// Rejected by constraints or a listener; nothing was written.
    Rejected(CoreError),
    /// Anything else; the session cannot continue.
    Fatal(CoreError),
}

impl From<CoreError> for Failure {
    fn from(err: CoreError) -> Self {
        Failure::Fatal(err)
    }
}

/// Store IDs allocated for New entities in a successful attempt.
type Created = HashMap<TempId, EntityId>;

impl Session {
    /// Makes all pending changes durable and keeps the session open.
    ///
    /// Runs the whole pipeline: listeners, validation, conflict check and
    /// the store flush, replaying after version conflicts. Does nothing if
    /// there are no pending changes.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Constraints`] with every violation; pending changes are
    ///   discarded and the session stays open
    /// - [`CoreError::Listener`] (or any error a listener returned) from a
    ///   phase before durability; same handling as constraint failures
    /// - [`CoreError::Conflict`] once retries are exhausted; the session is
    ///   aborted
    /// - [`CoreError::EntityRemovedInStore`] if a replay finds a touched
    ///   entity deleted; the session is aborted
    pub fn flush(&mut self) -> CoreResult<()> {
        self.run_pipeline(false)
    }

    /// Makes all pending changes durable and ends the session.
    ///
    /// # Errors
    ///
    /// Same as [`Session::flush`], except that every failure aborts the
    /// session.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.run_pipeline(true)
    }

    fn run_pipeline(&mut self, terminal: bool) -> CoreResult<()> {
        if self.state != SessionState::Open || self.txn.is_none() {
            return Err(CoreError::illegal_state(format!(
                "cannot flush {} in state {:?}",
                self.id, self.state
            )));
        }

        if self.tracker.is_empty() {
            tracing::trace!(session = %self.id, "nothing to flush");
            if terminal {
                self.finish_commit();
            }
            return Ok(());
        }

        self.state = SessionState::Flushing;
        let max_retries = self.shared.config.max_conflict_retries;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt() {
                Ok(created) => {
                    self.complete(&created, terminal);
                    return Ok(());
                }
                Err(Failure::Conflict(report)) if attempt <= max_retries => {
                    self.shared.stats.record_conflict_retry();
                    let delay = self.shared.config.backoff_for(attempt);
                    tracing::debug!(
                        session = %self.id,
                        %report,
                        attempt,
                        ?delay,
                        "version conflict, replaying"
                    );
                    thread::sleep(delay);
                    if let Err(err) = self.replay() {
                        return Err(self.fail(err, true));
                    }
                }
                Err(Failure::Conflict(report)) => {
                    tracing::debug!(session = %self.id, %report, attempt, "conflict retries exhausted");
                    let err = CoreError::Conflict {
                        entity: Identity::Persistent(report.entity),
                        attempts: attempt,
                    };
                    return Err(self.fail(err, true));
                }
                Err(Failure::Rejected(err)) => return Err(self.fail(err, terminal)),
                Err(Failure::Fatal(err)) => return Err(self.fail(err, true)),
            }
        }
    }

    /// Runs steps one to five of the pipeline once.
    fn attempt(&mut self) -> Result<Created, Failure> {
        let registrations = self.shared.listeners.snapshot();

        self.dispatch_phase(
            &registrations,
            SessionPhase::BeforeFlushBeforeConstraints,
            EntityPhase::BeforeConstraints,
        )
        .map_err(Failure::Rejected)?;

        let violations = self.shared.schema.validate(&self.view()?)?;
        if !violations.is_empty() {
            self.shared.stats.record_constraint_failure();
            tracing::debug!(
                session = %self.id,
                violations = violations.len(),
                "constraint validation failed"
            );
            self.dispatch_constraints_failed(&registrations, &violations);
            return Err(Failure::Rejected(CoreError::Constraints(violations)));
        }

        self.dispatch_phase(
            &registrations,
            SessionPhase::BeforeFlushAfterConstraints,
            EntityPhase::AfterConstraints,
        )
        .map_err(Failure::Rejected)?;

        self.write()
    }

    /// Conflict pre-check, then apply and flush in the store.
    fn write(&mut self) -> Result<Created, Failure> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| CoreError::illegal_state("session has no transaction"))?;

        if let Some(report) = ConflictDetector::detect(&self.tracker, &**txn) {
            return Err(Failure::Conflict(report));
        }

        let created = match self.tracker.apply(&mut **txn) {
            Ok(created) => created,
            Err(err) => {
                txn.revert();
                return Err(Failure::Fatal(err));
            }
        };

        match txn.flush() {
            Ok(version) => {
                tracing::trace!(session = %self.id, %version, "changes flushed to store");
                Ok(created)
            }
            Err(err) => {
                txn.revert();
                match ConflictReport::from_store_error(&err) {
                    Some(report) => Err(Failure::Conflict(report)),
                    None => Err(Failure::Fatal(err.into())),
                }
            }
        }
    }

    /// Moves to the latest snapshot and rebases the pending changes on it.
    fn replay(&mut self) -> CoreResult<()> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| CoreError::illegal_state("session has no transaction"))?;
        txn.revert();
        self.tracker.rebase(&**txn)
    }

    /// Step seven: settle handles and notify post-durability listeners.
    fn complete(&mut self, created: &Created, terminal: bool) {
        let tracker = std::mem::take(&mut self.tracker);
        let changes: Vec<EntityChangeDescription> = tracker
            .all_changes()
            .iter()
            .map(|c| c.resolve(created))
            .collect();
        let flushed = entity_events(&tracker, EntityPhase::Flushed, Some(created));
        tracker.settle_handles(created);
        {
            let mut handles = self.handles.lock();
            for (temp, id) in created {
                if let Some(entity) = tracker.entity(&Identity::Temporary(*temp)) {
                    handles.insert(*id, entity.clone());
                }
            }
        }

        if terminal {
            self.finish_commit();
        } else {
            self.state = SessionState::Open;
            self.shared.stats.record_flush();
            tracing::debug!(session = %self.id, changes = changes.len(), "session flushed");
        }

        let registrations = self.shared.listeners.snapshot();
        let event = SessionEvent {
            phase: SessionPhase::Flushed,
            session_id: self.id,
            changes,
            violations: None,
        };
        for registration in &registrations {
            match &registration.listener {
                Listener::Session(listener) => {
                    if let Err(err) = listener.on_event(self, &event) {
                        tracing::warn!(session = %self.id, error = %err, "flushed listener failed");
                    }
                }
                Listener::Entity { listener, .. } => {
                    for event in flushed.iter().filter(|e| registration.accepts(&e.type_name)) {
                        if let Err(err) = listener.on_event(event) {
                            tracing::warn!(
                                entity = %event.description.entity,
                                error = %err,
                                "flushed entity listener failed"
                            );
                        }
                    }
                }
            }
        }

        self.dispatch_async(&registrations, flushed);
    }

    fn dispatch_async(&self, registrations: &[Registration], flushed: Vec<EntityEvent>) {
        for registration in registrations {
            let Listener::Entity { listener, .. } = &registration.listener else {
                continue;
            };
            for event in flushed.iter().filter(|e| registration.accepts(&e.type_name)) {
                let mut event = event.clone();
                event.phase = EntityPhase::Async;
                self.shared.stats.record_async_dispatch();
                let queued = match &self.shared.dispatcher {
                    Some(dispatcher) => dispatcher.submit(listener.clone(), event.clone()),
                    None => false,
                };
                if !queued {
                    if let Err(err) = listener.on_event(&event) {
                        tracing::warn!(
                            entity = %event.description.entity,
                            error = %err,
                            "async entity listener failed"
                        );
                    }
                }
            }
        }
    }

    /// Ends the session after its last writes became durable.
    fn finish_commit(&mut self) {
        if let Some(txn) = self.txn.take() {
            if let Err(err) = txn.commit() {
                tracing::warn!(session = %self.id, error = %err, "releasing store transaction failed");
            }
        }
        self.state = SessionState::Committed;
        self.shared.release(self.id);
        self.shared.stats.record_commit();
        tracing::debug!(session = %self.id, "session committed");
    }

    /// Discards the pending changes after a failed attempt.
    fn fail(&mut self, err: CoreError, abort: bool) -> CoreError {
        if self.state == SessionState::Aborted {
            return err;
        }
        if abort {
            self.abort_now();
        } else {
            let tracker = std::mem::take(&mut self.tracker);
            tracker.discard_handles();
            if let Some(txn) = self.txn.as_mut() {
                if txn.has_pending_writes() {
                    txn.revert();
                }
            }
            self.state = SessionState::Open;
            tracing::debug!(session = %self.id, error = %err, "flush rejected, changes discarded");
        }
        err
    }

    /// Runs the listeners of a phase before durability, in registration
    /// order. Entity events are rebuilt after each session listener.
    fn dispatch_phase(
        &mut self,
        registrations: &[Registration],
        session_phase: SessionPhase,
        entity_phase: EntityPhase,
    ) -> CoreResult<()> {
        let mut events: Option<Vec<EntityEvent>> = None;
        for registration in registrations {
            match &registration.listener {
                Listener::Session(listener) => {
                    let event = SessionEvent {
                        phase: session_phase,
                        session_id: self.id,
                        changes: self.tracker.all_changes(),
                        violations: None,
                    };
                    listener.on_event(self, &event)?;
                    if self.state != SessionState::Flushing {
                        return Err(CoreError::illegal_state(format!(
                            "{} became {:?} inside a session listener",
                            self.id, self.state
                        )));
                    }
                    events = None;
                }
                Listener::Entity { listener, .. } => {
                    let events = events
                        .get_or_insert_with(|| entity_events(&self.tracker, entity_phase, None));
                    for event in events.iter().filter(|e| registration.accepts(&e.type_name)) {
                        listener.on_event(event)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Notifies session listeners of a failed validation. Their errors are
    /// logged.
    fn dispatch_constraints_failed(
        &mut self,
        registrations: &[Registration],
        violations: &ViolationSet,
    ) {
        let event = SessionEvent {
            phase: SessionPhase::AfterConstraintsFail,
            session_id: self.id,
            changes: self.tracker.all_changes(),
            violations: Some(violations.clone()),
        };
        for registration in registrations {
            if let Listener::Session(listener) = &registration.listener {
                if let Err(err) = listener.on_event(self, &event) {
                    tracing::warn!(session = %self.id, error = %err, "constraint failure listener failed");
                }
            }
        }
    }
}

/// Builds one entity event per pending change.
fn entity_events(
    tracker: &ChangeTracker,
    phase: EntityPhase,
    created: Option<&Created>,
) -> Vec<EntityEvent> {
    tracker
        .all_changes()
        .into_iter()
        .filter_map(|description| {
            let entity = tracker.entity(&description.entity)?.clone();
            let old_values = tracker.old_values(&description.entity);
            let description = match created {
                Some(created) => description.resolve(created),
                None => description,
            };
            Some(EntityEvent {
                phase,
                change_type: description.change_type,
                type_name: description.type_name.clone(),
                entity,
                description,
                old_values,
            })
        })
        .collect()
}

//! End-to-end session scenarios over the in-memory store.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use transient_core::{
    ChangeType, Config, CoreError, EntityEvent, EntityPhase, EntityState, Identity, Session,
    SessionEvent, SessionPhase, SessionState, ViolationKind,
};
use transient_store::Value;
use transient_testkit::prelude::*;

#[test]
fn flushed_listeners_see_each_flush_separately() {
    let registry = TestRegistry::synchronous();
    let log = EventLog::new();
    log.attach(&registry);

    let mut session = registry.begin().unwrap();
    let user = session.new_entity("User").unwrap();
    user.set_property(&mut session, "login", Value::from("vadim"))
        .unwrap();
    session.flush().unwrap();
    assert!(session.is_open());
    let user_id = user.id().expect("flushed user has a store ID");

    let issue = session.new_entity("Issue").unwrap();
    issue.add_link(&mut session, "reporter", &user).unwrap();
    session.commit().unwrap();
    assert!(session.is_committed());

    let flushed = log.session_changes(SessionPhase::Flushed);
    assert_eq!(flushed.len(), 2);
    assert_summaries(&flushed[0], &["New(User) login"]);
    assert_summaries(&flushed[1], &["New(Issue) +reporter"]);

    let issue_change = &flushed[1][0];
    assert_eq!(issue_change.change_type, ChangeType::New);
    assert_eq!(
        issue_change.entity,
        Identity::Persistent(issue.id().unwrap())
    );
    let reporter = issue_change.link_change("reporter").unwrap();
    assert_eq!(
        reporter.added(),
        &BTreeSet::from([Identity::Persistent(user_id)])
    );
    assert!(reporter.removed().is_empty());
    assert_eq!(registry.read_links(issue.id().unwrap(), "reporter"), vec![user_id]);
}

#[test]
fn empty_commit_is_a_no_op() {
    let registry = TestRegistry::synchronous();
    registry.create_user("vadim");
    let log = EventLog::new();
    log.attach(&registry);
    let before = registry.store_version();

    let mut session = registry.begin().unwrap();
    session.commit().unwrap();

    assert_eq!(session.state(), SessionState::Committed);
    assert!(log.is_empty());
    assert_eq!(registry.store_version(), before);
}

#[test]
fn cancelled_changes_commit_nothing() {
    let registry = TestRegistry::synchronous();
    let user = registry.create_user("vadim");
    let log = EventLog::new();
    log.attach(&registry);
    let before = registry.store_version();

    let mut session = registry.begin().unwrap();
    let user = load(&session, user);
    user.set_property(&mut session, "login", Value::from("maxim"))
        .unwrap();
    user.set_property(&mut session, "login", Value::from("vadim"))
        .unwrap();
    assert!(!session.has_changes());
    session.commit().unwrap();

    assert!(log.is_empty());
    assert_eq!(registry.store_version(), before);
}

#[test]
fn disjoint_sessions_both_commit() {
    let registry = TestRegistry::synchronous();
    let a = registry.create_user("a");
    let b = registry.create_user("b");

    let mut first = registry.begin().unwrap();
    let mut second = registry.begin().unwrap();
    load(&first, a)
        .set_property(&mut first, "name", Value::from("Alice"))
        .unwrap();
    load(&second, b)
        .set_property(&mut second, "name", Value::from("Bob"))
        .unwrap();

    first.commit().unwrap();
    second.commit().unwrap();

    assert_eq!(registry.read_text(a, "name").as_deref(), Some("Alice"));
    assert_eq!(registry.read_text(b, "name").as_deref(), Some("Bob"));
    assert_eq!(registry.stats().conflict_retries(), 0);
}

#[test]
fn same_property_conflict_without_retries() {
    let registry = TestRegistry::with_config(
        Config::default()
            .async_listeners(false)
            .max_conflict_retries(0),
    );
    let user = registry.create_user("vadim");

    let mut first = registry.begin().unwrap();
    let mut second = registry.begin().unwrap();
    load(&first, user)
        .set_property(&mut first, "name", Value::from("first"))
        .unwrap();
    load(&second, user)
        .set_property(&mut second, "name", Value::from("second"))
        .unwrap();

    first.commit().unwrap();
    let err = second.commit().unwrap_err();

    assert!(err.is_conflict());
    match err {
        CoreError::Conflict { entity, attempts } => {
            assert_eq!(entity, Identity::Persistent(user));
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(second.is_aborted());
    assert_eq!(registry.read_text(user, "name").as_deref(), Some("first"));
}

#[test]
fn same_property_conflict_is_retried_transparently() {
    let registry = TestRegistry::synchronous();
    let user = registry.create_user("vadim");

    let mut first = registry.begin().unwrap();
    let mut second = registry.begin().unwrap();
    load(&first, user)
        .set_property(&mut first, "name", Value::from("first"))
        .unwrap();
    load(&second, user)
        .set_property(&mut second, "name", Value::from("second"))
        .unwrap();

    first.commit().unwrap();
    second.commit().unwrap();

    assert!(second.is_committed());
    assert_eq!(registry.read_text(user, "name").as_deref(), Some("second"));
    assert_eq!(registry.stats().conflict_retries(), 1);
}

#[test]
fn concurrent_direct_write_is_replayed_over() {
    let registry = TestRegistry::synchronous();
    let user = registry.create_user("vadim");

    let mut session = registry.begin().unwrap();
    let handle = load(&session, user);
    handle
        .set_property(&mut session, "name", Value::from("session"))
        .unwrap();
    registry.write_directly(user, "title", Value::from("external"));

    session.commit().unwrap();
    assert_eq!(registry.read_text(user, "name").as_deref(), Some("session"));
    assert_eq!(registry.read_text(user, "title").as_deref(), Some("external"));
}

#[test]
fn entity_deleted_in_store_aborts_replay() {
    let registry = TestRegistry::synchronous();
    let user = registry.create_user("vadim");

    let mut session = registry.begin().unwrap();
    load(&session, user)
        .set_property(&mut session, "name", Value::from("late"))
        .unwrap();
    registry.delete_directly(user);

    let err = session.commit().unwrap_err();
    assert!(matches!(err, CoreError::EntityRemovedInStore { .. }));
    assert!(session.is_aborted());
    assert!(!registry.exists(user));
}

#[test]
fn resume_rejects_unknown_attached_and_finished_sessions() {
    let registry = TestRegistry::synchronous();

    let session = registry.begin().unwrap();
    let id = session.suspend().unwrap();
    let mut resumed = registry.resume(id).unwrap();
    assert!(registry.resume(id).unwrap_err().is_illegal_state());

    resumed.commit().unwrap();
    assert!(registry.resume(id).unwrap_err().is_illegal_state());

    let other = TestRegistry::synchronous();
    let foreign = other.begin().unwrap().suspend().unwrap();
    assert!(registry.resume(foreign).unwrap_err().is_illegal_state());
}

#[test]
fn suspended_changes_survive_resume_on_another_thread() {
    let registry = TestRegistry::synchronous();
    let mut session = registry.begin().unwrap();
    let user = session.new_entity("User").unwrap();
    user.set_property(&mut session, "login", Value::from("parked"))
        .unwrap();
    let id = session.suspend().unwrap();
    assert_eq!(registry.parked_sessions(), 1);

    let worker = registry.registry().clone();
    let committed = std::thread::spawn(move || {
        let mut session = worker.resume(id).unwrap();
        session.commit().unwrap();
        user.id().unwrap()
    })
    .join()
    .unwrap();

    assert_eq!(registry.parked_sessions(), 0);
    assert_eq!(
        registry.read_text(committed, "login").as_deref(),
        Some("parked")
    );
}

#[test]
fn duplicate_login_reports_unique_violation() {
    let registry = TestRegistry::synchronous();
    registry.create_user("vadim");

    let mut session = registry.begin().unwrap();
    let user = session.new_entity("User").unwrap();
    user.set_property(&mut session, "login", Value::from("vadim"))
        .unwrap();
    let err = session.commit().unwrap_err();

    let violations = err.violations().expect("constraint failure");
    assert_eq!(violations.len(), 1);
    let violation = violations.iter().next().unwrap();
    assert_eq!(violation.field, "login");
    assert_eq!(
        violation.message,
        "Unique key constraint violation: User[login] already has value (vadim)"
    );
    assert!(violation.is_unique_index());
    assert!(session.is_aborted());
}

#[test]
fn failed_flush_keeps_session_open_and_reports_violations() {
    let registry = TestRegistry::synchronous();
    let log = EventLog::new();
    log.attach(&registry);

    let mut session = registry.begin().unwrap();
    session.new_entity("User").unwrap();
    session.new_entity("Issue").unwrap();
    let err = session.flush().unwrap_err();

    let violations = err.violations().expect("constraint failure");
    assert_eq!(violations.len(), 2);
    let kinds: Vec<_> = violations.iter().map(|v| v.kind.clone()).collect();
    assert!(kinds.contains(&ViolationKind::Required));
    assert!(kinds.contains(&ViolationKind::Cardinality { found: 0 }));

    assert!(session.is_open());
    assert!(!session.has_changes());
    assert_eq!(log.violations().len(), 1);
    assert!(log.session_changes(SessionPhase::Flushed).is_empty());
    assert_eq!(registry.stats().constraint_failures(), 1);

    let user = session.new_entity("User").unwrap();
    user.set_property(&mut session, "login", Value::from("second try"))
        .unwrap();
    session.commit().unwrap();
    assert!(user.id().is_some());
}

#[test]
fn listener_can_fill_in_missing_values_before_validation() {
    let registry = TestRegistry::synchronous();
    registry.add_session_listener(|session: &mut Session, event: &SessionEvent| {
        if event.phase != SessionPhase::BeforeFlushBeforeConstraints {
            return Ok(());
        }
        for entity in session.tracker().changed_entities() {
            if entity.type_name() == "User"
                && entity.is_new()
                && session.get_property(&entity, "login")?.is_none()
            {
                session.set_property(&entity, "login", Value::from("anonymous"))?;
            }
        }
        Ok(())
    });

    let mut session = registry.begin().unwrap();
    let user = session.new_entity("User").unwrap();
    user.set_property(&mut session, "name", Value::from("No Login"))
        .unwrap();
    session.commit().unwrap();

    assert_eq!(
        registry.read_text(user.id().unwrap(), "login").as_deref(),
        Some("anonymous")
    );
}

#[test]
fn listener_error_before_durability_rejects_flush() {
    let registry = TestRegistry::synchronous();
    let before = registry.store_version();
    registry.add_entity_listener_for("User", |event: &EntityEvent| {
        if event.phase == EntityPhase::AfterConstraints {
            return Err(CoreError::listener("users are read-only today"));
        }
        Ok(())
    });

    let mut session = registry.begin().unwrap();
    let user = session.new_entity("User").unwrap();
    user.set_property(&mut session, "login", Value::from("vadim"))
        .unwrap();
    let err = session.flush().unwrap_err();

    assert!(matches!(err, CoreError::Listener { .. }));
    assert!(session.is_open());
    assert!(!session.has_changes());
    assert_eq!(registry.store_version(), before);
}

#[test]
fn flushed_listener_errors_are_ignored() {
    let registry = TestRegistry::synchronous();
    registry.add_session_listener(|_: &mut Session, event: &SessionEvent| {
        if event.phase == SessionPhase::Flushed {
            return Err(CoreError::listener("notification failed"));
        }
        Ok(())
    });

    let user = registry.create_user("vadim");
    assert!(registry.exists(user));
}

#[test]
fn entity_listeners_see_old_values() {
    let registry = TestRegistry::synchronous();
    let user = registry.create_user("vadim");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    registry.add_entity_listener_for("User", move |event: &EntityEvent| {
        if event.phase == EntityPhase::Flushed {
            sink.lock().push((
                event.change_type,
                event.old_value("login").cloned(),
                event.description.has_changes_in_property("login"),
            ));
        }
        Ok(())
    });

    registry
        .transaction(|session| {
            load(session, user).set_property(session, "login", Value::from("maxim"))
        })
        .unwrap();

    assert_eq!(
        *seen.lock(),
        vec![(ChangeType::Update, Some(Value::from("vadim")), true)]
    );
}

#[test]
fn async_listeners_run_after_commit() {
    let registry = TestRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    registry.add_entity_listener_for("User", move |event: &EntityEvent| {
        if event.phase == EntityPhase::Async {
            sink.lock().push(event.description.entity);
        }
        Ok(())
    });

    let user = registry.create_user("vadim");
    registry.wait_async_idle();

    assert_eq!(*seen.lock(), vec![Identity::Persistent(user)]);
    assert_eq!(registry.pending_async_events(), 0);
    assert_eq!(registry.stats().async_events_dispatched(), 1);
}

#[test]
fn deleting_new_entity_drops_links_to_it() {
    let registry = TestRegistry::synchronous();
    let reporter = registry.create_user("vadim");

    let mut session = registry.begin().unwrap();
    let reporter = load(&session, reporter);
    let issue = session.new_entity("Issue").unwrap();
    issue.add_link(&mut session, "reporter", &reporter).unwrap();
    let watcher = session.new_entity("User").unwrap();
    issue.add_link(&mut session, "watchers", &watcher).unwrap();
    watcher.delete(&mut session).unwrap();

    assert_summaries(&session.tracker().all_changes(), &["New(Issue) +reporter"]);
    assert!(session.tracker().is_new(&issue.identity()));
    session.commit().unwrap();
    assert!(registry.read_links(issue.id().unwrap(), "watchers").is_empty());
}

#[test]
fn removed_entities_vanish_after_commit() {
    let registry = TestRegistry::synchronous();
    let user = registry.create_user("vadim");
    let issue = registry.create_issue("crash", user);

    registry
        .transaction(|session| load(session, issue).delete(session))
        .unwrap();

    assert!(!registry.exists(issue));
    assert!(registry.exists(user));
}

#[test]
fn transaction_aborts_on_error() {
    let registry = TestRegistry::synchronous();
    let result: Result<(), CoreError> = registry.transaction(|session| {
        let user = session.new_entity("User")?;
        user.set_property(session, "login", Value::from("ghost"))?;
        Err(CoreError::illegal_state("changed my mind"))
    });

    assert!(result.unwrap_err().is_illegal_state());
    assert_eq!(registry.stats().sessions_aborted(), 1);
    assert_eq!(registry.open_sessions(), 0);
}

#[test]
fn flushed_changes_snapshot_as_json() {
    let registry = TestRegistry::synchronous();
    let log = EventLog::new();
    log.attach(&registry);
    let user = registry.create_user("vadim");

    let flushed = log.session_changes(SessionPhase::Flushed);
    let json = changes_to_json(&flushed[0]);
    assert_eq!(json[0]["change_type"], "New");
    assert_eq!(json[0]["type_name"], "User");
    assert_eq!(json[0]["changed_properties"], serde_json::json!(["login"]));
    assert_eq!(
        changes_from_json(&json).unwrap()[0].entity,
        Identity::Persistent(user)
    );
}

#[test]
fn deleted_user_stays_deleted_for_every_handle() {
    let registry = TestRegistry::synchronous();
    let user = registry.create_user("vadim");

    let mut session = registry.begin().unwrap();
    let first = load(&session, user);
    let second = load(&session, user);
    first.delete(&mut session).unwrap();

    assert_eq!(second.state(), EntityState::RemovedInSession);
    let err = second.delete_property(&mut session, "login").unwrap_err();
    assert!(err.is_illegal_state());
    assert_summaries(&session.tracker().all_changes(), &["Remove(User)"]);

    session.commit().unwrap();
    assert!(!registry.exists(user));
}

#[test]
fn re_adding_cleared_reporter_commits_nothing() {
    let registry = TestRegistry::synchronous();
    let reporter = registry.create_user("vadim");
    let issue = registry.create_issue("crash", reporter);
    let before = registry.store_version();

    let mut session = registry.begin().unwrap();
    let issue_handle = load(&session, issue);
    let reporter_handle = load(&session, reporter);
    issue_handle.clear_links(&mut session, "reporter").unwrap();
    issue_handle
        .add_link(&mut session, "reporter", &reporter_handle)
        .unwrap();

    assert!(!session.has_changes());
    session.commit().unwrap();
    assert_eq!(registry.store_version(), before);
    assert_eq!(registry.read_links(issue, "reporter"), vec![reporter]);
}

#[test]
fn listeners_before_durability_run_in_registration_order() {
    let registry = TestRegistry::synchronous();
    let order = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&order);
    registry.add_entity_listener(move |event: &EntityEvent| {
        if event.phase == EntityPhase::BeforeConstraints {
            sink.lock().push("entity 1");
        }
        Ok(())
    });
    let sink = Arc::clone(&order);
    registry.add_session_listener(move |_: &mut Session, event: &SessionEvent| {
        if event.phase == SessionPhase::BeforeFlushBeforeConstraints {
            sink.lock().push("session 2");
        }
        Ok(())
    });
    let sink = Arc::clone(&order);
    registry.add_entity_listener(move |event: &EntityEvent| {
        if event.phase == EntityPhase::BeforeConstraints {
            sink.lock().push("entity 3");
        }
        Ok(())
    });

    registry.create_user("vadim");
    assert_eq!(*order.lock(), vec!["entity 1", "session 2", "entity 3"]);
}

#[test]
fn entity_listeners_see_changes_of_earlier_session_listeners() {
    let registry = TestRegistry::synchronous();
    registry.add_session_listener(|session: &mut Session, event: &SessionEvent| {
        if event.phase == SessionPhase::BeforeFlushBeforeConstraints {
            for entity in session.tracker().changed_entities() {
                session.set_property(&entity, "name", Value::from("Stamped"))?;
            }
        }
        Ok(())
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    registry.add_entity_listener(move |event: &EntityEvent| {
        if event.phase == EntityPhase::BeforeConstraints {
            sink.lock().push(event.description.has_changes_in_property("name"));
        }
        Ok(())
    });

    let user = registry.create_user("vadim");
    assert_eq!(*seen.lock(), vec![true]);
    assert_eq!(registry.read_text(user, "name").as_deref(), Some("Stamped"));
}

#[test]
fn session_listener_aborting_counts_one_abort() {
    let registry = TestRegistry::synchronous();
    registry.add_session_listener(|session: &mut Session, event: &SessionEvent| {
        if event.phase == SessionPhase::BeforeFlushBeforeConstraints {
            session.abort()?;
        }
        Ok(())
    });

    let mut session = registry.begin().unwrap();
    let user = session.new_entity("User").unwrap();
    user.set_property(&mut session, "login", Value::from("vadim"))
        .unwrap();
    let err = session.flush().unwrap_err();

    assert!(err.is_illegal_state());
    assert!(session.is_aborted());
    assert_eq!(user.state(), EntityState::RemovedInSession);
    assert_eq!(registry.stats().sessions_aborted(), 1);
    assert_eq!(registry.open_sessions(), 0);
}

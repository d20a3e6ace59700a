//! Snapshot helpers for change descriptions.
//!
//! Change sets are rendered either as JSON, for exact comparisons with an
//! expected document, or as compact one-line summaries such as
//! `New(User) login`.

use serde_json::Value as Json;
use transient_core::{ChangeType, EntityChangeDescription};

/// Renders change descriptions as a JSON array.
///
/// # Panics
///
/// Panics if a description cannot be serialized.
pub fn changes_to_json(changes: &[EntityChangeDescription]) -> Json {
    serde_json::to_value(changes).expect("Change descriptions should serialize")
}

/// Parses change descriptions back from JSON.
pub fn changes_from_json(json: &Json) -> serde_json::Result<Vec<EntityChangeDescription>> {
    serde_json::from_value(json.clone())
}

/// Returns a one-line summary of a change.
///
/// Format: `<ChangeType>(<Type>)` followed by the changed property names and
/// `+link`/`-link`/`!link` markers for added, removed and cleared links.
pub fn summarize(change: &EntityChangeDescription) -> String {
    let kind = match change.change_type {
        ChangeType::New => "New",
        ChangeType::Update => "Update",
        ChangeType::Remove => "Remove",
    };
    let mut parts = vec![format!("{kind}({})", change.type_name)];
    if let Some(properties) = &change.changed_properties {
        parts.extend(properties.iter().cloned());
    }
    if let Some(links) = &change.changed_links {
        for (name, delta) in links {
            if delta.is_cleared() {
                parts.push(format!("!{name}"));
            }
            if !delta.added().is_empty() {
                parts.push(format!("+{name}"));
            }
            if !delta.removed().is_empty() {
                parts.push(format!("-{name}"));
            }
        }
    }
    parts.join(" ")
}

/// Summarizes every change, in the order given.
pub fn summarize_all(changes: &[EntityChangeDescription]) -> Vec<String> {
    changes.iter().map(summarize).collect()
}

/// Asserts that the summaries of `changes` equal `expected`.
///
/// # Panics
///
/// Panics with both lists if they differ.
pub fn assert_summaries(changes: &[EntityChangeDescription], expected: &[&str]) {
    let actual = summarize_all(changes);
    assert_eq!(
        actual, expected,
        "Change summaries differ\nActual:   {actual:?}\nExpected: {expected:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{load, with_test_registry};
    use transient_store::Value;

    #[test]
    fn test_summaries_of_pending_changes() {
        with_test_registry(|registry| {
            let reporter = registry.create_user("vadim");
            let watcher = registry.create_user("maxim");
            let issue = registry.create_issue("crash", reporter);

            let mut session = registry.begin().unwrap();
            let issue = load(&session, issue);
            let watcher = load(&session, watcher);
            issue
                .set_property(&mut session, "summary", Value::from("crash on start"))
                .unwrap();
            issue.add_link(&mut session, "watchers", &watcher).unwrap();
            issue.clear_links(&mut session, "reporter").unwrap();
            let user = session.new_entity("User").unwrap();
            user.set_property(&mut session, "login", Value::from("new"))
                .unwrap();

            let changes = session.tracker().all_changes();
            let mut summaries = summarize_all(&changes);
            summaries.sort();
            assert_eq!(
                summaries,
                vec!["New(User) login", "Update(Issue) summary !reporter +watchers"]
            );
            session.abort().unwrap();
        });
    }

    #[test]
    fn test_json_snapshot_round_trip() {
        with_test_registry(|registry| {
            let user = registry.create_user("vadim");
            let mut session = registry.begin().unwrap();
            let user = load(&session, user);
            user.delete(&mut session).unwrap();

            let changes = session.tracker().all_changes();
            let json = changes_to_json(&changes);
            assert_eq!(json[0]["change_type"], "Remove");
            assert_eq!(json[0]["type_name"], "User");
            assert!(json[0]["changed_properties"].is_null());
            assert_eq!(changes_from_json(&json).unwrap(), changes);
            assert_summaries(&changes, &["Remove(User)"]);
        });
    }
}

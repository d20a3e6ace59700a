//! Constraint violation types.

use crate::entity::Identity;
use std::fmt;

/// What kind of rule a violation broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// A required property is missing.
    Required,
    /// A link has too few or too many targets.
    Cardinality {
        /// Number of targets found.
        found: usize,
    },
    /// Another entity already holds the same composite key.
    UniqueIndex {
        /// Index fields, in index order.
        fields: Vec<String>,
        /// Formatted values of every field, comma-joined in index order.
        value: String,
    },
    /// A custom constraint failed.
    Custom,
}

/// A single constraint violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    /// The offending entity.
    pub entity: Identity,
    /// Type name of the entity.
    pub type_name: String,
    /// Property, link or index the violation refers to.
    pub field: String,
    /// Technical message.
    pub message: String,
    /// Message suitable for end users.
    pub display_message: String,
    /// Rule that was broken.
    pub kind: ViolationKind,
}

impl ConstraintViolation {
    /// Creates a custom violation whose display message equals its message.
    pub fn new(
        entity: Identity,
        type_name: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            entity,
            type_name: type_name.into(),
            field: field.into(),
            display_message: message.clone(),
            message,
            kind: ViolationKind::Custom,
        }
    }

    /// Sets the display message.
    #[must_use]
    pub fn with_display_message(mut self, message: impl Into<String>) -> Self {
        self.display_message = message.into();
        self
    }

    /// Sets the violation kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ViolationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns true for unique index violations.
    #[must_use]
    pub fn is_unique_index(&self) -> bool {
        matches!(self.kind, ViolationKind::UniqueIndex { .. })
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}].{}: {}",
            self.type_name, self.entity, self.field, self.message
        )
    }
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationSet {
    violations: Vec<ConstraintViolation>,
}

impl ViolationSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a violation.
    pub fn push(&mut self, violation: ConstraintViolation) {
        self.violations.push(violation);
    }

    /// Returns true if no violation was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns the number of violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    /// Returns all violations.
    #[must_use]
    pub fn all(&self) -> &[ConstraintViolation] {
        &self.violations
    }

    /// Iterates over the violations.
    pub fn iter(&self) -> std::slice::Iter<'_, ConstraintViolation> {
        self.violations.iter()
    }

    /// Returns the violations of one entity.
    pub fn for_entity(&self, entity: Identity) -> impl Iterator<Item = &ConstraintViolation> {
        self.violations.iter().filter(move |v| v.entity == entity)
    }

    /// Merges another set into this one.
    pub fn merge(&mut self, other: ViolationSet) {
        self.violations.extend(other.violations);
    }
}

impl fmt::Display for ViolationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {violation}")?;
        }
        Ok(())
    }
}

impl IntoIterator for ViolationSet {
    type Item = ConstraintViolation;
    type IntoIter = std::vec::IntoIter<ConstraintViolation>;

    fn into_iter(self) -> Self::IntoIter {
        self.violations.into_iter()
    }
}

impl<'a> IntoIterator for &'a ViolationSet {
    type Item = &'a ConstraintViolation;
    type IntoIter = std::slice::Iter<'a, ConstraintViolation>;

    fn into_iter(self) -> Self::IntoIter {
        self.violations.iter()
    }
}

//! Declarative entity type constraints.

use crate::constraint::{ConstraintViolation, ViolationKind, ViolationSet};
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::view::SessionView;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Allowed number of targets of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// At most one target.
    ZeroOrOne,
    /// Exactly one target.
    One,
    /// At least one target.
    OneOrMore,
    /// Any number of targets.
    Many,
}

impl Cardinality {
    /// Returns true if `count` targets are allowed.
    #[must_use]
    pub fn allows(self, count: usize) -> bool {
        match self {
            Self::ZeroOrOne => count <= 1,
            Self::One => count == 1,
            Self::OneOrMore => count >= 1,
            Self::Many => true,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroOrOne => write!(f, "0..1"),
            Self::One => write!(f, "1"),
            Self::OneOrMore => write!(f, "1..*"),
            Self::Many => write!(f, "0..*"),
        }
    }
}

/// A user-defined constraint on entities of one type.
///
/// Constraints run before anything is written and see the session's
/// pending changes through the view. They report problems by pushing into
/// `violations`; returning an error aborts validation itself.
pub trait Constraint: Send + Sync {
    /// Checks one created or modified entity.
    fn check(
        &self,
        view: &SessionView<'_>,
        entity: &Entity,
        violations: &mut ViolationSet,
    ) -> CoreResult<()>;
}

/// Constraints declared for one entity type.
#[derive(Clone)]
pub struct EntityTypeSchema {
    name: String,
    required: Vec<String>,
    links: Vec<(String, Cardinality)>,
    unique: Vec<Vec<String>>,
    custom: Vec<Arc<dyn Constraint>>,
}

impl EntityTypeSchema {
    /// Creates an empty schema for a type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: Vec::new(),
            links: Vec::new(),
            unique: Vec::new(),
            custom: Vec::new(),
        }
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares a required property.
    #[must_use]
    pub fn required(mut self, property: impl Into<String>) -> Self {
        self.required.push(property.into());
        self
    }

    /// Declares the cardinality of a link.
    #[must_use]
    pub fn link(mut self, name: impl Into<String>, cardinality: Cardinality) -> Self {
        self.links.push((name.into(), cardinality));
        self
    }

    /// Declares a unique index over one or more properties.
    #[must_use]
    pub fn unique<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique.push(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a custom constraint.
    #[must_use]
    pub fn constraint(mut self, constraint: impl Constraint + 'static) -> Self {
        self.custom.push(Arc::new(constraint));
        self
    }

    fn check(
        &self,
        view: &SessionView<'_>,
        entity: &Entity,
        violations: &mut ViolationSet,
    ) -> CoreResult<()> {
        let identity = entity.identity();

        for property in &self.required {
            if view.property(&identity, property)?.is_none() {
                violations.push(
                    ConstraintViolation::new(
                        identity,
                        &self.name,
                        property,
                        format!("required property '{property}' is not set"),
                    )
                    .with_display_message(format!("{property} is required"))
                    .with_kind(ViolationKind::Required),
                );
            }
        }

        for (link, cardinality) in &self.links {
            let found = view.links(&identity, link)?.len();
            if !cardinality.allows(found) {
                violations.push(
                    ConstraintViolation::new(
                        identity,
                        &self.name,
                        link,
                        format!("link '{link}' expects {cardinality} target(s), found {found}"),
                    )
                    .with_display_message(format!("{link} has an invalid number of targets"))
                    .with_kind(ViolationKind::Cardinality { found }),
                );
            }
        }

        for fields in &self.unique {
            self.check_unique(view, entity, fields, violations)?;
        }

        for constraint in &self.custom {
            constraint.check(view, entity, violations)?;
        }
        Ok(())
    }

    fn check_unique(
        &self,
        view: &SessionView<'_>,
        entity: &Entity,
        fields: &[String],
        violations: &mut ViolationSet,
    ) -> CoreResult<()> {
        let identity = entity.identity();
        let Some((first, rest)) = fields.split_first() else {
            return Ok(());
        };

        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(view.property(&identity, field)?);
        }
        // An index key with no value at all is not indexed.
        if values.iter().all(Option::is_none) {
            return Ok(());
        }

        let mut duplicate = false;
        if let Some(first_value) = &values[0] {
            for other in view.find(&self.name, first, first_value)? {
                if other == identity {
                    continue;
                }
                let mut same = true;
                for (field, value) in rest.iter().zip(&values[1..]) {
                    if view.property(&other, field)? != *value {
                        same = false;
                        break;
                    }
                }
                if same {
                    duplicate = true;
                    break;
                }
            }
        } else {
            for other in view.all(&self.name)? {
                if other == identity {
                    continue;
                }
                let mut same = true;
                for (field, value) in fields.iter().zip(&values) {
                    if view.property(&other, field)? != *value {
                        same = false;
                        break;
                    }
                }
                if same {
                    duplicate = true;
                    break;
                }
            }
        }
        if !duplicate {
            return Ok(());
        }

        let value = values
            .iter()
            .map(|v| v.as_ref().map_or_else(|| "null".to_string(), ToString::to_string))
            .collect::<Vec<_>>()
            .join(", ");
        let field_list = fields.join(", ");
        violations.push(
            ConstraintViolation::new(
                identity,
                &self.name,
                &field_list,
                format!(
                    "Unique key constraint violation: {}[{field_list}] already has value ({value})",
                    self.name
                ),
            )
            .with_display_message(format!("{field_list} must be unique, ({value}) is taken"))
            .with_kind(ViolationKind::UniqueIndex {
                fields: fields.to_vec(),
                value,
            }),
        );
        Ok(())
    }
}

impl fmt::Debug for EntityTypeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityTypeSchema")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("links", &self.links)
            .field("unique", &self.unique)
            .field("custom", &self.custom.len())
            .finish()
    }
}

/// Constraints of every entity type known to a registry.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<String, EntityTypeSchema>,
}

impl Schema {
    /// Creates an empty schema (no constraints).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type, replacing any previous declaration for it.
    #[must_use]
    pub fn with_type(mut self, entity_type: EntityTypeSchema) -> Self {
        self.add_type(entity_type);
        self
    }

    /// Adds a type, replacing any previous declaration for it.
    pub fn add_type(&mut self, entity_type: EntityTypeSchema) {
        self.types.insert(entity_type.name.clone(), entity_type);
    }

    /// Returns the declaration of a type.
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<&EntityTypeSchema> {
        self.types.get(type_name)
    }

    /// Validates every created or modified entity in the view.
    ///
    /// Collects all violations; never stops at the first.
    pub fn validate(&self, view: &SessionView<'_>) -> CoreResult<ViolationSet> {
        let mut violations = ViolationSet::new();
        for entity in view.tracker().changed_entities() {
            if let Some(entity_type) = self.types.get(entity.type_name()) {
                entity_type.check(view, &entity, &mut violations)?;
            }
        }
        Ok(violations)
    }
}

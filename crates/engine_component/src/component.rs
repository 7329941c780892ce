//! Component kinds and component instances.
//!
//! Components are schema-defined rather than Rust types. A [`ComponentKind`]
//! declares the fields a component may carry together with their default
//! values, and a [`Component`] is a named set of JSON field values drawn from
//! exactly one kind.
//!
//! Field maps are [`BTreeMap`]s so that iteration, and therefore every
//! serialised form, has a stable key order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name → value mapping of a component.
pub type Fields = BTreeMap<String, Value>;

/// A component instance attached to an entity.
///
/// # Examples
///
/// ```rust
/// use engine_component::Component;
///
/// let position = Component::new("Position").with("x", 5);
/// assert_eq!(position.get("x"), Some(&serde_json::json!(5)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// The name of the [`ComponentKind`] this instance belongs to.
    pub kind: String,
    /// Field values, keyed by field name.
    #[serde(default)]
    pub fields: Fields,
}

impl Component {
    /// Create a component of the given kind with no explicit field values.
    ///
    /// Missing fields are filled from the kind's defaults when the component
    /// is attached to an entity.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Fields::new(),
        }
    }

    /// Set a field value, builder style.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Build a component from a JSON object. Non-object values yield a
    /// component with no explicit fields.
    #[must_use]
    pub fn from_json(kind: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => Fields::new(),
        };
        Self {
            kind: kind.into(),
            fields,
        }
    }

    /// Returns the value of a field, if set.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a field value in place.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }
}

/// The schema for a class of component.
///
/// A kind declares every field its instances may carry, the default value of
/// each field, the subset of fields that survive serialisation, and whether
/// released instances are pooled for reuse.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentKind {
    name: String,
    defaults: Fields,
    serializable: BTreeSet<String>,
    pooled: bool,
}

impl ComponentKind {
    /// Create a kind with no declared fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: Fields::new(),
            serializable: BTreeSet::new(),
            pooled: false,
        }
    }

    /// Create a kind from its defaults and the names of its serialisable
    /// fields. Names that are not declared in `defaults` are ignored.
    #[must_use]
    pub fn from_parts<I, S>(name: impl Into<String>, defaults: Fields, serializable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let serializable = serializable
            .into_iter()
            .map(Into::into)
            .filter(|field| defaults.contains_key(field))
            .collect();
        Self {
            name: name.into(),
            defaults,
            serializable,
            pooled: false,
        }
    }

    /// Declare a serialisable field with its default value.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        let name = name.into();
        self.serializable.insert(name.clone());
        self.defaults.insert(name, default.into());
        self
    }

    /// Declare a runtime-only field. It is part of every instance but is
    /// dropped when the component is serialised.
    #[must_use]
    pub fn transient(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        let name = name.into();
        self.serializable.remove(&name);
        self.defaults.insert(name, default.into());
        self
    }

    /// Mark instances of this kind as pooled.
    #[must_use]
    pub fn pooled(mut self) -> Self {
        self.pooled = true;
        self
    }

    /// The kind's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default value of every declared field.
    #[must_use]
    pub fn defaults(&self) -> &Fields {
        &self.defaults
    }

    /// Fields that are kept when an instance is serialised.
    #[must_use]
    pub fn serializable_fields(&self) -> &BTreeSet<String> {
        &self.serializable
    }

    /// Whether released instances of this kind are recycled.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Returns `true` if the kind declares `field`.
    #[must_use]
    pub fn declares(&self, field: &str) -> bool {
        self.defaults.contains_key(field)
    }

    /// Overlay `overrides` onto `base`, keeping only declared fields.
    pub fn merge_into(&self, base: &mut Fields, overrides: Fields) {
        for (field, value) in overrides {
            if self.declares(&field) {
                base.insert(field, value);
            }
        }
    }

    /// Bring a field set in line with this kind: undeclared fields are
    /// dropped and missing fields are filled from the defaults.
    #[must_use]
    pub fn normalize(&self, fields: Fields) -> Fields {
        let mut out = self.defaults.clone();
        self.merge_into(&mut out, fields);
        out
    }

    /// The serialisable subset of `fields`.
    #[must_use]
    pub fn serializable_subset(&self, fields: &Fields) -> Fields {
        fields
            .iter()
            .filter(|(field, _)| self.serializable.contains(*field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }
}

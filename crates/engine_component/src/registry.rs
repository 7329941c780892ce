//! Component registry — the set of component kinds a world accepts.
//!
//! Every kind must be registered before an entity using it is created or a
//! snapshot referencing it is decoded. The registry merges caller overrides
//! over kind defaults, normalises field sets, and recycles released instances
//! of pooled kinds.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::component::{Component, ComponentKind, Fields};
use crate::error::ComponentError;

/// Upper bound on the number of free instances kept per pooled kind.
const POOL_CAPACITY: usize = 64;

/// Registry of all component kinds known to a world.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    /// Kinds keyed by name.
    kinds: BTreeMap<String, ComponentKind>,
    /// Released instances of pooled kinds, ready for reuse.
    pools: HashMap<String, Vec<Component>>,
}

impl ComponentRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component kind.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::DuplicateKind`] if a kind with the same name
    /// is already registered.
    pub fn register(&mut self, kind: ComponentKind) -> Result<(), ComponentError> {
        if self.kinds.contains_key(kind.name()) {
            return Err(ComponentError::DuplicateKind(kind.name().to_string()));
        }
        debug!(
            kind = kind.name(),
            fields = kind.defaults().len(),
            pooled = kind.is_pooled(),
            "registered component kind"
        );
        self.kinds.insert(kind.name().to_string(), kind);
        Ok(())
    }

    /// Returns the kind registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::UnknownKind`] if `name` is not registered.
    pub fn kind(&self, name: &str) -> Result<&ComponentKind, ComponentError> {
        self.kinds
            .get(name)
            .ok_or_else(|| ComponentError::UnknownKind(name.to_string()))
    }

    /// Returns `true` if a kind named `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Returns an iterator over all registered kinds, in name order.
    pub fn kinds(&self) -> impl Iterator<Item = &ComponentKind> {
        self.kinds.values()
    }

    /// Create a component of `kind` with `overrides` merged over the kind's
    /// defaults. Override fields the kind does not declare are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::UnknownKind`] if `kind` is not registered.
    pub fn instantiate(&mut self, kind: &str, overrides: Fields) -> Result<Component, ComponentError> {
        let def = self
            .kinds
            .get(kind)
            .ok_or_else(|| ComponentError::UnknownKind(kind.to_string()))?;

        let recycled = if def.is_pooled() {
            self.pools.get_mut(kind).and_then(Vec::pop)
        } else {
            None
        };

        match recycled {
            Some(mut component) => {
                component.fields.clear();
                component.fields.extend(
                    def.defaults()
                        .iter()
                        .map(|(field, value)| (field.clone(), value.clone())),
                );
                def.merge_into(&mut component.fields, overrides);
                Ok(component)
            }
            None => Ok(Component {
                kind: kind.to_string(),
                fields: def.normalize(overrides),
            }),
        }
    }

    /// Bring a component in line with its kind: unknown fields are dropped and
    /// missing fields are filled from the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::UnknownKind`] if the component's kind is not
    /// registered.
    pub fn normalize(&self, component: Component) -> Result<Component, ComponentError> {
        let def = self.kind(&component.kind)?;
        Ok(Component {
            fields: def.normalize(component.fields),
            kind: component.kind,
        })
    }

    /// The serialisable fields of `kind`, used by the snapshot codec.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::UnknownKind`] if `kind` is not registered.
    pub fn serializable_fields_of(
        &self,
        kind: &str,
    ) -> Result<&std::collections::BTreeSet<String>, ComponentError> {
        Ok(self.kind(kind)?.serializable_fields())
    }

    /// Hand a discarded component back to the registry. Instances of pooled
    /// kinds are kept for reuse; everything else is dropped.
    pub fn release(&mut self, component: Component) {
        let pooled = self
            .kinds
            .get(&component.kind)
            .is_some_and(ComponentKind::is_pooled);
        if !pooled {
            return;
        }
        let pool = self.pools.entry(component.kind.clone()).or_default();
        if pool.len() < POOL_CAPACITY {
            pool.push(component);
        }
    }

    /// Number of free instances currently pooled for `kind`.
    #[must_use]
    pub fn pooled_count(&self, kind: &str) -> usize {
        self.pools.get(kind).map_or(0, Vec::len)
    }
}

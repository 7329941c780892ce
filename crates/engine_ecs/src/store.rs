//! Entity store — entities, their components and their tags.
//!
//! The store is pure data: it validates and keeps entities but runs no
//! behaviour. Entities are kept in insertion order so full-world iteration
//! (listing, serialisation) is stable.
//!
//! Generated ids are never handed out twice. Removed ids are retired and the
//! generator skips them; a caller may still reuse a removed id by supplying it
//! explicitly.

use std::collections::{BTreeSet, HashMap, HashSet};

use engine_component::{Component, ComponentRegistry, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorldError;

/// An entity together with its components and tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// The entity's identifier.
    pub id: EntityId,
    /// Attached components, at most one per kind, in attachment order.
    pub components: Vec<Component>,
    /// Tags, sorted.
    pub tags: BTreeSet<String>,
}

impl Entity {
    /// Returns the component of the given kind, if attached.
    #[must_use]
    pub fn component(&self, kind: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.kind == kind)
    }

    /// Returns `true` if a component of `kind` is attached.
    #[must_use]
    pub fn has_component(&self, kind: &str) -> bool {
        self.component(kind).is_some()
    }

    /// Returns `true` if the entity carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    fn component_mut(&mut self, kind: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.kind == kind)
    }
}

/// Description of an entity to create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Caller-supplied id. A fresh id is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    /// Components to attach; their fields override the kind defaults.
    #[serde(default)]
    pub components: Vec<Component>,
    /// Registered tags to attach.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EntitySpec {
    /// An empty spec with a generated id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-supplied id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach a component.
    #[must_use]
    pub fn component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    /// Attach a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Owns every entity of a world.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: HashMap<EntityId, Entity>,
    /// Insertion order of live entities.
    order: Vec<EntityId>,
    /// Registered tags.
    tags: BTreeSet<String>,
    /// Ids that were removed and must not be generated again.
    retired: HashSet<EntityId>,
}

impl EntityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- Tags --

    /// Register a tag. Returns `false` if it was already registered.
    pub fn register_tag(&mut self, tag: impl Into<String>) -> bool {
        self.tags.insert(tag.into())
    }

    /// Returns `true` if `tag` is registered.
    #[must_use]
    pub fn is_tag_registered(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// All registered tags, sorted.
    pub fn registered_tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    fn check_tags<'a, I>(&self, tags: I) -> Result<(), WorldError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for tag in tags {
            if !self.tags.contains(tag) {
                return Err(WorldError::UnknownTag(tag.clone()));
            }
        }
        Ok(())
    }

    // -- Entity lifecycle --

    /// Create an entity from `spec` and return its id.
    ///
    /// Components are merged over their kind defaults; if a kind appears
    /// more than once, the last instance wins. All validation happens before
    /// the store is modified.
    ///
    /// # Errors
    ///
    /// - [`WorldError::DuplicateId`] if the supplied id is taken.
    /// - [`WorldError::UnknownTag`] if a tag is not registered.
    /// - [`WorldError::Component`] if a component kind is not registered.
    pub fn create_entity(
        &mut self,
        spec: EntitySpec,
        registry: &mut ComponentRegistry,
    ) -> Result<EntityId, WorldError> {
        if let Some(id) = &spec.id
            && self.entities.contains_key(id)
        {
            return Err(WorldError::DuplicateId(id.clone()));
        }
        self.check_tags(&spec.tags)?;
        for component in &spec.components {
            registry.kind(&component.kind)?;
        }

        let id = match spec.id {
            Some(id) => id,
            None => self.fresh_id(),
        };

        let mut components: Vec<Component> = Vec::with_capacity(spec.components.len());
        for component in spec.components {
            let instance = registry.instantiate(&component.kind, component.fields)?;
            match components.iter_mut().find(|c| c.kind == instance.kind) {
                Some(slot) => registry.release(std::mem::replace(slot, instance)),
                None => components.push(instance),
            }
        }

        let entity = Entity {
            id: id.clone(),
            components,
            tags: spec.tags.into_iter().collect(),
        };
        self.retired.remove(&id);
        self.order.push(id.clone());
        self.entities.insert(id.clone(), entity);
        Ok(id)
    }

    /// Insert an already-normalised entity, replacing any entity with the
    /// same id in place. Used when ingesting snapshots; a restored id is live
    /// again and no longer retired.
    pub(crate) fn restore(&mut self, entity: Entity) {
        self.retired.remove(&entity.id);
        if !self.entities.contains_key(&entity.id) {
            self.order.push(entity.id.clone());
        }
        self.entities.insert(entity.id.clone(), entity);
    }

    fn fresh_id(&self) -> EntityId {
        loop {
            let id = EntityId::generate();
            if !self.entities.contains_key(&id) && !self.retired.contains(&id) {
                return id;
            }
        }
    }

    /// Remove an entity and return it.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownEntity`] if the id is absent.
    pub fn remove_entity(&mut self, id: &EntityId) -> Result<Entity, WorldError> {
        let entity = self
            .entities
            .remove(id)
            .ok_or_else(|| WorldError::UnknownEntity(id.clone()))?;
        self.order.retain(|e| e != id);
        self.retired.insert(id.clone());
        Ok(entity)
    }

    /// Remove every entity, retiring their ids. Returns the removed entities
    /// in insertion order.
    pub fn clear(&mut self) -> Vec<Entity> {
        let mut removed = Vec::with_capacity(self.order.len());
        for id in self.order.drain(..) {
            if let Some(entity) = self.entities.remove(&id) {
                removed.push(entity);
            }
            self.retired.insert(id);
        }
        removed
    }

    /// Replace or add components on an entity.
    ///
    /// For each component: if the entity already holds that kind, the given
    /// fields are written over the current values; otherwise the component is
    /// attached with its fields merged over the kind defaults.
    ///
    /// # Errors
    ///
    /// - [`WorldError::UnknownEntity`] if the id is absent.
    /// - [`WorldError::Component`] if a component kind is not registered.
    pub fn update_entity(
        &mut self,
        id: &EntityId,
        components: Vec<Component>,
        registry: &mut ComponentRegistry,
    ) -> Result<(), WorldError> {
        if !self.entities.contains_key(id) {
            return Err(WorldError::UnknownEntity(id.clone()));
        }
        for component in &components {
            registry.kind(&component.kind)?;
        }
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| WorldError::UnknownEntity(id.clone()))?;

        for component in components {
            match entity.component_mut(&component.kind) {
                Some(existing) => {
                    let kind = registry.kind(&component.kind)?;
                    kind.merge_into(&mut existing.fields, component.fields);
                }
                None => {
                    let instance = registry.instantiate(&component.kind, component.fields)?;
                    entity.components.push(instance);
                }
            }
        }
        Ok(())
    }

    /// Set a single declared field of an attached component.
    ///
    /// Returns `false` if the entity does not hold a component of `kind` or
    /// the kind does not declare `field`.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownEntity`] if the id is absent.
    pub fn set_field(
        &mut self,
        id: &EntityId,
        kind: &str,
        field: &str,
        value: Value,
        registry: &ComponentRegistry,
    ) -> Result<bool, WorldError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| WorldError::UnknownEntity(id.clone()))?;
        let declared = registry.kind(kind).is_ok_and(|k| k.declares(field));
        match entity.component_mut(kind) {
            Some(component) if declared => {
                component.fields.insert(field.to_string(), value);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Detach a component from an entity, returning it if it was attached.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownEntity`] if the id is absent.
    pub fn remove_component(
        &mut self,
        id: &EntityId,
        kind: &str,
    ) -> Result<Option<Component>, WorldError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| WorldError::UnknownEntity(id.clone()))?;
        Ok(entity
            .components
            .iter()
            .position(|c| c.kind == kind)
            .map(|pos| entity.components.remove(pos)))
    }

    /// Attach registered tags to an entity.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownEntity`] or [`WorldError::UnknownTag`].
    pub fn add_tags(&mut self, id: &EntityId, tags: &[String]) -> Result<(), WorldError> {
        self.check_tags(tags)?;
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| WorldError::UnknownEntity(id.clone()))?;
        entity.tags.extend(tags.iter().cloned());
        Ok(())
    }

    /// Detach tags from an entity.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownEntity`] or [`WorldError::UnknownTag`].
    pub fn remove_tags(&mut self, id: &EntityId, tags: &[String]) -> Result<(), WorldError> {
        self.check_tags(tags)?;
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| WorldError::UnknownEntity(id.clone()))?;
        for tag in tags {
            entity.tags.remove(tag);
        }
        Ok(())
    }

    // -- Queries --

    /// Returns the entity with `id`, if present.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Returns the present entities among `ids`, in the order given. Missing
    /// ids are skipped.
    #[must_use]
    pub fn get_entities(&self, ids: &[EntityId]) -> Vec<&Entity> {
        ids.iter().filter_map(|id| self.entities.get(id)).collect()
    }

    /// Iterate over all entities in insertion order.
    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Entities carrying `tag`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownTag`] if `tag` is not registered.
    pub fn entities_with_tag(&self, tag: &str) -> Result<Vec<&Entity>, WorldError> {
        if !self.tags.contains(tag) {
            return Err(WorldError::UnknownTag(tag.to_string()));
        }
        Ok(self.all_entities().filter(|e| e.has_tag(tag)).collect())
    }

    /// Entities holding every kind in `with` and none in `without`.
    #[must_use]
    pub fn query(&self, with: &[&str], without: &[&str]) -> Vec<&Entity> {
        self.all_entities()
            .filter(|e| with.iter().all(|k| e.has_component(k)))
            .filter(|e| !without.iter().any(|k| e.has_component(k)))
            .collect()
    }

    /// Returns `true` if an entity with `id` is present.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the store holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

//! The World: the authoritative in-memory state of the editor.
//!
//! A [`World`] owns one component registry, one entity store and one
//! scheduler, and tracks a monotonically increasing `revision`. Every
//! successful entity mutation bumps the revision by one; a tick bumps it once
//! if any system changed something. The revision is what the synchroniser
//! uses to decide which of two snapshots is newer.

use engine_component::{Component, ComponentKind, ComponentRegistry, EntityId, Fields};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::WorldError;
use crate::scheduler::{Scheduler, SchedulerState, TickReport};
use crate::snapshot::{Origin, Snapshot};
use crate::store::{Entity, EntitySpec, EntityStore};
use crate::system::System;

/// How [`World::apply_from_snapshot`] treats the snapshot's revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Reject snapshots that are not newer than the world.
    Strict,
    /// Always apply.
    #[default]
    Relaxed,
}

/// A set of component changes for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// The entity to update.
    pub id: EntityId,
    /// Components to merge into the entity.
    #[serde(default)]
    pub components: Vec<Component>,
}

/// The editor world.
#[derive(Debug, Default)]
pub struct World {
    registry: ComponentRegistry,
    store: EntityStore,
    scheduler: Scheduler,
    revision: u64,
}

impl World {
    /// Create an empty world at revision 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The component registry.
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// The entity store.
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// The scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    // -- Registration --

    /// Register a component kind.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Component`] if the kind is already registered.
    pub fn register_kind(&mut self, kind: ComponentKind) -> Result<(), WorldError> {
        Ok(self.registry.register(kind)?)
    }

    /// Register a tag. Registering a known tag is a no-op.
    pub fn register_tag(&mut self, tag: impl Into<String>) {
        self.store.register_tag(tag);
    }

    /// Register several tags.
    pub fn register_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self.store.register_tag(tag);
        }
    }

    /// Create a component of `kind` with `overrides` merged over its
    /// defaults, without attaching it to anything.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Component`] if `kind` is not registered.
    pub fn instantiate(&mut self, kind: &str, overrides: Fields) -> Result<Component, WorldError> {
        Ok(self.registry.instantiate(kind, overrides)?)
    }

    // -- Entities --

    /// Create an entity. See [`EntityStore::create_entity`].
    ///
    /// # Errors
    ///
    /// Same as [`EntityStore::create_entity`].
    pub fn create_entity(&mut self, spec: EntitySpec) -> Result<EntityId, WorldError> {
        let id = self.store.create_entity(spec, &mut self.registry)?;
        self.bump();
        debug!(entity = %id, revision = self.revision, "entity created");
        Ok(id)
    }

    /// Create several entities in order. Stops at the first failure; entities
    /// created before it are kept.
    ///
    /// # Errors
    ///
    /// Same as [`World::create_entity`].
    pub fn create_entities(&mut self, specs: Vec<EntitySpec>) -> Result<Vec<EntityId>, WorldError> {
        specs
            .into_iter()
            .map(|spec| self.create_entity(spec))
            .collect()
    }

    /// Remove an entity, recycling its pooled components.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownEntity`] if the id is absent.
    pub fn remove_entity(&mut self, id: &EntityId) -> Result<(), WorldError> {
        let entity = self.store.remove_entity(id)?;
        self.release(entity);
        self.bump();
        debug!(entity = %id, revision = self.revision, "entity removed");
        Ok(())
    }

    /// Remove several entities in order. Stops at the first unknown id.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownEntity`] for the first absent id.
    pub fn remove_entities(&mut self, ids: &[EntityId]) -> Result<(), WorldError> {
        ids.iter().try_for_each(|id| self.remove_entity(id))
    }

    /// Merge components into an entity. See [`EntityStore::update_entity`].
    ///
    /// # Errors
    ///
    /// Same as [`EntityStore::update_entity`].
    pub fn update_entity(
        &mut self,
        id: &EntityId,
        components: Vec<Component>,
    ) -> Result<(), WorldError> {
        self.store
            .update_entity(id, components, &mut self.registry)?;
        self.bump();
        Ok(())
    }

    /// Apply several updates in order. Stops at the first failure.
    ///
    /// # Errors
    ///
    /// Same as [`World::update_entity`].
    pub fn update_entities(&mut self, updates: Vec<EntityUpdate>) -> Result<(), WorldError> {
        updates
            .into_iter()
            .try_for_each(|update| self.update_entity(&update.id, update.components))
    }

    /// Detach a component of `kind` from an entity. Returns `false` if the
    /// entity had no such component.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownEntity`] if the id is absent.
    pub fn remove_component(&mut self, id: &EntityId, kind: &str) -> Result<bool, WorldError> {
        match self.store.remove_component(id, kind)? {
            Some(component) => {
                self.registry.release(component);
                self.bump();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Attach registered tags to an entity.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownEntity`] or [`WorldError::UnknownTag`].
    pub fn add_tags(&mut self, id: &EntityId, tags: &[String]) -> Result<(), WorldError> {
        self.store.add_tags(id, tags)?;
        self.bump();
        Ok(())
    }

    /// Detach tags from an entity.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownEntity`] or [`WorldError::UnknownTag`].
    pub fn remove_tags(&mut self, id: &EntityId, tags: &[String]) -> Result<(), WorldError> {
        self.store.remove_tags(id, tags)?;
        self.bump();
        Ok(())
    }

    /// Present entities among `ids`, in the order given.
    #[must_use]
    pub fn get_entities(&self, ids: &[EntityId]) -> Vec<&Entity> {
        self.store.get_entities(ids)
    }

    /// All entities in insertion order.
    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.store.all_entities()
    }

    /// Entities carrying `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownTag`] if `tag` is not registered.
    pub fn entities_with_tag(&self, tag: &str) -> Result<Vec<&Entity>, WorldError> {
        self.store.entities_with_tag(tag)
    }

    /// Entities holding every kind in `with` and none in `without`.
    #[must_use]
    pub fn query(&self, with: &[&str], without: &[&str]) -> Vec<&Entity> {
        self.store.query(with, without)
    }

    fn release(&mut self, entity: Entity) {
        for component in entity.components {
            self.registry.release(component);
        }
    }

    // -- Systems --

    /// Register a system.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::DuplicateSystemId`] if the id is taken.
    pub fn add_system(&mut self, system: impl System + 'static) -> Result<(), WorldError> {
        self.scheduler.add_system(Box::new(system))
    }

    /// Unregister a system.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownSystem`] if no system has this id.
    pub fn remove_system(&mut self, id: &str) -> Result<(), WorldError> {
        self.scheduler.remove_system(id).map(drop)
    }

    /// Enable systems. See [`Scheduler::enable_systems`].
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownSystem`]; nothing is toggled.
    pub fn enable_systems<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<(), WorldError> {
        self.scheduler.enable_systems(ids)
    }

    /// Disable systems. See [`Scheduler::disable_systems`].
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownSystem`]; nothing is toggled.
    pub fn disable_systems<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<(), WorldError> {
        self.scheduler.disable_systems(ids)
    }

    // -- Lifecycle --

    /// Scheduler state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Start or resume ticking.
    pub fn start(&mut self) {
        self.scheduler.start();
    }

    /// Pause ticking.
    pub fn pause(&mut self) {
        self.scheduler.pause();
    }

    /// Stop ticking, running shutdown hooks if the scheduler was active.
    pub fn stop(&mut self) {
        if self.scheduler.stop(&mut self.store, &mut self.registry) {
            self.bump();
        }
    }

    /// Run one tick of `dt` seconds. Returns `None` unless running.
    pub fn tick(&mut self, dt: f64) -> Option<TickReport> {
        let report = self.scheduler.tick(&mut self.store, &mut self.registry, dt)?;
        if report.changed {
            self.bump();
        }
        Some(report)
    }

    // -- Snapshots --

    /// Capture the current state as a local snapshot.
    #[must_use]
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.store, &self.registry, self.revision, Origin::Local)
    }

    /// Replace every entity with the contents of `snapshot`.
    ///
    /// Component kinds are checked before anything changes. Tags the world
    /// does not know yet are registered. Systems and the scheduler state are
    /// left alone. Afterwards the revision is the larger of the world's and
    /// the snapshot's.
    ///
    /// # Errors
    ///
    /// - [`WorldError::IncompatibleRevision`] in [`ApplyMode::Strict`] when
    ///   the snapshot is not newer than the world.
    /// - [`WorldError::Component`] if a component kind is not registered.
    pub fn apply_from_snapshot(
        &mut self,
        snapshot: &Snapshot,
        mode: ApplyMode,
    ) -> Result<(), WorldError> {
        if mode == ApplyMode::Strict && snapshot.revision <= self.revision {
            return Err(WorldError::IncompatibleRevision {
                current: self.revision,
                incoming: snapshot.revision,
            });
        }
        for entity in &snapshot.entities {
            for component in &entity.components {
                self.registry.kind(&component.kind)?;
            }
        }

        for entity in self.store.clear() {
            self.release(entity);
        }
        for entry in &snapshot.entities {
            for tag in &entry.tags {
                self.store.register_tag(tag.clone());
            }
            let mut components: Vec<Component> = Vec::with_capacity(entry.components.len());
            for component in &entry.components {
                let instance = self
                    .registry
                    .instantiate(&component.kind, component.fields.clone())?;
                match components.iter_mut().find(|c| c.kind == instance.kind) {
                    Some(slot) => *slot = instance,
                    None => components.push(instance),
                }
            }
            self.store.restore(Entity {
                id: entry.id.clone(),
                components,
                tags: entry.tags.iter().cloned().collect(),
            });
        }

        self.revision = self.revision.max(snapshot.revision);
        info!(
            revision = self.revision,
            origin = %snapshot.origin,
            entities = snapshot.len(),
            "applied snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::snapshot;
    use crate::system::SystemFn;

    fn world() -> World {
        let mut world = World::new();
        world
            .register_kind(ComponentKind::new("Position").field("x", 0).field("y", 0))
            .unwrap();
        world
            .register_kind(ComponentKind::new("Velocity").field("x", 1).field("y", 0).pooled())
            .unwrap();
        world.register_tag("Project Tag");
        world
    }

    #[test]
    fn test_create_with_partial_fields() {
        let mut world = world();
        let id = world
            .create_entity(EntitySpec::new().component(Component::new("Position").with("x", 5)))
            .unwrap();
        let found = world.get_entities(&[id]);
        let position = found[0].component("Position").unwrap();
        assert_eq!(position.get("x"), Some(&json!(5)));
        assert_eq!(position.get("y"), Some(&json!(0)));
        assert_eq!(world.revision(), 1);
    }

    #[test]
    fn test_failed_mutation_keeps_revision() {
        let mut world = world();
        let err = world.remove_entity(&EntityId::from("ghost")).unwrap_err();
        assert!(matches!(err, WorldError::UnknownEntity(_)));
        assert_eq!(world.revision(), 0);
    }

    #[test]
    fn test_batches_bump_once_per_entity() {
        let mut world = world();
        let ids = world
            .create_entities(vec![
                EntitySpec::new().with_id("a"),
                EntitySpec::new().with_id("b"),
            ])
            .unwrap();
        assert_eq!(world.revision(), 2);

        world
            .update_entities(vec![EntityUpdate {
                id: ids[0].clone(),
                components: vec![Component::new("Position").with("y", 3)],
            }])
            .unwrap();
        assert_eq!(world.revision(), 3);

        world.remove_entities(&ids).unwrap();
        assert_eq!(world.revision(), 5);
        assert_eq!(world.all_entities().count(), 0);
    }

    #[test]
    fn test_batch_stops_at_first_failure() {
        let mut world = world();
        let err = world
            .create_entities(vec![
                EntitySpec::new().with_id("a"),
                EntitySpec::new().with_id("a"),
                EntitySpec::new().with_id("c"),
            ])
            .unwrap_err();
        assert!(matches!(err, WorldError::DuplicateId(_)));
        let ids: Vec<&str> = world.all_entities().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_removed_pooled_components_are_recycled() {
        let mut world = world();
        let id = world
            .create_entity(EntitySpec::new().component(Component::new("Velocity").with("x", 9)))
            .unwrap();
        world.remove_entity(&id).unwrap();
        assert_eq!(world.registry().pooled_count("Velocity"), 1);

        let id = world
            .create_entity(EntitySpec::new().component(Component::new("Velocity")))
            .unwrap();
        let velocity = world.get_entities(&[id])[0].component("Velocity").unwrap().clone();
        assert_eq!(velocity.get("x"), Some(&json!(1)));
        assert_eq!(world.registry().pooled_count("Velocity"), 0);
    }

    #[test]
    fn test_tick_bumps_revision_once_when_systems_mutate() {
        let mut world = world();
        let id = world
            .create_entity(EntitySpec::new().component(Component::new("Position")))
            .unwrap();
        world
            .add_system(SystemFn::new("mover", move |ctx| {
                for _ in 0..3 {
                    ctx.set_field(&id, "Position", "x", 1)?;
                }
                Ok(())
            }))
            .unwrap();
        world
            .add_system(SystemFn::new("idle", |_| Ok(())).with_priority(1))
            .unwrap();

        assert!(world.tick(0.016).is_none());
        world.start();
        let before = world.revision();
        let report = world.tick(0.016).unwrap();
        assert!(report.changed);
        assert_eq!(world.revision(), before + 1);
    }

    #[test]
    fn test_idle_tick_keeps_revision() {
        let mut world = world();
        world.add_system(SystemFn::new("idle", |_| Ok(()))).unwrap();
        world.start();
        world.tick(0.016).unwrap();
        assert_eq!(world.revision(), 0);
    }

    #[test]
    fn test_apply_snapshot_is_idempotent() {
        let mut source = world();
        source
            .create_entity(
                EntitySpec::new()
                    .with_id("Project")
                    .tag("Project Tag")
                    .component(Component::new("Position").with("x", 2)),
            )
            .unwrap();
        let snapshot = source.to_snapshot();

        let mut target = world();
        target
            .create_entity(EntitySpec::new().with_id("stale"))
            .unwrap();
        target
            .apply_from_snapshot(&snapshot, ApplyMode::Relaxed)
            .unwrap();
        let once = snapshot::encode(&target.to_snapshot()).unwrap();
        target
            .apply_from_snapshot(&snapshot, ApplyMode::Relaxed)
            .unwrap();
        let twice = snapshot::encode(&target.to_snapshot()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(target.all_entities().count(), 1);
        assert_eq!(
            target.entities_with_tag("Project Tag").unwrap()[0].id.as_str(),
            "Project"
        );
    }

    #[test]
    fn test_strict_apply_rejects_older_snapshot() {
        let mut world = world();
        for _ in 0..5 {
            world.create_entity(EntitySpec::new()).unwrap();
        }
        let mut snapshot = world.to_snapshot();
        snapshot.revision = 3;
        snapshot.entities.clear();

        let err = world
            .apply_from_snapshot(&snapshot, ApplyMode::Strict)
            .unwrap_err();
        assert!(matches!(
            err,
            WorldError::IncompatibleRevision {
                current: 5,
                incoming: 3
            }
        ));
        assert_eq!(world.all_entities().count(), 5);
    }

    #[test]
    fn test_relaxed_apply_keeps_highest_revision() {
        let mut world = world();
        for _ in 0..5 {
            world.create_entity(EntitySpec::new()).unwrap();
        }
        let mut snapshot = world.to_snapshot();
        snapshot.revision = 3;
        snapshot.entities.truncate(1);
        world
            .apply_from_snapshot(&snapshot, ApplyMode::Relaxed)
            .unwrap();
        assert_eq!(world.revision(), 5);
        assert_eq!(world.all_entities().count(), 1);

        snapshot.revision = 9;
        world
            .apply_from_snapshot(&snapshot, ApplyMode::Strict)
            .unwrap();
        assert_eq!(world.revision(), 9);
    }

    #[test]
    fn test_apply_unknown_kind_changes_nothing() {
        let mut world = world();
        world.create_entity(EntitySpec::new().with_id("keep")).unwrap();
        let mut snapshot = world.to_snapshot();
        snapshot.entities[0]
            .components
            .push(Component::new("Health"));

        assert!(world
            .apply_from_snapshot(&snapshot, ApplyMode::Relaxed)
            .is_err());
        assert_eq!(world.all_entities().count(), 1);
    }

    #[test]
    fn test_apply_leaves_systems_alone() {
        let mut world = world();
        world.add_system(SystemFn::new("s", |_| Ok(()))).unwrap();
        world.start();
        let snapshot = World::new().to_snapshot();
        world
            .apply_from_snapshot(&snapshot, ApplyMode::Relaxed)
            .unwrap();
        assert_eq!(world.scheduler().system_ids(), vec!["s"]);
        assert_eq!(world.state(), SchedulerState::Running);
    }

    #[test]
    fn test_codec_round_trip_through_world() {
        let mut world = world();
        world
            .create_entity(
                EntitySpec::new()
                    .tag("Project Tag")
                    .component(Component::new("Position").with("x", 4))
                    .component(Component::new("Velocity")),
            )
            .unwrap();
        let encoded = snapshot::encode(&world.to_snapshot()).unwrap();

        let mut other = self::world();
        let decoded = snapshot::decode(&encoded, other.registry()).unwrap();
        other
            .apply_from_snapshot(&decoded, ApplyMode::Relaxed)
            .unwrap();
        assert_eq!(snapshot::encode(&other.to_snapshot()).unwrap(), encoded);
    }

    #[test]
    fn test_stop_runs_shutdown_once() {
        let mut world = world();
        world
            .add_system(SystemFn::new("s", |_| Ok(())).on_shutdown(|ctx| {
                ctx.create_entity(EntitySpec::new().with_id("bye"))?;
                Ok(())
            }))
            .unwrap();
        world.start();
        world.stop();
        world.stop();
        assert_eq!(world.all_entities().count(), 1);
        assert_eq!(world.revision(), 1);
    }
}

//! Systems and the per-tick context they run against.
//!
//! A [`System`] is a unit of per-tick logic. It reads and mutates the world
//! only through the [`SystemContext`] it is handed, which also lets it ask the
//! scheduler to remove, enable or disable systems.

use std::fmt;

use engine_component::{Component, ComponentRegistry, EntityId};
use serde_json::Value;

use crate::error::WorldError;
use crate::store::{Entity, EntitySpec, EntityStore};

/// A unit of per-tick logic.
///
/// Systems run in ascending [`priority`](System::priority); ties run in
/// registration order.
pub trait System: Send {
    /// Unique identifier of the system within its scheduler.
    fn id(&self) -> &str;

    /// Execution priority. Lower values run first.
    fn priority(&self) -> i32 {
        0
    }

    /// Called once per tick while the scheduler is running and the system is
    /// enabled.
    ///
    /// # Errors
    ///
    /// An error is logged by the scheduler as a recoverable per-tick failure.
    fn run(&mut self, ctx: &mut SystemContext<'_>) -> anyhow::Result<()>;

    /// Called once when the scheduler stops.
    ///
    /// # Errors
    ///
    /// An error is logged by the scheduler and does not stop other hooks.
    fn shutdown(&mut self, _ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

type Hook = Box<dyn FnMut(&mut SystemContext<'_>) -> anyhow::Result<()> + Send>;

/// A [`System`] built from closures.
///
/// ```rust
/// use engine_ecs::SystemFn;
///
/// let counter = SystemFn::new("counter", |ctx| {
///     tracing::debug!(tick_id = ctx.tick_id, "tick");
///     Ok(())
/// })
/// .with_priority(10);
/// # let _ = counter;
/// ```
pub struct SystemFn {
    id: String,
    priority: i32,
    run: Hook,
    shutdown: Option<Hook>,
}

impl SystemFn {
    /// Create a system with priority 0 from a run hook.
    #[must_use]
    pub fn new<F>(id: impl Into<String>, run: F) -> Self
    where
        F: FnMut(&mut SystemContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            id: id.into(),
            priority: 0,
            run: Box::new(run),
            shutdown: None,
        }
    }

    /// Set the execution priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the shutdown hook.
    #[must_use]
    pub fn on_shutdown<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut SystemContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.shutdown = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for SystemFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemFn")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("has_shutdown", &self.shutdown.is_some())
            .finish_non_exhaustive()
    }
}

impl System for SystemFn {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn run(&mut self, ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        (self.run)(ctx)
    }

    fn shutdown(&mut self, ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        match self.shutdown.as_mut() {
            Some(hook) => hook(ctx),
            None => Ok(()),
        }
    }
}

/// A scheduler change requested by a system during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SchedulerCommand {
    Remove(String),
    Enable(String),
    Disable(String),
}

/// Context provided to a system on each tick.
///
/// Contains tick metadata and mutable access to the world's entities. Every
/// successful mutation marks the context as changed so the world can bump its
/// revision once for the whole tick.
pub struct SystemContext<'a> {
    /// The current tick ID.
    pub tick_id: u64,
    /// Delta time since the last tick, in seconds.
    pub dt: f64,
    store: &'a mut EntityStore,
    registry: &'a mut ComponentRegistry,
    changed: bool,
    commands: Vec<SchedulerCommand>,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(
        tick_id: u64,
        dt: f64,
        store: &'a mut EntityStore,
        registry: &'a mut ComponentRegistry,
    ) -> Self {
        Self {
            tick_id,
            dt,
            store,
            registry,
            changed: false,
            commands: Vec::new(),
        }
    }

    /// Returns `true` if any entity was mutated through this context.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn take_commands(&mut self) -> Vec<SchedulerCommand> {
        std::mem::take(&mut self.commands)
    }

    pub(crate) fn is_removal_requested(&self, id: &str) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(c, SchedulerCommand::Remove(r) if r == id))
    }

    // -- Reads --

    /// All entities, in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.store.all_entities()
    }

    /// The entity with `id`, if present.
    #[must_use]
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.store.get(id)
    }

    /// Ids of entities holding every kind in `with` and none in `without`.
    #[must_use]
    pub fn query(&self, with: &[&str], without: &[&str]) -> Vec<EntityId> {
        self.store
            .query(with, without)
            .into_iter()
            .map(|e| e.id.clone())
            .collect()
    }

    /// Ids of entities carrying `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownTag`] if `tag` is not registered.
    pub fn entities_with_tag(&self, tag: &str) -> Result<Vec<EntityId>, WorldError> {
        Ok(self
            .store
            .entities_with_tag(tag)?
            .into_iter()
            .map(|e| e.id.clone())
            .collect())
    }

    // -- Mutations --

    /// Create an entity. See [`EntityStore::create_entity`].
    ///
    /// # Errors
    ///
    /// Same as [`EntityStore::create_entity`].
    pub fn create_entity(&mut self, spec: EntitySpec) -> Result<EntityId, WorldError> {
        let id = self.store.create_entity(spec, self.registry)?;
        self.changed = true;
        Ok(id)
    }

    /// Remove an entity.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownEntity`] if the id is absent.
    pub fn remove_entity(&mut self, id: &EntityId) -> Result<(), WorldError> {
        let entity = self.store.remove_entity(id)?;
        for component in entity.components {
            self.registry.release(component);
        }
        self.changed = true;
        Ok(())
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
        self.store.update_entity(id, components, self.registry)?;
        self.changed = true;
        Ok(())
    }

    /// Set one declared field of an attached component. Returns `false` and
    /// leaves the world untouched if the component or field does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownEntity`] if the id is absent.
    pub fn set_field(
        &mut self,
        id: &EntityId,
        kind: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<bool, WorldError> {
        let written = self
            .store
            .set_field(id, kind, field, value.into(), self.registry)?;
        self.changed |= written;
        Ok(written)
    }

    // -- Scheduler requests --

    /// Remove a system. A system that has not yet run this tick is skipped;
    /// the removal completes once the tick ends.
    pub fn remove_system(&mut self, id: impl Into<String>) {
        self.commands.push(SchedulerCommand::Remove(id.into()));
    }

    /// Enable a system once the tick ends.
    pub fn enable_system(&mut self, id: impl Into<String>) {
        self.commands.push(SchedulerCommand::Enable(id.into()));
    }

    /// Disable a system once the tick ends.
    pub fn disable_system(&mut self, id: impl Into<String>) {
        self.commands.push(SchedulerCommand::Disable(id.into()));
    }
}

impl fmt::Debug for SystemContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemContext")
            .field("tick_id", &self.tick_id)
            .field("dt", &self.dt)
            .field("changed", &self.changed)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

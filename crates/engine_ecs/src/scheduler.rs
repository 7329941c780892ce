//! System scheduler — ordering, lifecycle and failure isolation.
//!
//! Systems are kept sorted by `(priority, registration order)`. A tick runs
//! every enabled system in that order against a single [`SystemContext`].
//! A system that returns an error or panics is logged and skipped; the rest
//! of the tick still runs.
//!
//! Scheduler changes a system requests mid-tick (remove, enable, disable) are
//! applied once the tick ends. A removal also takes effect immediately for
//! systems that have not run yet in the current tick.

use std::panic::{AssertUnwindSafe, catch_unwind};

use engine_component::ComponentRegistry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::WorldError;
use crate::store::EntityStore;
use crate::system::{SchedulerCommand, System, SystemContext};

/// Lifecycle state of the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Not running; the initial state.
    #[default]
    Stopped,
    /// Ticks run systems.
    Running,
    /// Ticks are ignored until the scheduler is started again.
    Paused,
}

/// A system hook that failed during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFailure {
    /// Id of the failing system.
    pub system: String,
    /// The error or panic message.
    pub message: String,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick that ran.
    pub tick_id: u64,
    /// Ids of the systems whose run hook was invoked, in execution order.
    pub ran: Vec<String>,
    /// Hooks that returned an error or panicked.
    pub failures: Vec<SystemFailure>,
    /// Whether any system mutated the world.
    pub changed: bool,
}

struct SystemEntry {
    system: Box<dyn System>,
    priority: i32,
    enabled: bool,
}

/// Owns the systems of a world and drives them.
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<SystemEntry>,
    state: SchedulerState,
    tick_id: u64,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("systems", &self.system_ids())
            .field("state", &self.state)
            .field("tick_id", &self.tick_id)
            .finish()
    }
}

impl Scheduler {
    /// Create a stopped scheduler with no systems.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Id of the last tick that ran.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// System ids in execution order.
    #[must_use]
    pub fn system_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.system.id()).collect()
    }

    /// Whether the system `id` is enabled, or `None` if it is not registered.
    #[must_use]
    pub fn is_enabled(&self, id: &str) -> Option<bool> {
        self.position(id).map(|pos| self.entries[pos].enabled)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.system.id() == id)
    }

    // -- Registration --

    /// Register a system. It starts enabled.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::DuplicateSystemId`] if the id is taken.
    pub fn add_system(&mut self, system: Box<dyn System>) -> Result<(), WorldError> {
        if self.position(system.id()).is_some() {
            return Err(WorldError::DuplicateSystemId(system.id().to_string()));
        }
        let priority = system.priority();
        let at = self.entries.partition_point(|e| e.priority <= priority);
        debug!(system = system.id(), priority, "system added");
        self.entries.insert(
            at,
            SystemEntry {
                system,
                priority,
                enabled: true,
            },
        );
        Ok(())
    }

    /// Unregister a system and return it.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownSystem`] if no system has this id.
    pub fn remove_system(&mut self, id: &str) -> Result<Box<dyn System>, WorldError> {
        let pos = self
            .position(id)
            .ok_or_else(|| WorldError::UnknownSystem(id.to_string()))?;
        debug!(system = id, "system removed");
        Ok(self.entries.remove(pos).system)
    }

    /// Enable every system in `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownSystem`] for the first unknown id; no
    /// system is toggled in that case.
    pub fn enable_systems<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<(), WorldError> {
        self.set_enabled(ids, true)
    }

    /// Disable every system in `ids`. Disabled systems stay registered.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownSystem`] for the first unknown id; no
    /// system is toggled in that case.
    pub fn disable_systems<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<(), WorldError> {
        self.set_enabled(ids, false)
    }

    fn set_enabled<S: AsRef<str>>(&mut self, ids: &[S], enabled: bool) -> Result<(), WorldError> {
        let positions = ids
            .iter()
            .map(|id| {
                self.position(id.as_ref())
                    .ok_or_else(|| WorldError::UnknownSystem(id.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for pos in positions {
            self.entries[pos].enabled = enabled;
        }
        Ok(())
    }

    // -- Lifecycle --

    /// Start ticking, or resume from pause. No-op when already running.
    pub fn start(&mut self) {
        match self.state {
            SchedulerState::Running => debug!("scheduler already running"),
            previous => {
                self.state = SchedulerState::Running;
                info!(?previous, systems = self.entries.len(), "scheduler started");
            }
        }
    }

    /// Pause ticking. Only valid while running; otherwise a no-op.
    pub fn pause(&mut self) {
        if self.state == SchedulerState::Running {
            self.state = SchedulerState::Paused;
            info!(tick_id = self.tick_id, "scheduler paused");
        } else {
            debug!(state = ?self.state, "pause ignored");
        }
    }

    /// Stop the scheduler.
    ///
    /// When leaving `Running` or `Paused`, every system's shutdown hook runs
    /// once, in reverse execution order. Returns `true` if a hook mutated the
    /// world.
    pub fn stop(&mut self, store: &mut EntityStore, registry: &mut ComponentRegistry) -> bool {
        if self.state == SchedulerState::Stopped {
            debug!("scheduler already stopped");
            return false;
        }
        self.state = SchedulerState::Stopped;

        let mut ctx = SystemContext::new(self.tick_id, 0.0, store, registry);
        for entry in self.entries.iter_mut().rev() {
            let id = entry.system.id().to_string();
            if let Err(message) = invoke(|| entry.system.shutdown(&mut ctx)) {
                warn!(system = %id, error = %message, "shutdown hook failed");
            }
        }
        let changed = ctx.changed();
        let commands = ctx.take_commands();
        drop(ctx);
        self.apply(commands);

        info!(tick_id = self.tick_id, "scheduler stopped");
        changed
    }

    // -- Ticking --

    /// Run one tick. Returns `None` without running anything unless the
    /// scheduler is running.
    pub fn tick(
        &mut self,
        store: &mut EntityStore,
        registry: &mut ComponentRegistry,
        dt: f64,
    ) -> Option<TickReport> {
        if self.state != SchedulerState::Running {
            return None;
        }
        self.tick_id += 1;
        let tick_id = self.tick_id;

        let mut ran = Vec::new();
        let mut failures = Vec::new();
        let mut ctx = SystemContext::new(tick_id, dt, store, registry);

        for entry in &mut self.entries {
            if !entry.enabled || ctx.is_removal_requested(entry.system.id()) {
                continue;
            }
            let id = entry.system.id().to_string();
            if let Err(message) = invoke(|| entry.system.run(&mut ctx)) {
                warn!(tick_id, system = %id, error = %message, "system failed");
                failures.push(SystemFailure {
                    system: id.clone(),
                    message,
                });
            }
            ran.push(id);
        }

        let changed = ctx.changed();
        let commands = ctx.take_commands();
        drop(ctx);
        self.apply(commands);

        debug!(tick_id, ran = ran.len(), failures = failures.len(), changed, "tick complete");
        Some(TickReport {
            tick_id,
            ran,
            failures,
            changed,
        })
    }

    fn apply(&mut self, commands: Vec<SchedulerCommand>) {
        for command in commands {
            let result = match &command {
                SchedulerCommand::Remove(id) => self.remove_system(id).map(drop),
                SchedulerCommand::Enable(id) => self.enable_systems(&[id]),
                SchedulerCommand::Disable(id) => self.disable_systems(&[id]),
            };
            if let Err(err) = result {
                warn!(?command, %err, "deferred scheduler request failed");
            }
        }
    }
}

/// Run a hook, turning both errors and panics into a message.
fn invoke<F>(hook: F) -> Result<(), String>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

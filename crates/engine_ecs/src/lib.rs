//! Editor world runtime.
//!
//! This crate provides the authoritative in-memory world of the editor:
//!
//! - [`EntityStore`] — entities, their components and tags.
//! - [`Scheduler`] — ordered per-tick systems with lifecycle control.
//! - [`World`] — the public contract tying the two together with a revision.
//! - [`snapshot`] — the deterministic snapshot codec.
//! - [`WorldCommand`] — serialisable operations for remote collaborators.

pub mod command;
pub mod error;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod system;
pub mod world;

pub use command::{CommandOutcome, WorldCommand};
pub use error::{SnapshotError, WorldError};
pub use scheduler::{Scheduler, SchedulerState, SystemFailure, TickReport};
pub use snapshot::{EntitySnapshot, Origin, Snapshot};
pub use store::{Entity, EntitySpec, EntityStore};
pub use system::{System, SystemContext, SystemFn};
pub use world::{ApplyMode, EntityUpdate, World};

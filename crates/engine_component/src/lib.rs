//! # engine_component
//!
//! The "C" in ECS. Defines what a component is, which kinds of component a
//! world accepts, and how entities are identified.
//!
//! This crate provides:
//!
//! - [`ComponentKind`] — the schema (declared fields + defaults) for a class
//!   of component.
//! - [`Component`] — a component instance: a kind name plus JSON field values.
//! - [`ComponentRegistry`] — the set of kinds a world accepts, with
//!   defaults merging, field normalisation and optional instance pooling.
//! - [`EntityId`] — opaque, string-based entity identifiers.

pub mod component;
pub mod entity;
pub mod error;
pub mod registry;

pub use component::{Component, ComponentKind, Fields};
pub use entity::EntityId;
pub use error::ComponentError;
pub use registry::ComponentRegistry;

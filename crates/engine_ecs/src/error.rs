//! World-level error types.

use engine_component::{ComponentError, EntityId};

/// Errors surfaced synchronously by [`World`](crate::World) operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The entity id is not present in the world.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// A caller-supplied entity id is already in use.
    #[error("entity id already in use: {0}")]
    DuplicateId(EntityId),

    /// A tag was used before being registered.
    #[error("unknown tag: {0}")]
    UnknownTag(String),

    /// A system with the same id is already registered.
    #[error("duplicate system id: {0}")]
    DuplicateSystemId(String),

    /// No system with this id is registered.
    #[error("unknown system: {0}")]
    UnknownSystem(String),

    /// Strict apply of a snapshot that is not newer than the world.
    #[error("snapshot revision {incoming} is not newer than world revision {current}")]
    IncompatibleRevision {
        /// The world's revision at the time of the apply.
        current: u64,
        /// The revision carried by the rejected snapshot.
        incoming: u64,
    },

    /// Component registry failure (unknown or duplicate kind).
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// A snapshot could not be encoded or decoded.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Errors raised by the snapshot codec.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The input is not a structurally valid snapshot.
    #[error("malformed snapshot: {0}")]
    Malformed(String),

    /// The snapshot references a component kind the registry does not know.
    #[error("snapshot references unknown component kind: {0}")]
    UnknownKind(String),

    /// The snapshot could not be serialised.
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
}

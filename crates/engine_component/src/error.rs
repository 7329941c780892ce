//! Component-registry error types.

/// Errors raised by the [`ComponentRegistry`](crate::ComponentRegistry).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    /// A component kind was used before being registered.
    #[error("unknown component kind: {0}")]
    UnknownKind(String),

    /// A component kind with the same name is already registered.
    #[error("duplicate component kind: {0}")]
    DuplicateKind(String),
}

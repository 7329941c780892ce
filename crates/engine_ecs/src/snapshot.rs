//! Snapshot codec — serialise a world's entities and read them back.
//!
//! A [`Snapshot`] is a revisioned, self-contained image of every entity, its
//! tags and the serialisable fields of its components. Systems are not part
//! of a snapshot.
//!
//! The encoded form is JSON. Struct fields serialise in declaration order,
//! component fields live in ordered maps, entities follow world insertion
//! order and tags are sorted, so identical logical state always encodes to
//! identical bytes.

use std::collections::{BTreeSet, HashSet};

use engine_component::{Component, ComponentRegistry, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SnapshotError;
use crate::store::EntityStore;

/// Where a snapshot was produced.
///
/// Serialises as the string `"local"` or as the peer id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Origin {
    /// Produced by this process.
    Local,
    /// Received from the peer with this id.
    Peer(String),
}

const LOCAL_ORIGIN: &str = "local";

impl From<String> for Origin {
    fn from(s: String) -> Self {
        if s == LOCAL_ORIGIN {
            Self::Local
        } else {
            Self::Peer(s)
        }
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        match origin {
            Origin::Local => LOCAL_ORIGIN.to_string(),
            Origin::Peer(id) => id,
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str(LOCAL_ORIGIN),
            Self::Peer(id) => f.write_str(id),
        }
    }
}

/// One entity inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// The entity's id.
    pub id: EntityId,
    /// Sorted tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Components, restricted to serialisable fields.
    #[serde(default)]
    pub components: Vec<Component>,
}

/// A revisioned image of a world's entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// World revision the snapshot was taken at.
    pub revision: u64,
    /// Producer of the snapshot.
    pub origin: Origin,
    /// Entities in world insertion order.
    #[serde(default)]
    pub entities: Vec<EntitySnapshot>,
}

impl Snapshot {
    /// Capture the entities of `store` at `revision`.
    #[must_use]
    pub fn capture(
        store: &EntityStore,
        registry: &ComponentRegistry,
        revision: u64,
        origin: Origin,
    ) -> Self {
        let entities = store
            .all_entities()
            .map(|entity| EntitySnapshot {
                id: entity.id.clone(),
                tags: entity.tags.iter().cloned().collect(),
                components: entity
                    .components
                    .iter()
                    .map(|c| Component {
                        kind: c.kind.clone(),
                        fields: match registry.kind(&c.kind) {
                            Ok(kind) => kind.serializable_subset(&c.fields),
                            Err(_) => c.fields.clone(),
                        },
                    })
                    .collect(),
            })
            .collect();
        Self {
            revision,
            origin,
            entities,
        }
    }

    /// Number of entities in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the snapshot holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Encode a snapshot to its canonical JSON bytes.
///
/// # Errors
///
/// Returns [`SnapshotError::Encode`] if serialisation fails.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, SnapshotError> {
    serde_json::to_vec(snapshot).map_err(|e| SnapshotError::Encode(e.to_string()))
}

/// Encode a snapshot as a JSON value, for embedding in a message envelope.
///
/// # Errors
///
/// Returns [`SnapshotError::Encode`] if serialisation fails.
pub fn to_value(snapshot: &Snapshot) -> Result<Value, SnapshotError> {
    serde_json::to_value(snapshot).map_err(|e| SnapshotError::Encode(e.to_string()))
}

/// Decode and validate snapshot bytes.
///
/// # Errors
///
/// - [`SnapshotError::Malformed`] if the bytes are not a valid snapshot,
///   repeat an entity id, or repeat a component kind within one entity.
/// - [`SnapshotError::UnknownKind`] if a component kind is not registered.
pub fn decode(bytes: &[u8], registry: &ComponentRegistry) -> Result<Snapshot, SnapshotError> {
    let raw: Snapshot =
        serde_json::from_slice(bytes).map_err(|e| SnapshotError::Malformed(e.to_string()))?;
    validate(raw, registry)
}

/// Decode and validate a snapshot held in a JSON value.
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_value(value: Value, registry: &ComponentRegistry) -> Result<Snapshot, SnapshotError> {
    let raw: Snapshot =
        serde_json::from_value(value).map_err(|e| SnapshotError::Malformed(e.to_string()))?;
    validate(raw, registry)
}

fn validate(mut snapshot: Snapshot, registry: &ComponentRegistry) -> Result<Snapshot, SnapshotError> {
    let mut seen_ids = HashSet::with_capacity(snapshot.entities.len());
    for entity in &mut snapshot.entities {
        if !seen_ids.insert(entity.id.clone()) {
            return Err(SnapshotError::Malformed(format!(
                "duplicate entity id {}",
                entity.id
            )));
        }

        let mut seen_kinds = HashSet::with_capacity(entity.components.len());
        for component in &mut entity.components {
            if !seen_kinds.insert(component.kind.clone()) {
                return Err(SnapshotError::Malformed(format!(
                    "entity {} repeats component kind {}",
                    entity.id, component.kind
                )));
            }
            let kind = registry
                .kind(&component.kind)
                .map_err(|_| SnapshotError::UnknownKind(component.kind.clone()))?;
            let fields = kind.normalize(std::mem::take(&mut component.fields));
            component.fields = kind.serializable_subset(&fields);
        }

        let tags: BTreeSet<String> = entity.tags.drain(..).collect();
        entity.tags = tags.into_iter().collect();
    }
    Ok(snapshot)
}

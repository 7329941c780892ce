//! NATS subject hierarchy.
//!
//! All engine subjects are prefixed with `engine.` to namespace within a
//! shared NATS cluster.

/// Root prefix for all engine NATS subjects.
pub const PREFIX: &str = "engine";

/// Prefix of world synchronisation subjects.
pub const WORLD: &str = "engine.world";

/// Build the subject two peers use to exchange messages about one world.
///
/// `engine.world.<topic>`
#[must_use]
pub fn world_sync(topic: &str) -> String {
    format!("{WORLD}.{topic}")
}

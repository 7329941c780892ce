//! Message types exchanged between peers.
//!
//! Every message on a world link is an [`Envelope`]: a `kind` that tells the
//! receiver how to read the payload, the sender's world revision and origin,
//! and an arbitrary JSON payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope kind carrying a full world snapshot.
pub const SNAPSHOT_KIND: &str = "world-snapshot";

/// Envelope kind carrying a world command for the session to execute.
pub const COMMAND_KIND: &str = "world-command";

/// The wire wrapper around every message on a world link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// What the payload is, e.g. [`SNAPSHOT_KIND`].
    pub kind: String,
    /// World revision of the sender when the message was produced.
    #[serde(default)]
    pub revision: u64,
    /// Id of the sending peer.
    #[serde(default)]
    pub origin: String,
    /// Kind-specific content.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope.
    #[must_use]
    pub fn new(kind: impl Into<String>, revision: u64, origin: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            revision,
            origin: origin.into(),
            payload,
        }
    }

    /// Create a snapshot envelope.
    #[must_use]
    pub fn snapshot(revision: u64, origin: impl Into<String>, payload: Value) -> Self {
        Self::new(SNAPSHOT_KIND, revision, origin, payload)
    }

    /// Returns `true` if this envelope carries a world snapshot.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.kind == SNAPSHOT_KIND
    }
}

//! Synchroniser configuration.

use std::time::Duration;

use engine_ecs::ApplyMode;
use engine_net::Framing;
use uuid::Uuid;

/// Well-known store key for the world snapshot.
pub const DEFAULT_STORE_KEY: &str = "gameState";

/// Default debounce window for outbound snapshots.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Configuration for a [`Synchronizer`](crate::Synchronizer).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Store key the snapshot is persisted under.
    pub store_key: String,
    /// Id this process uses as envelope origin.
    pub peer_id: String,
    /// Quiet period before a snapshot is sent to the peer.
    pub debounce: Duration,
    /// First retry delay after a failed write or send.
    pub retry_initial: Duration,
    /// Upper bound on the retry delay.
    pub retry_max: Duration,
    /// Attempts at reading the store during restore.
    pub restore_attempts: u32,
    /// Time allowed for the final send at shutdown.
    pub flush_timeout: Duration,
    /// Revision handling when applying snapshots.
    pub apply_mode: ApplyMode,
    /// Frame type for outbound envelopes.
    pub framing: Framing,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_key: DEFAULT_STORE_KEY.to_string(),
            peer_id: Uuid::new_v4().to_string(),
            debounce: DEFAULT_DEBOUNCE,
            retry_initial: Duration::from_millis(250),
            retry_max: Duration::from_secs(10),
            restore_attempts: 3,
            flush_timeout: Duration::from_secs(2),
            apply_mode: ApplyMode::Relaxed,
            framing: Framing::Text,
        }
    }
}

impl SyncConfig {
    /// Create a config with defaults and a fresh peer id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the store key.
    #[must_use]
    pub fn with_store_key(mut self, key: impl Into<String>) -> Self {
        self.store_key = key.into();
        self
    }

    /// Override the peer id.
    #[must_use]
    pub fn with_peer_id(mut self, id: impl Into<String>) -> Self {
        self.peer_id = id.into();
        self
    }

    /// Override the debounce window.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Override the retry backoff bounds.
    #[must_use]
    pub fn with_retry(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial = initial;
        self.retry_max = max.max(initial);
        self
    }

    /// Override the number of restore attempts. At least one is made.
    #[must_use]
    pub fn with_restore_attempts(mut self, attempts: u32) -> Self {
        self.restore_attempts = attempts.max(1);
        self
    }

    /// Override the shutdown send timeout.
    #[must_use]
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Override the apply mode.
    #[must_use]
    pub fn with_apply_mode(mut self, mode: ApplyMode) -> Self {
        self.apply_mode = mode;
        self
    }

    /// Override the outbound frame type.
    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }
}

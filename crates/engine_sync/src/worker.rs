//! Background persist and send workers.
//!
//! Both workers are fed through a `watch` channel holding the latest encoded
//! snapshot. A worker only ever looks at the newest value, so a
//! snapshot that arrives while an older one is waiting replaces it. Neither
//! worker ever writes or sends a revision at or below the last one it
//! completed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use engine_net::{ChannelMessage, ConnectionStatus};
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, warn};

use crate::store::{DurableStore, StoreError};

/// Canonical snapshot bytes waiting to be persisted.
#[derive(Debug, Clone)]
pub(crate) struct Encoded {
    pub revision: u64,
    pub bytes: Arc<Vec<u8>>,
}

/// A snapshot envelope frame waiting to be sent.
#[derive(Debug, Clone)]
pub(crate) struct Outgoing {
    pub revision: u64,
    pub frame: ChannelMessage,
}

/// Revisions completed by the workers.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    persisted: AtomicU64,
    sent: AtomicU64,
    /// Revision the store holds. Every write happens under this lock.
    stored: Mutex<u64>,
}

impl Progress {
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Acquire)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }

    /// Record that the store already holds `revision`.
    pub fn mark_persisted(&self, revision: u64) {
        let mut stored = self.stored.lock().unwrap_or_else(PoisonError::into_inner);
        *stored = (*stored).max(revision);
        self.persisted.fetch_max(revision, Ordering::AcqRel);
    }

    /// Write `bytes` under `key` unless the store already holds `revision`
    /// or a later one. Blocks; returns `true` if the store was written.
    pub fn write_newer(
        &self,
        store: &dyn DurableStore,
        key: &str,
        revision: u64,
        bytes: &[u8],
    ) -> Result<bool, StoreError> {
        let mut stored = self.stored.lock().unwrap_or_else(PoisonError::into_inner);
        if revision <= *stored {
            return Ok(false);
        }
        store.set(key, bytes)?;
        *stored = revision;
        self.persisted.fetch_max(revision, Ordering::AcqRel);
        Ok(true)
    }

    pub fn mark_sent(&self, revision: u64) {
        self.sent.fetch_max(revision, Ordering::AcqRel);
    }
}

/// Exponential backoff between `initial` and `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    /// The delay to wait now; doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

/// Write a snapshot on a blocking thread through
/// [`Progress::write_newer`]. A write that outlives its caller still
/// cannot land below a later one.
pub(crate) async fn write(
    store: &Arc<dyn DurableStore>,
    progress: &Arc<Progress>,
    key: &str,
    encoded: Encoded,
) -> Result<bool, StoreError> {
    let store = Arc::clone(store);
    let progress = Arc::clone(progress);
    let key = key.to_string();
    tokio::task::spawn_blocking(move || {
        progress.write_newer(store.as_ref(), &key, encoded.revision, &encoded.bytes)
    })
    .await
    .map_err(|err| StoreError::Unavailable(err.to_string()))?
}

/// Persist the latest snapshot, retrying failed writes with backoff.
pub(crate) async fn persist_loop(
    store: Arc<dyn DurableStore>,
    key: String,
    mut rx: watch::Receiver<Option<Encoded>>,
    progress: Arc<Progress>,
    retry: Backoff,
) {
    while rx.changed().await.is_ok() {
        let mut backoff = retry.clone();
        loop {
            let Some(pending) = rx.borrow_and_update().clone() else {
                break;
            };
            if pending.revision <= progress.persisted() {
                break;
            }
            let revision = pending.revision;
            match write(&store, &progress, &key, pending).await {
                Ok(written) => {
                    if written {
                        debug!(revision, key, "snapshot persisted");
                    }
                    break;
                }
                Err(err) => warn!(revision, %err, "snapshot write failed"),
            }
            tokio::select! {
                () = tokio::time::sleep(backoff.next_delay()) => {}
                changed = rx.changed() => if changed.is_err() { return; },
            }
        }
    }
    debug!("persist worker stopped");
}

/// Send the latest snapshot to the peer at most once per debounce window,
/// waiting with backoff while the link is disconnected.
pub(crate) async fn send_loop(
    outbound: mpsc::Sender<ChannelMessage>,
    mut status: watch::Receiver<ConnectionStatus>,
    mut rx: watch::Receiver<Option<Outgoing>>,
    flush: Arc<Notify>,
    progress: Arc<Progress>,
    debounce: Duration,
    retry: Backoff,
) {
    while rx.changed().await.is_ok() {
        tokio::select! {
            () = tokio::time::sleep(debounce) => {}
            () = flush.notified() => debug!("debounce bypassed"),
        }

        let mut backoff = retry.clone();
        loop {
            let Some(pending) = rx.borrow_and_update().clone() else {
                break;
            };
            if pending.revision <= progress.sent() {
                break;
            }
            if !status.borrow_and_update().is_connected() {
                let delay = backoff.next_delay();
                debug!(revision = pending.revision, ?delay, "link down, send deferred");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    changed = status.changed() => if changed.is_err() { return; },
                    changed = rx.changed() => if changed.is_err() { return; },
                }
                continue;
            }
            if outbound.send(pending.frame).await.is_err() {
                warn!("link closed, send worker stopping");
                return;
            }
            progress.mark_sent(pending.revision);
            debug!(revision = pending.revision, "snapshot sent");
            break;
        }
    }
    debug!("send worker stopped");
}

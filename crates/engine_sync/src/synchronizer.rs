//! State synchroniser: keeps a [`World`] consistent with the durable store
//! and with a remote peer.
//!
//! The synchroniser is driven from the session loop between ticks:
//!
//! 1. [`Synchronizer::restore_or_seed`] once at startup.
//! 2. [`Synchronizer::pump`] after every tick. Local changes are committed
//!    (persisted immediately, sent after the debounce window), then inbound
//!    envelopes are drained. Snapshots newer than the world replace it
//!    (last writer wins by revision); everything else is queued for
//!    [`Synchronizer::take_passthrough`].
//! 3. [`Synchronizer::shutdown`] at teardown, which writes the final snapshot
//!    synchronously.
//!
//! Store and link failures never block world mutation; they show up as
//! [`SyncStatus::synced`] being `false` until the workers catch up.

use std::collections::VecDeque;
use std::sync::Arc;

use engine_ecs::{Origin, SnapshotError, World, WorldError, snapshot};
use engine_net::{
    ChannelLink, ChannelMessage, ConnectionStatus, Envelope, NetError, decode_frame, encode_frame,
};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::store::{DurableStore, StoreError};
use crate::worker::{self, Backoff, Encoded, Outgoing, Progress};

/// Errors surfaced by the synchroniser.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The durable store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A snapshot could not be encoded.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Applying or seeding the world failed.
    #[error(transparent)]
    World(#[from] WorldError),

    /// An envelope could not be framed.
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Point-in-time view of synchronisation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    /// Whether the link to the peer is up.
    pub connected: bool,
    /// Latest world revision seen by the synchroniser.
    pub revision: u64,
    /// Latest revision written to the store.
    pub persisted_revision: u64,
    /// Latest revision the peer is known to have.
    pub sent_revision: u64,
    /// `true` once `revision` is both persisted and known to the peer.
    pub synced: bool,
}

/// How [`Synchronizer::restore_or_seed`] initialised the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restored {
    /// A stored snapshot at this revision was applied.
    Snapshot(u64),
    /// Nothing usable was stored; the seed ran.
    Seeded,
}

/// What a [`Synchronizer::pump`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Revision of the local snapshot committed, if the world had changed.
    pub committed: Option<u64>,
    /// Revision of the inbound snapshot applied, if any.
    pub applied: Option<u64>,
    /// Envelopes queued for other collaborators.
    pub passthrough: usize,
    /// Frames dropped as malformed or stale.
    pub dropped: usize,
}

/// Keeps a world in step with the durable store and the peer.
#[derive(Debug)]
pub struct Synchronizer {
    store: Arc<dyn DurableStore>,
    config: SyncConfig,
    inbound: mpsc::Receiver<ChannelMessage>,
    outbound: mpsc::Sender<ChannelMessage>,
    status: watch::Receiver<ConnectionStatus>,
    persist_tx: watch::Sender<Option<Encoded>>,
    send_tx: watch::Sender<Option<Outgoing>>,
    flush: Arc<Notify>,
    progress: Arc<Progress>,
    /// World revision of the last commit or apply.
    observed: Option<u64>,
    passthrough: VecDeque<Envelope>,
    workers: Vec<JoinHandle<()>>,
}

impl Synchronizer {
    /// Create a synchroniser over `store` and `link` and start its workers.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, link: ChannelLink, config: SyncConfig) -> Self {
        let ChannelLink {
            outbound,
            inbound,
            status,
        } = link;
        let (persist_tx, persist_rx) = watch::channel(None);
        let (send_tx, send_rx) = watch::channel(None);
        let flush = Arc::new(Notify::new());
        let progress = Arc::new(Progress::default());
        let retry = Backoff::new(config.retry_initial, config.retry_max);

        let workers = vec![
            tokio::spawn(worker::persist_loop(
                Arc::clone(&store),
                config.store_key.clone(),
                persist_rx,
                Arc::clone(&progress),
                retry.clone(),
            )),
            tokio::spawn(worker::send_loop(
                outbound.clone(),
                status.clone(),
                send_rx,
                Arc::clone(&flush),
                Arc::clone(&progress),
                config.debounce,
                retry,
            )),
        ];

        info!(
            peer_id = config.peer_id,
            store_key = config.store_key,
            debounce_ms = config.debounce.as_millis() as u64,
            "synchronizer started"
        );

        Self {
            store,
            config,
            inbound,
            outbound,
            status,
            persist_tx,
            send_tx,
            flush,
            progress,
            observed: None,
            passthrough: VecDeque::new(),
            workers,
        }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Initialise `world` from the store, or run `seed` if nothing usable is
    /// stored.
    ///
    /// Read failures are retried with backoff up to the configured number of
    /// attempts before falling back to the seed. Corrupt or incompatible
    /// stored bytes also fall back to the seed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::World`] if the seed fails.
    pub async fn restore_or_seed<F>(&mut self, world: &mut World, seed: F) -> Result<Restored, SyncError>
    where
        F: FnOnce(&mut World) -> Result<(), WorldError>,
    {
        let stored = self.read_stored().await;
        let restored = stored.and_then(|bytes| {
            match snapshot::decode(&bytes, world.registry())
                .map_err(WorldError::from)
                .and_then(|snap| world.apply_from_snapshot(&snap, self.config.apply_mode))
            {
                Ok(()) => Some(world.revision()),
                Err(err) => {
                    warn!(%err, key = self.config.store_key, "stored snapshot unusable, seeding");
                    None
                }
            }
        });

        match restored {
            Some(revision) => {
                self.progress.mark_persisted(revision);
                info!(revision, entities = world.store().len(), "world restored");
                Ok(Restored::Snapshot(revision))
            }
            None => {
                seed(world)?;
                info!(revision = world.revision(), "world seeded");
                Ok(Restored::Seeded)
            }
        }
    }

    async fn read_stored(&self) -> Option<Vec<u8>> {
        let mut backoff = Backoff::new(self.config.retry_initial, self.config.retry_max);
        for attempt in 1..=self.config.restore_attempts {
            let store = Arc::clone(&self.store);
            let key = self.config.store_key.clone();
            let result = tokio::task::spawn_blocking(move || store.get(&key))
                .await
                .map_err(|err| StoreError::Unavailable(err.to_string()))
                .and_then(|r| r);
            match result {
                Ok(bytes) => return bytes,
                Err(err) => {
                    warn!(attempt, %err, "store read failed");
                    if attempt < self.config.restore_attempts {
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }
            }
        }
        None
    }

    /// Commit local changes and process inbound messages. Call between ticks.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the local snapshot cannot be encoded.
    /// Problems with inbound messages are logged and the messages dropped.
    pub fn pump(&mut self, world: &mut World) -> Result<PumpReport, SyncError> {
        let mut report = PumpReport::default();
        if self.observed != Some(world.revision()) {
            report.committed = Some(self.commit(world)?);
        }

        loop {
            let message = match self.inbound.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("inbound link closed");
                    break;
                }
            };
            let envelope: Envelope = match decode_frame(&message) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(%err, "dropping malformed frame");
                    report.dropped += 1;
                    continue;
                }
            };
            if !envelope.is_snapshot() {
                debug!(kind = envelope.kind, "queued for passthrough");
                self.passthrough.push_back(envelope);
                report.passthrough += 1;
                continue;
            }
            match self.apply_inbound(world, envelope) {
                Some(revision) => report.applied = Some(revision),
                None => report.dropped += 1,
            }
        }
        Ok(report)
    }

    fn apply_inbound(&mut self, world: &mut World, envelope: Envelope) -> Option<u64> {
        if envelope.revision <= world.revision() {
            debug!(
                incoming = envelope.revision,
                current = world.revision(),
                "ignoring stale snapshot"
            );
            return None;
        }
        let mut snap = match snapshot::decode_value(envelope.payload, world.registry()) {
            Ok(snap) => snap,
            Err(err) => {
                warn!(%err, origin = envelope.origin, "dropping invalid snapshot");
                return None;
            }
        };
        if snap.revision <= world.revision() {
            debug!(incoming = snap.revision, "ignoring stale snapshot payload");
            return None;
        }
        snap.origin = Origin::Peer(envelope.origin);
        if let Err(err) = world.apply_from_snapshot(&snap, self.config.apply_mode) {
            warn!(%err, "inbound snapshot rejected");
            return None;
        }

        let revision = world.revision();
        self.observed = Some(revision);
        // The peer already has this state.
        self.progress.mark_sent(revision);
        match snapshot::encode(&world.to_snapshot()) {
            Ok(bytes) => {
                self.persist_tx.send_replace(Some(Encoded {
                    revision,
                    bytes: Arc::new(bytes),
                }));
            }
            Err(err) => warn!(%err, "cannot persist applied snapshot"),
        }
        Some(revision)
    }

    fn encode(&self, world: &World) -> Result<(Encoded, Outgoing), SyncError> {
        let snap = world.to_snapshot();
        let bytes = snapshot::encode(&snap)?;
        let envelope = Envelope::snapshot(
            snap.revision,
            self.config.peer_id.clone(),
            snapshot::to_value(&snap)?,
        );
        let encoded = Encoded {
            revision: snap.revision,
            bytes: Arc::new(bytes),
        };
        let outgoing = Outgoing {
            revision: snap.revision,
            frame: encode_frame(&envelope, self.config.framing)?,
        };
        Ok((encoded, outgoing))
    }

    fn commit(&mut self, world: &World) -> Result<u64, SyncError> {
        let (encoded, outgoing) = self.encode(world)?;
        let revision = encoded.revision;
        self.persist_tx.send_replace(Some(encoded));
        self.send_tx.send_replace(Some(outgoing));
        self.observed = Some(revision);
        debug!(revision, "snapshot committed");
        Ok(revision)
    }

    /// Commit any local change and send it without waiting for the debounce
    /// window.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the snapshot cannot be encoded.
    pub fn flush(&mut self, world: &World) -> Result<(), SyncError> {
        if self.observed != Some(world.revision()) {
            self.commit(world)?;
        }
        self.flush.notify_one();
        Ok(())
    }

    /// Take every queued non-snapshot envelope, oldest first.
    pub fn take_passthrough(&mut self) -> Vec<Envelope> {
        self.passthrough.drain(..).collect()
    }

    /// Current synchronisation progress.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let revision = self.observed.unwrap_or(0);
        let persisted_revision = self.progress.persisted();
        let sent_revision = self.progress.sent();
        SyncStatus {
            connected: self.status.borrow().is_connected(),
            revision,
            persisted_revision,
            sent_revision,
            synced: persisted_revision >= revision && sent_revision >= revision,
        }
    }

    /// Stop the world and flush its final state.
    ///
    /// The scheduler is stopped (running shutdown hooks), the workers are
    /// cancelled, and the final snapshot is written to the store before this
    /// returns. A write the persist worker still has in flight finishes first
    /// and cannot overwrite it. The snapshot is then offered to the peer
    /// within the configured flush timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the final snapshot cannot be encoded or
    /// written.
    pub async fn shutdown(mut self, world: &mut World) -> Result<SyncStatus, SyncError> {
        world.stop();
        for handle in self.workers.drain(..) {
            handle.abort();
        }

        let (encoded, outgoing) = self.encode(world)?;
        let revision = encoded.revision;
        self.observed = Some(revision);

        worker::write(&self.store, &self.progress, &self.config.store_key, encoded).await?;

        let connected = self.status.borrow().is_connected();
        if revision > self.progress.sent() && connected {
            let send = self.outbound.send(outgoing.frame);
            match tokio::time::timeout(self.config.flush_timeout, send).await {
                Ok(Ok(())) => self.progress.mark_sent(revision),
                Ok(Err(_)) => warn!(revision, "link closed before final send"),
                Err(_) => warn!(revision, "final send timed out"),
            }
        }

        let status = self.status();
        info!(
            revision,
            persisted = status.persisted_revision,
            sent = status.sent_revision,
            "synchronizer shut down"
        );
        Ok(status)
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        for handle in &self.workers {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use engine_component::{Component, ComponentKind};
    use engine_ecs::{EntitySpec, Snapshot, SystemFn};
    use engine_net::{COMMAND_KIND, Framing, StatusSender};

    use super::*;
    use crate::store::MemoryStore;

    fn world() -> World {
        let mut world = World::new();
        world
            .register_kind(ComponentKind::new("Position").field("x", 0).field("y", 0))
            .unwrap();
        world
    }

    fn world_at(revision: u64) -> World {
        let mut world = world();
        for _ in 0..revision {
            world.create_entity(EntitySpec::new()).unwrap();
        }
        world
    }

    struct Harness {
        sync: Synchronizer,
        store: MemoryStore,
        peer: ChannelLink,
        status: StatusSender,
    }

    fn harness(config: SyncConfig) -> Harness {
        let store = MemoryStore::new();
        let (local, peer, status) = ChannelLink::pair(16);
        let sync = Synchronizer::new(Arc::new(store.clone()), local, config);
        Harness {
            sync,
            store,
            peer,
            status,
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::new().with_peer_id("local")
    }

    fn snapshot_frame(snapshot: &Snapshot, origin: &str) -> ChannelMessage {
        let envelope = Envelope::snapshot(
            snapshot.revision,
            origin,
            snapshot::to_value(snapshot).unwrap(),
        );
        encode_frame(&envelope, Framing::Text).unwrap()
    }

    fn stored_revision(store: &MemoryStore, registry: &engine_component::ComponentRegistry) -> Option<u64> {
        store
            .get("gameState")
            .unwrap()
            .map(|bytes| snapshot::decode(&bytes, registry).unwrap().revision)
    }

    /// Let background workers run until `done` holds, or give up.
    async fn settle(mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_inbound_snapshot_replaces_world() {
        let mut h = harness(config());
        let mut world = world_at(3);

        let mut remote = world_at(5);
        remote
            .create_entity(EntitySpec::new().with_id("remote-only").component(Component::new("Position")))
            .unwrap();
        let mut remote_snapshot = remote.to_snapshot();
        remote_snapshot.revision = 5;

        h.peer
            .outbound
            .send(snapshot_frame(&remote_snapshot, "peer"))
            .await
            .unwrap();
        let report = h.sync.pump(&mut world).unwrap();
        assert_eq!(report.committed, Some(3));
        assert_eq!(report.applied, Some(5));
        assert_eq!(world.revision(), 5);
        assert_eq!(world.store().len(), 6);

        settle(|| stored_revision(&h.store, world.registry()) == Some(5)).await;
        assert_eq!(stored_revision(&h.store, world.registry()), Some(5));

        // An older snapshot arriving later is discarded.
        let mut older = world_at(4).to_snapshot();
        older.revision = 4;
        h.peer.outbound.send(snapshot_frame(&older, "peer")).await.unwrap();
        let report = h.sync.pump(&mut world).unwrap();
        assert_eq!(report.applied, None);
        assert_eq!(report.dropped, 1);
        assert_eq!(world.revision(), 5);
        assert_eq!(world.store().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_applied_snapshot_is_not_echoed() {
        let mut h = harness(config());
        let mut world = world();
        h.sync.pump(&mut world).unwrap();

        let remote = world_at(2).to_snapshot();
        h.peer.outbound.send(snapshot_frame(&remote, "peer")).await.unwrap();
        h.sync.pump(&mut world).unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(h.peer.inbound.try_recv().is_err());
        assert!(h.sync.status().synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_bursts() {
        let mut h = harness(config());
        let mut world = world();
        h.sync.pump(&mut world).unwrap();
        for _ in 0..3 {
            world.create_entity(EntitySpec::new()).unwrap();
            h.sync.pump(&mut world).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let first: Envelope = decode_frame(&h.peer.inbound.recv().await.unwrap()).unwrap();
        assert_eq!(first.revision, 3);
        assert_eq!(first.origin, "local");
        assert!(h.peer.inbound.try_recv().is_err());

        world.create_entity(EntitySpec::new()).unwrap();
        h.sync.pump(&mut world).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second: Envelope = decode_frame(&h.peer.inbound.recv().await.unwrap()).unwrap();
        assert!(second.revision > first.revision);
        assert!(h.sync.status().synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_skips_debounce() {
        let mut h = harness(config());
        let mut world = world_at(1);
        h.sync.flush(&world).unwrap();
        let envelope: Envelope = decode_frame(&h.peer.inbound.recv().await.unwrap()).unwrap();
        assert_eq!(envelope.revision, 1);
        assert_eq!(h.sync.status().revision, 1);
        h.sync.pump(&mut world).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_waits_for_connection() {
        let mut h = harness(config());
        let mut world = world_at(2);
        h.status.send_replace(ConnectionStatus::Disconnected);
        h.sync.pump(&mut world).unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(h.peer.inbound.try_recv().is_err());
        let status = h.sync.status();
        assert!(!status.connected);
        assert!(!status.synced);
        assert_eq!(status.persisted_revision, 2);

        h.status.send_replace(ConnectionStatus::Connected);
        let envelope: Envelope = decode_frame(&h.peer.inbound.recv().await.unwrap()).unwrap();
        assert_eq!(envelope.revision, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_kinds_pass_through() {
        let mut h = harness(config());
        let mut world = world();
        let command = Envelope::new(COMMAND_KIND, 0, "peer", serde_json::json!({"op": "start"}));
        h.peer
            .outbound
            .send(encode_frame(&command, Framing::Binary).unwrap())
            .await
            .unwrap();
        h.peer
            .outbound
            .send(ChannelMessage::Text("not an envelope".into()))
            .await
            .unwrap();

        let report = h.sync.pump(&mut world).unwrap();
        assert_eq!(report.passthrough, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(h.sync.take_passthrough(), vec![command]);
        assert!(h.sync.take_passthrough().is_empty());
        assert_eq!(world.revision(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_writes_final_snapshot() {
        let h = harness(config().with_debounce(Duration::from_secs(60)));
        let Harness {
            sync,
            store,
            mut peer,
            status: _status,
        } = h;
        let mut world = world();
        world
            .add_system(SystemFn::new("noop", |_| Ok(())))
            .unwrap();
        world.start();
        world.create_entity(EntitySpec::new().with_id("last")).unwrap();

        let status = sync.shutdown(&mut world).await.unwrap();
        assert_eq!(world.state(), engine_ecs::SchedulerState::Stopped);
        assert_eq!(status.persisted_revision, 1);
        assert!(status.synced);
        assert_eq!(stored_revision(&store, world.registry()), Some(1));
        let envelope: Envelope = decode_frame(&peer.inbound.recv().await.unwrap()).unwrap();
        assert_eq!(envelope.revision, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_from_store() {
        let mut source = world_at(4);
        source
            .create_entity(EntitySpec::new().with_id("Project"))
            .unwrap();
        let mut h = harness(config());
        h.store
            .set("gameState", &snapshot::encode(&source.to_snapshot()).unwrap())
            .unwrap();

        let mut world = world();
        let restored = h
            .sync
            .restore_or_seed(&mut world, |_| panic!("seed must not run"))
            .await
            .unwrap();
        assert_eq!(restored, Restored::Snapshot(5));
        assert_eq!(world.revision(), 5);
        assert_eq!(world.store().len(), 5);
        assert_eq!(h.sync.status().persisted_revision, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_store_falls_back_to_seed() {
        let mut h = harness(config());
        h.store.set("gameState", b"{broken").unwrap();
        let mut world = world();
        let restored = h
            .sync
            .restore_or_seed(&mut world, |w| {
                w.create_entity(EntitySpec::new().with_id("Project"))?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(restored, Restored::Seeded);
        assert_eq!(world.revision(), 1);

        h.sync.pump(&mut world).unwrap();
        settle(|| stored_revision(&h.store, world.registry()) == Some(1)).await;
        assert_eq!(stored_revision(&h.store, world.registry()), Some(1));
    }

    /// Store that fails a set number of reads and writes, and can stall its
    /// first write.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        read_failures: AtomicU32,
        write_failures: AtomicU32,
        first_write_delay: Duration,
        writes: AtomicU32,
    }

    fn fail_once(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    impl DurableStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            if fail_once(&self.read_failures) {
                return Err(StoreError::Unavailable("flaky read".into()));
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(self.first_write_delay);
            }
            if fail_once(&self.write_failures) {
                return Err(StoreError::Unavailable("flaky write".into()));
            }
            self.inner.set(key, value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_retries_read_failures() {
        let inner = MemoryStore::new();
        inner
            .set("gameState", &snapshot::encode(&world_at(2).to_snapshot()).unwrap())
            .unwrap();
        let store = Arc::new(FlakyStore {
            inner,
            read_failures: AtomicU32::new(2),
            ..FlakyStore::default()
        });
        let (local, _peer, _status) = ChannelLink::pair(4);
        let mut sync = Synchronizer::new(store, local, config().with_restore_attempts(3));

        let mut world = world();
        let restored = sync
            .restore_or_seed(&mut world, |_| panic!("seed must not run"))
            .await
            .unwrap();
        assert_eq!(restored, Restored::Snapshot(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_gives_up_after_attempts() {
        let store = Arc::new(FlakyStore {
            read_failures: AtomicU32::new(10),
            ..FlakyStore::default()
        });
        let (local, _peer, _status) = ChannelLink::pair(4);
        let mut sync = Synchronizer::new(store, local, config().with_restore_attempts(2));

        let mut world = world();
        let restored = sync.restore_or_seed(&mut world, |_| Ok(())).await.unwrap();
        assert_eq!(restored, Restored::Seeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_writes_are_retried_with_backoff() {
        let store = Arc::new(FlakyStore {
            write_failures: AtomicU32::new(3),
            ..FlakyStore::default()
        });
        let (local, _peer, _status) = ChannelLink::pair(4);
        let config = config().with_retry(Duration::from_millis(100), Duration::from_secs(1));
        let mut sync = Synchronizer::new(store.clone(), local, config);

        let mut world = world_at(1);
        sync.pump(&mut world).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sync.status().persisted_revision, 0);
        assert!(!sync.status().synced);

        settle(|| sync.status().synced).await;
        assert!(sync.status().synced);
        assert_eq!(store.writes.load(Ordering::SeqCst), 4);
        assert_eq!(stored_revision(&store.inner, world.registry()), Some(1));
    }

    #[tokio::test]
    async fn test_in_flight_write_cannot_overwrite_final_snapshot() {
        let store = Arc::new(FlakyStore {
            first_write_delay: Duration::from_millis(300),
            ..FlakyStore::default()
        });
        let (local, _peer, _status) = ChannelLink::pair(4);
        let mut sync = Synchronizer::new(store.clone(), local, config());

        let mut world = world_at(1);
        sync.pump(&mut world).unwrap();
        settle(|| store.writes.load(Ordering::SeqCst) > 0).await;
        world.create_entity(EntitySpec::new()).unwrap();

        let status = sync.shutdown(&mut world).await.unwrap();
        assert_eq!(status.persisted_revision, 2);
        assert_eq!(stored_revision(&store.inner, world.registry()), Some(2));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
        assert_eq!(stored_revision(&store.inner, world.registry()), Some(2));
    }
}

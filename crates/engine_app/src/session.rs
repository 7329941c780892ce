//! Session tick loop.
//!
//! One session owns the [`World`] and its [`Synchronizer`]. Each step:
//!
//! 1. Tick the world (a no-op unless the scheduler is running).
//! 2. Pump the synchroniser: commit local changes, apply newer peer snapshots.
//! 3. Execute `world-command` envelopes received from collaborators.
//!
//! The loop ends on the shutdown signal or after `max_ticks` steps, and then
//! hands the world to [`Synchronizer::shutdown`] for the final flush.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use engine_ecs::{World, WorldCommand};
use engine_net::{COMMAND_KIND, Envelope};
use engine_sync::{PumpReport, SyncStatus, Synchronizer};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the session tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
        }
    }
}

/// Shortest tick period the loop will run at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

impl TickConfig {
    /// Duration of one tick, never shorter than [`MIN_PERIOD`].
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.tick_rate).map_or(MIN_PERIOD, |p| p.max(MIN_PERIOD))
    }
}

/// A running editor session.
#[derive(Debug)]
pub struct Session {
    config: TickConfig,
    world: World,
    sync: Synchronizer,
    steps: u64,
}

impl Session {
    /// Create a session over an initialised world.
    #[must_use]
    pub fn new(config: TickConfig, world: World, sync: Synchronizer) -> Self {
        Self {
            config,
            world,
            sync,
            steps: 0,
        }
    }

    /// Returns a reference to the world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Returns a mutable reference to the world.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Run one step of `dt` seconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the local snapshot cannot be encoded.
    pub fn step(&mut self, dt: f64) -> Result<PumpReport> {
        self.steps += 1;
        if let Some(report) = self.world.tick(dt) {
            for failure in &report.failures {
                warn!(
                    tick_id = report.tick_id,
                    system = %failure.system,
                    error = %failure.message,
                    "system failed"
                );
            }
        }

        let report = self.sync.pump(&mut self.world)?;
        if let Some(revision) = report.applied {
            info!(revision, "applied peer snapshot");
        }
        for envelope in self.sync.take_passthrough() {
            self.handle(envelope);
        }
        Ok(report)
    }

    fn handle(&mut self, envelope: Envelope) {
        if envelope.kind != COMMAND_KIND {
            debug!(kind = %envelope.kind, origin = %envelope.origin, "unhandled envelope");
            return;
        }
        let command: WorldCommand = match serde_json::from_value(envelope.payload) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, origin = %envelope.origin, "malformed world command");
                return;
            }
        };
        match self.world.execute(command) {
            Ok(outcome) => debug!(?outcome, origin = %envelope.origin, "world command done"),
            Err(err) => warn!(%err, origin = %envelope.origin, "world command failed"),
        }
    }

    /// Run the tick loop until `shutdown` resolves or `max_ticks` is reached,
    /// then flush the final state.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot cannot be encoded or the final write
    /// fails.
    pub async fn run<F>(mut self, shutdown: F) -> Result<SyncStatus>
    where
        F: Future<Output = ()>,
    {
        let period = self.config.period();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(steps = self.steps, "shutdown requested");
                    break;
                }
                _ = interval.tick() => {}
            }

            let start = Instant::now();
            self.step(period.as_secs_f64())?;

            if self.config.max_ticks > 0 && self.steps >= self.config.max_ticks {
                info!(steps = self.steps, "tick loop complete");
                break;
            }

            let elapsed = start.elapsed();
            if elapsed > period {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = period.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }

        let Self {
            mut world, sync, ..
        } = self;
        let status = sync.shutdown(&mut world).await?;
        info!(
            revision = status.revision,
            persisted = status.persisted_revision,
            sent = status.sent_revision,
            synced = status.synced,
            "session closed"
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use engine_component::{Component, EntityId};
    use engine_ecs::{EntitySpec, SchedulerState};
    use engine_net::ChannelLink;
    use engine_sync::{DurableStore, MemoryStore, SyncConfig};
    use serde_json::json;

    use super::*;
    use crate::kinds;

    fn session(store: &MemoryStore, link: ChannelLink, max_ticks: u64) -> Session {
        let mut world = World::new();
        kinds::register(&mut world).unwrap();
        kinds::seed(&mut world).unwrap();
        world.add_system(kinds::movement()).unwrap();
        let sync = Synchronizer::new(
            Arc::new(store.clone()),
            link,
            SyncConfig::new().with_peer_id("session"),
        );
        let config = TickConfig {
            tick_rate: 10.0,
            max_ticks,
        };
        Session::new(config, world, sync)
    }

    fn stored_revision(store: &MemoryStore) -> u64 {
        let bytes = store.get("gameState").unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["revision"].as_u64().unwrap()
    }

    #[test]
    fn test_tick_config_period() {
        let config = TickConfig {
            tick_rate: 20.0,
            max_ticks: 0,
        };
        assert_eq!(config.period(), Duration::from_millis(50));
        assert_eq!(TickConfig::default().tick_rate, 60.0);
    }

    #[test]
    fn test_tick_config_period_has_a_floor() {
        for tick_rate in [1e10, f64::INFINITY, 0.0, -5.0, f64::NAN] {
            let config = TickConfig {
                tick_rate,
                max_ticks: 0,
            };
            assert_eq!(config.period(), MIN_PERIOD);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_envelope_is_executed() {
        let store = MemoryStore::new();
        let (link, peer, _status) = ChannelLink::pair(8);
        let mut session = session(&store, link, 0);

        let command = json!({
            "op": "create_entities",
            "entities": [{
                "id": "b",
                "components": [{"kind": "Position", "fields": {"x": 3.0}}]
            }]
        });
        let envelope = Envelope::new(COMMAND_KIND, 0, "ui", command);
        peer.outbound
            .send(engine_net::encode_frame(&envelope, engine_net::Framing::Text).unwrap())
            .await
            .unwrap();

        let report = session.step(0.1).unwrap();
        assert_eq!(report.passthrough, 1);
        let created = session.world().get_entities(&[EntityId::from("b")]);
        assert_eq!(created.len(), 1);
        assert_eq!(
            created[0].component("Position").unwrap().get("y"),
            Some(&json!(0.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_command_is_ignored() {
        let store = MemoryStore::new();
        let (link, peer, _status) = ChannelLink::pair(8);
        let mut session = session(&store, link, 0);
        let before = session.world().revision();

        let envelope = Envelope::new(COMMAND_KIND, 0, "ui", json!({"op": "explode"}));
        peer.outbound
            .send(engine_net::encode_frame(&envelope, engine_net::Framing::Text).unwrap())
            .await
            .unwrap();

        session.step(0.1).unwrap();
        assert_eq!(session.world().revision(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_after_max_ticks_and_flushes() {
        let store = MemoryStore::new();
        let (link, _peer, _status) = ChannelLink::pair(8);
        let mut session = session(&store, link, 3);
        session
            .world_mut()
            .create_entity(
                EntitySpec::new()
                    .component(Component::new(kinds::POSITION))
                    .component(Component::new(kinds::VELOCITY).with("x", 1.0)),
            )
            .unwrap();
        session.world_mut().start();

        let status = session.run(std::future::pending()).await.unwrap();

        // Seed, create, then one change per tick.
        assert_eq!(status.revision, 5);
        assert_eq!(status.persisted_revision, 5);
        assert_eq!(stored_revision(&store), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown_signal() {
        let store = MemoryStore::new();
        let (link, _peer, _status) = ChannelLink::pair(8);
        let mut session = session(&store, link, 0);
        session.world_mut().start();
        assert_eq!(session.world().state(), SchedulerState::Running);

        let status = session
            .run(tokio::time::sleep(Duration::from_millis(350)))
            .await
            .unwrap();

        assert_eq!(status.revision, 1);
        assert_eq!(stored_revision(&store), 1);
    }
}

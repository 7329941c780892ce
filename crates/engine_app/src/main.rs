//! # engine_app — Coordinator
//!
//! Runs one editor session: restores the world from the local store (or seeds
//! a default project), ticks it at a fixed rate, and keeps it synchronised
//! with a peer over NATS.
//!
//! ## Startup Sequence
//!
//! 1. Open the file store (`--store-dir`, env `ENGINE_STORE_DIR`).
//! 2. Connect to NATS (`--nats-url`, env `NATS_URL`). If that fails the
//!    session runs offline and keeps persisting locally.
//! 3. Register the built-in kinds and systems, restore or seed the world.
//! 4. Enter the fixed-timestep tick loop until Ctrl-C or `--max-ticks`.

mod kinds;
mod session;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use engine_ecs::World;
use engine_net::channel::DEFAULT_CAPACITY;
use engine_net::connection::DEFAULT_NATS_URL;
use engine_net::{ChannelLink, ConnectionStatus, Framing, NatsConnection};
use engine_sync::{FileStore, SyncConfig, Synchronizer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use session::{Session, TickConfig};

#[derive(Debug, Parser)]
#[command(name = "engine_app", about = "Editor world coordinator with snapshot sync")]
struct Args {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = DEFAULT_NATS_URL)]
    nats_url: String,

    /// Directory holding the persisted world snapshot
    #[arg(long, env = "ENGINE_STORE_DIR", default_value = ".engine")]
    store_dir: PathBuf,

    /// Sync topic shared with the peer
    #[arg(long, default_value = "default")]
    topic: String,

    /// Peer id used as envelope origin (random if omitted)
    #[arg(long)]
    peer_id: Option<String>,

    /// Target ticks per second
    #[arg(long, default_value_t = 60.0)]
    tick_rate: f64,

    /// Stop after this many ticks (0 = run until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    max_ticks: u64,

    /// Debounce window for outbound snapshots, in milliseconds
    #[arg(long, default_value_t = 1000)]
    debounce_ms: u64,

    /// Send MessagePack binary frames instead of JSON text
    #[arg(long)]
    binary: bool,

    /// Do not start the scheduler on launch
    #[arg(long)]
    paused: bool,

    /// Skip NATS and only persist locally
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("engine_app=info".parse()?))
        .init();

    let args = Args::parse();
    anyhow::ensure!(
        args.tick_rate.is_finite() && args.tick_rate > 0.0,
        "--tick-rate must be a positive number"
    );

    info!("engine coordinator starting");

    let mut config = SyncConfig::new().with_debounce(Duration::from_millis(args.debounce_ms));
    if let Some(peer_id) = &args.peer_id {
        config = config.with_peer_id(peer_id.clone());
    }
    if args.binary {
        config = config.with_framing(Framing::Binary);
    }

    let store = FileStore::open(&args.store_dir)
        .with_context(|| format!("cannot open store at {}", args.store_dir.display()))?;
    let link = open_link(&args, &config.peer_id).await;

    let mut world = World::new();
    kinds::register(&mut world)?;
    world.add_system(kinds::movement())?;

    let mut sync = Synchronizer::new(Arc::new(store), link, config);
    let restored = sync.restore_or_seed(&mut world, kinds::seed).await?;
    info!(?restored, entities = world.store().len(), "world ready");

    if !args.paused {
        world.start();
    }

    let tick = TickConfig {
        tick_rate: args.tick_rate,
        max_ticks: args.max_ticks,
    };
    let status = Session::new(tick, world, sync).run(ctrl_c()).await?;

    info!(synced = status.synced, "engine coordinator shut down");
    Ok(())
}

/// Bridge the sync topic onto NATS, or fall back to a link that stays
/// disconnected.
async fn open_link(args: &Args, peer_id: &str) -> ChannelLink {
    if !args.offline {
        match NatsConnection::connect_to(&args.nats_url).await {
            Ok(conn) => match conn.open_link(&args.topic, peer_id).await {
                Ok(link) => return link,
                Err(err) => warn!(%err, "cannot bridge sync topic, running offline"),
            },
            Err(err) => warn!(%err, url = %args.nats_url, "NATS unreachable, running offline"),
        }
    }
    let (link, _peer, status) = ChannelLink::pair(DEFAULT_CAPACITY);
    status.send_replace(ConnectionStatus::Disconnected);
    link
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

//! # engine_sync
//!
//! Keeps the editor world consistent with a durable local snapshot and with
//! a remote peer.
//!
//! - [`store`] — the [`DurableStore`] trait with in-memory and file stores.
//! - [`config`] — [`SyncConfig`] and its defaults.
//! - [`synchronizer`] — the [`Synchronizer`] driven between world ticks.

pub mod config;
pub mod store;
pub mod synchronizer;
mod worker;

pub use config::{DEFAULT_DEBOUNCE, DEFAULT_STORE_KEY, SyncConfig};
pub use store::{DurableStore, FileStore, MemoryStore, StoreError};
pub use synchronizer::{PumpReport, Restored, SyncError, SyncStatus, Synchronizer};

//! # engine_net
//!
//! Message transport for editor world synchronisation.
//!
//! This crate provides:
//!
//! - [`channel`] — the in-process [`ChannelLink`] the synchroniser talks to.
//! - [`messages`] — the [`Envelope`] wrapper and well-known message kinds.
//! - [`codec`] — JSON text / MessagePack binary framing helpers.
//! - [`connection`] — NATS connection management and the link bridge.
//! - [`subjects`] — NATS subject builders.
//! - [`error`] — Network-layer error types.

pub mod channel;
pub mod codec;
pub mod connection;
pub mod error;
pub mod messages;
pub mod subjects;

pub use channel::{ChannelLink, ChannelMessage, ConnectionStatus, StatusSender};
pub use codec::{Framing, decode, decode_frame, encode, encode_frame};
pub use connection::NatsConnection;
pub use error::NetError;
pub use messages::{COMMAND_KIND, Envelope, SNAPSHOT_KIND};

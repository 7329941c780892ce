//! In-process handle to a bidirectional message channel.
//!
//! A [`ChannelLink`] is what the synchroniser talks to: an outbound sender,
//! an inbound receiver and a connection status watch. Whatever sits on the
//! other side (a NATS bridge, or another link in tests) is invisible to it.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

/// Default capacity of link queues.
pub const DEFAULT_CAPACITY: usize = 256;

/// One frame on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMessage {
    /// A UTF-8 text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

/// Connection state of the transport behind a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not yet connected.
    Connecting,
    /// Frames can be delivered.
    Connected,
    /// The transport is down; sends should be retried later.
    Disconnected,
}

impl ConnectionStatus {
    /// Returns `true` when frames can be delivered.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// Sending side of a link's connection status.
pub type StatusSender = watch::Sender<ConnectionStatus>;

/// One end of a bidirectional message channel.
#[derive(Debug)]
pub struct ChannelLink {
    /// Frames to deliver to the other side.
    pub outbound: mpsc::Sender<ChannelMessage>,
    /// Frames received from the other side.
    pub inbound: mpsc::Receiver<ChannelMessage>,
    /// Current connection status.
    pub status: watch::Receiver<ConnectionStatus>,
}

impl ChannelLink {
    /// Assemble a link from its parts.
    #[must_use]
    pub fn new(
        outbound: mpsc::Sender<ChannelMessage>,
        inbound: mpsc::Receiver<ChannelMessage>,
        status: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            status,
        }
    }

    /// Build two in-memory links wired to each other. Both share one
    /// connection status, which starts as [`ConnectionStatus::Connected`] and
    /// is driven through the returned [`StatusSender`].
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, Self, StatusSender) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let left = Self::new(a_tx, b_rx, status_rx.clone());
        let right = Self::new(b_tx, a_rx, status_rx);
        (left, right, status_tx)
    }

    /// Returns `true` if the transport is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }
}

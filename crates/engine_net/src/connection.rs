//! NATS connection management.
//!
//! Provides a thin wrapper around `async-nats` for connecting to NATS with
//! engine-specific defaults, and a bridge that exposes a NATS subject as a
//! [`ChannelLink`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::channel::{ChannelLink, ChannelMessage, ConnectionStatus, DEFAULT_CAPACITY};
use crate::error::NetError;

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// The environment variable used to override the NATS URL.
pub const NATS_URL_ENV: &str = "NATS_URL";

/// How often a bridged link refreshes its connection status.
const STATUS_POLL: Duration = Duration::from_millis(500);

/// First and longest delay between attempts at publishing one frame.
const PUBLISH_RETRY: Duration = Duration::from_millis(250);
const PUBLISH_RETRY_MAX: Duration = Duration::from_secs(5);

/// A channel frame as published on NATS, tagged with its sender.
#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    origin: String,
    message: ChannelMessage,
}

/// A wrapper around an `async-nats` client with engine-specific helpers.
#[derive(Debug, Clone)]
pub struct NatsConnection {
    /// The underlying NATS client.
    client: async_nats::Client,
}

impl NatsConnection {
    /// Connect to NATS using the URL from the `NATS_URL` environment variable,
    /// falling back to [`DEFAULT_NATS_URL`].
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the connection cannot be established.
    pub async fn connect() -> Result<Self, NetError> {
        let url = std::env::var(NATS_URL_ENV).unwrap_or_else(|_| DEFAULT_NATS_URL.to_string());
        Self::connect_to(&url).await
    }

    /// Connect to NATS at the specified URL.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the connection cannot be established.
    pub async fn connect_to(url: &str) -> Result<Self, NetError> {
        info!(url, "connecting to NATS");
        let client = async_nats::connect(url).await?;
        info!("NATS connection established");
        Ok(Self { client })
    }

    /// Returns a reference to the underlying `async-nats` client.
    #[must_use]
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Current connection status of the client.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        match self.client.connection_state() {
            async_nats::connection::State::Connected => ConnectionStatus::Connected,
            async_nats::connection::State::Disconnected => ConnectionStatus::Disconnected,
            async_nats::connection::State::Pending => ConnectionStatus::Connecting,
        }
    }

    /// Publish a MessagePack-encoded message to a subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if encoding or publishing fails.
    pub async fn publish<T: serde::Serialize>(
        &self,
        subject: &str,
        message: &T,
    ) -> Result<(), NetError> {
        let payload = crate::codec::encode(message)?;
        self.client
            .publish(subject.to_string(), payload.into())
            .await?;
        Ok(())
    }

    /// Subscribe to a subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Subscribe`] if the subscription fails.
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, NetError> {
        let sub = self.client.subscribe(subject.to_string()).await?;
        Ok(sub)
    }

    /// Bridge the world subject for `topic` onto a [`ChannelLink`].
    ///
    /// Frames sent on the link are published tagged with `peer_id`; frames
    /// received from the subject are forwarded to the link unless they carry
    /// `peer_id` themselves. The bridge tasks end when the link is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Subscribe`] if the subscription fails.
    pub async fn open_link(&self, topic: &str, peer_id: &str) -> Result<ChannelLink, NetError> {
        let subject = crate::subjects::world_sync(topic);
        let mut subscriber = self.subscribe(&subject).await?;
        info!(subject, peer_id, "world link open");

        let (out_tx, mut out_rx) = mpsc::channel::<ChannelMessage>(DEFAULT_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(DEFAULT_CAPACITY);
        let (status_tx, status_rx) = watch::channel(self.status());
        let status_tx = Arc::new(status_tx);

        let own = peer_id.to_string();
        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let frame: WireFrame = match crate::codec::decode(&msg.payload) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(%err, "dropping undecodable frame");
                        continue;
                    }
                };
                if frame.origin == own {
                    continue;
                }
                if in_tx.send(frame.message).await.is_err() {
                    break;
                }
            }
            debug!("inbound bridge closed");
        });

        let conn = self.clone();
        let origin = peer_id.to_string();
        let publish_status = Arc::clone(&status_tx);
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let frame = WireFrame {
                    origin: origin.clone(),
                    message,
                };
                let publish = || conn.publish(&subject, &frame);
                if !publish_until_sent(publish, &publish_status, PUBLISH_RETRY).await {
                    break;
                }
            }
            debug!("outbound bridge closed");
        });

        let conn = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATUS_POLL);
            while !status_tx.is_closed() {
                interval.tick().await;
                let next = conn.status();
                status_tx.send_if_modified(|current| {
                    if *current == next {
                        return false;
                    }
                    info!(status = ?next, "connection status changed");
                    *current = next;
                    true
                });
            }
        });

        Ok(ChannelLink::new(out_tx, in_rx, status_rx))
    }
}

/// Publish one frame, retrying with backoff until it goes out. While it
/// fails the link reports [`ConnectionStatus::Disconnected`], which holds
/// back further sends until the status poll sees the client connected again.
/// Returns `false` if the link was dropped before the frame went out.
async fn publish_until_sent<F, Fut>(
    mut publish: F,
    status: &watch::Sender<ConnectionStatus>,
    initial: Duration,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), NetError>>,
{
    let mut delay = initial;
    loop {
        match publish().await {
            Ok(()) => return true,
            Err(err) => {
                if status.is_closed() {
                    debug!(%err, "link dropped, frame abandoned");
                    return false;
                }
                warn!(%err, ?delay, "publish failed, retrying");
                status.send_if_modified(|current| {
                    let changed = *current != ConnectionStatus::Disconnected;
                    *current = ConnectionStatus::Disconnected;
                    changed
                });
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(PUBLISH_RETRY_MAX);
            }
        }
    }
}

//! NATS transport.
//!
//! Requests are published on [`subjects::request`]; responses and host
//! events are received on [`subjects::inbound`]. Useful when the host-side
//! bridge runs on another machine than the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{INBOUND_BUFFER, InboundFrames, Transport};
use crate::error::NetError;
use crate::subjects;

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// The environment variable used to override the NATS URL.
pub const NATS_URL_ENV: &str = "NATS_URL";

/// A bridge connection carried over NATS subjects.
#[derive(Debug)]
pub struct NatsTransport {
    client: async_nats::Client,
    request_subject: String,
    connected: Arc<AtomicBool>,
    forwarder: JoinHandle<()>,
}

impl NatsTransport {
    /// Connect using the URL from the `NATS_URL` environment variable,
    /// falling back to [`DEFAULT_NATS_URL`].
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] or [`NetError::Subscribe`] on failure.
    pub async fn connect(app_id: &str) -> Result<(Self, InboundFrames), NetError> {
        let url = std::env::var(NATS_URL_ENV).unwrap_or_else(|_| DEFAULT_NATS_URL.to_string());
        Self::connect_to(&url, app_id).await
    }

    /// Connect to NATS at the specified URL and subscribe to the inbound
    /// subject for `app_id`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] or [`NetError::Subscribe`] on failure.
    pub async fn connect_to(url: &str, app_id: &str) -> Result<(Self, InboundFrames), NetError> {
        info!(url, app_id, "connecting to NATS");
        let client = async_nats::connect(url).await?;

        let inbound_subject = subjects::inbound(app_id);
        let mut subscriber = client.subscribe(inbound_subject.clone()).await?;
        info!(subject = inbound_subject, "subscribed to host inbound subject");

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let forwarder_connected = Arc::clone(&connected);
        let forwarder = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                if tx.send(message.payload.to_vec()).await.is_err() {
                    break;
                }
            }
            debug!("NATS inbound subscription ended");
            forwarder_connected.store(false, Ordering::SeqCst);
        });

        Ok((
            Self {
                client,
                request_subject: subjects::request(app_id),
                connected,
                forwarder,
            },
            rx,
        ))
    }

    /// The subject requests are published on.
    #[must_use]
    pub fn request_subject(&self) -> &str {
        &self.request_subject
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::Disconnected);
        }
        self.client
            .publish(self.request_subject.clone(), frame.into())
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.flush().await {
            debug!(error = %e, "NATS flush on close failed");
        }
        self.forwarder.abort();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for NatsTransport {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

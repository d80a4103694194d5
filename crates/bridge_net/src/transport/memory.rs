//! In-process transport pair.
//!
//! [`pair`] returns the engine-side [`MemoryTransport`] plus a [`HostEnd`]
//! that plays the host: it sees every request and can answer or push
//! events. Dropping the [`HostEnd`] disconnects the engine side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{INBOUND_BUFFER, InboundFrames, Transport};
use crate::codec;
use crate::error::NetError;
use crate::messages::{HostEvent, Request, Response};

/// Engine side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    connected: Arc<AtomicBool>,
}

/// Host side of an in-memory connection.
#[derive(Debug)]
pub struct HostEnd {
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: mpsc::Sender<Vec<u8>>,
}

/// Create a connected engine/host pair.
#[must_use]
pub fn pair() -> (MemoryTransport, InboundFrames, HostEnd) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::channel(INBOUND_BUFFER);
    let connected = Arc::new(AtomicBool::new(true));
    (
        MemoryTransport {
            outbound: out_tx,
            connected,
        },
        in_rx,
        HostEnd {
            outbound: out_rx,
            inbound: in_tx,
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::Disconnected);
        }
        self.outbound
            .send(frame)
            .map_err(|_| NetError::Disconnected)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

impl HostEnd {
    /// Wait for the next request the engine sends. Returns `None` once the
    /// engine side is gone. Frames that are not requests are skipped.
    pub async fn recv_request(&mut self) -> Option<Request> {
        while let Some(frame) = self.outbound.recv().await {
            if let Ok(request) = codec::decode::<Request>(&frame) {
                return Some(request);
            }
        }
        None
    }

    /// Returns a request that is already queued, without waiting.
    pub fn try_recv_request(&mut self) -> Option<Request> {
        while let Ok(frame) = self.outbound.try_recv() {
            if let Ok(request) = codec::decode::<Request>(&frame) {
                return Some(request);
            }
        }
        None
    }

    /// Answer a request successfully.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Disconnected`] if the engine side is gone.
    pub async fn respond(&self, id: u64, result: Value) -> Result<(), NetError> {
        self.send_frame(codec::encode(&Response::ok(id, result))?).await
    }

    /// Answer a request with an error.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Disconnected`] if the engine side is gone.
    pub async fn respond_error(&self, id: u64, code: i64, message: &str) -> Result<(), NetError> {
        self.send_frame(codec::encode(&Response::err(id, code, message))?)
            .await
    }

    /// Push a host event.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Disconnected`] if the engine side is gone.
    pub async fn notify(&self, event: &HostEvent) -> Result<(), NetError> {
        self.send_frame(codec::encode(&event.to_notification())?)
            .await
    }

    /// Push raw bytes, e.g. a deliberately malformed frame.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Disconnected`] if the engine side is gone.
    pub async fn send_frame(&self, frame: Vec<u8>) -> Result<(), NetError> {
        self.inbound
            .send(frame)
            .await
            .map_err(|_| NetError::Disconnected)
    }

    /// A sender for pushing frames from another task.
    #[must_use]
    pub fn inbound_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.inbound.clone()
    }

    /// Split off the request receiver so a responder task can own it.
    #[must_use]
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Vec<u8>>, mpsc::Sender<Vec<u8>>) {
        (self.outbound, self.inbound)
    }
}

//! Transports carrying frames between the engine and the host.
//!
//! A transport is split in two: the [`Transport`] handle sends frames, and
//! the [`InboundFrames`] receiver returned alongside it yields every frame
//! the host sends. The receiver closing means the peer is gone.

pub mod memory;
pub mod nats;
pub mod tcp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::NetError;

pub use memory::{HostEnd, MemoryTransport};
pub use nats::NatsTransport;
pub use tcp::TcpTransport;

/// Capacity of the inbound frame channel.
pub const INBOUND_BUFFER: usize = 256;

/// Frames received from the host, in arrival order.
pub type InboundFrames = mpsc::Receiver<Vec<u8>>;

/// The sending half of a connection to the host.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send one encoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Disconnected`] once the peer is gone, or the
    /// underlying I/O / NATS error.
    async fn send(&self, frame: Vec<u8>) -> Result<(), NetError>;

    /// Close the connection. Further sends fail.
    async fn close(&self);

    /// Returns `false` once the connection is known to be gone.
    fn is_connected(&self) -> bool;
}

//! The RPC bridge to the host application's scripting runtime.
//!
//! [`Bridge`] turns the asynchronous transport into awaitable calls:
//!
//! 1. [`RpcCall::call`] allocates the next request id, parks a oneshot waiter
//!    in the pending table and sends the request.
//! 2. The reader task ([`Bridge::spawn_reader`]) decodes every inbound frame.
//!    Responses complete the matching waiter; notifications are queued as
//!    [`EngineEvent::Host`] for the engine's dispatch loop.
//! 3. The caller resumes when its response arrives or the call deadline
//!    elapses, whichever comes first.
//!
//! Request ids are strictly increasing for the lifetime of a bridge and are
//! never reused. A response whose id is not pending is dropped without
//! touching the table.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bridge_net::codec;
use bridge_net::{HostEvent, Inbound, InboundFrames, Request, RpcError, Transport};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::BridgeError;
use crate::events::{EngineEvent, EventSender};

/// Remote method used by the heartbeat probe.
pub const PING_METHOD: &str = "ping";

// ── Capabilities ────────────────────────────────────────────────────────────

/// Something that can issue remote calls.
#[async_trait]
pub trait RpcCall: Send + Sync {
    /// Call `method` with positional `params` and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] on transport failure, remote error or
    /// timeout.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, BridgeError>;
}

/// Something the heartbeat can probe for liveness.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Succeeds if the peer answered.
    ///
    /// # Errors
    ///
    /// Returns the failure that made the probe unsuccessful.
    async fn ping(&self) -> Result<(), BridgeError>;
}

// ── Bridge ──────────────────────────────────────────────────────────────────

type Waiter = oneshot::Sender<Result<Value, RpcError>>;

/// What [`Bridge::handle_frame`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// A pending call received its response.
    Delivered,
    /// A host event was queued for the dispatch loop.
    Queued,
    /// The frame was malformed, unrecognised or answered an unknown id.
    Dropped,
}

/// An RPC connection to the host.
pub struct Bridge {
    transport: Arc<dyn Transport>,
    last_id: AtomicU64,
    pending: DashMap<u64, Waiter>,
    events: EventSender,
    call_timeout: Duration,
    network_debug: bool,
    disconnected: AtomicBool,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("transport", &self.transport)
            .field("last_id", &self.last_id)
            .field("pending", &self.pending.len())
            .field("call_timeout", &self.call_timeout)
            .field("network_debug", &self.network_debug)
            .field("disconnected", &self.disconnected)
            .finish()
    }
}

/// Removes a pending entry when the call finishes or is cancelled.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, Waiter>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl Bridge {
    /// Create a bridge over `transport`. Host events are forwarded to
    /// `events`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        events: EventSender,
        call_timeout: Duration,
        network_debug: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            last_id: AtomicU64::new(0),
            pending: DashMap::new(),
            events,
            call_timeout,
            network_debug,
            disconnected: AtomicBool::new(false),
        })
    }

    /// Start the task that consumes inbound frames. When the frame stream
    /// ends the bridge is marked disconnected and every pending call fails.
    pub fn spawn_reader(self: &Arc<Self>, mut inbound: InboundFrames) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                bridge.handle_frame(&frame);
            }
            info!("host bridge inbound stream closed");
            bridge.mark_disconnected();
        })
    }

    /// Build the next request payload, consuming a fresh id.
    #[must_use]
    pub fn next_request(&self, method: &str, params: Vec<Value>) -> Request {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        Request::new(id, method, params)
    }

    /// The most recently issued request id (0 before the first request).
    #[must_use]
    pub fn last_id(&self) -> u64 {
        self.last_id.load(Ordering::SeqCst)
    }

    /// Number of calls waiting for a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if a call with `id` is waiting for its response.
    #[must_use]
    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    /// Whether network traffic is logged at debug level.
    #[must_use]
    pub fn network_debug(&self) -> bool {
        self.network_debug
    }

    /// Returns `false` once the transport is gone.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    /// Decode and route one inbound frame.
    pub fn handle_frame(&self, frame: &[u8]) -> FrameDisposition {
        match codec::decode_inbound(frame) {
            Ok(Inbound::Response(response)) => {
                let id = response.id;
                let Some((_, waiter)) = self.pending.remove(&id) else {
                    debug!(id, "dropping response for unknown request id");
                    return FrameDisposition::Dropped;
                };
                if self.network_debug {
                    debug!(id, "response received");
                }
                if waiter.send(response.into_result()).is_err() {
                    debug!(id, "caller stopped waiting before the response arrived");
                }
                FrameDisposition::Delivered
            }
            Ok(Inbound::Notification(notification)) => {
                match HostEvent::from_notification(&notification) {
                    Ok(event) => {
                        if self.network_debug {
                            debug!(method = %notification.method, "host event received");
                        }
                        if self.events.send(EngineEvent::Host(event)).is_err() {
                            debug!("event queue closed; dropping host event");
                            return FrameDisposition::Dropped;
                        }
                        FrameDisposition::Queued
                    }
                    Err(e) => {
                        debug!(error = %e, "dropping unrecognised host notification");
                        FrameDisposition::Dropped
                    }
                }
            }
            Err(e) => {
                if self.network_debug {
                    debug!(error = %e, "dropping malformed frame");
                }
                FrameDisposition::Dropped
            }
        }
    }

    /// Close the transport and fail every pending call.
    pub async fn disconnect(&self) {
        info!("disconnecting from host bridge");
        self.transport.close().await;
        self.mark_disconnected();
    }

    /// Register a waiter for `id`. The disconnect flag is checked again once
    /// the waiter is in the table, so a concurrent
    /// [`mark_disconnected`](Self::mark_disconnected) cannot strand it.
    fn park_waiter(
        &self,
        id: u64,
    ) -> Result<(oneshot::Receiver<Result<Value, RpcError>>, PendingGuard<'_>), BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BridgeError::Disconnected);
        }
        Ok((rx, guard))
    }

    fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        // Dropping the waiters wakes every caller with a closed channel.
        self.pending.clear();
    }
}

#[async_trait]
impl RpcCall for Bridge {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, BridgeError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BridgeError::Disconnected);
        }

        let request = self.next_request(method, params);
        let id = request.id;
        let frame = codec::encode(&request)?;

        let (rx, _guard) = self.park_waiter(id)?;

        if self.network_debug {
            debug!(id, method, "sending request");
        } else {
            trace!(id, method, "sending request");
        }
        self.transport.send(frame).await?;

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(BridgeError::Remote {
                method: method.to_string(),
                error,
            }),
            Ok(Err(_)) => Err(BridgeError::Disconnected),
            Err(_) => {
                warn!(id, method, timeout = ?self.call_timeout, "remote call timed out");
                Err(BridgeError::Timeout {
                    method: method.to_string(),
                    id,
                    timeout: self.call_timeout,
                })
            }
        }
    }
}

#[async_trait]
impl Probe for Bridge {
    async fn ping(&self) -> Result<(), BridgeError> {
        self.call(PING_METHOD, Vec::new()).await.map(|_| ())
    }
}

//! # bridge_net
//!
//! Wire layer for the host application bridge.
//!
//! This crate provides:
//!
//! - [`messages`]: JSON-RPC request/response/notification types and the
//!   typed [`HostEvent`]s the host pushes to the engine.
//! - [`codec`]: JSON encoding and inbound frame classification.
//! - [`subjects`]: NATS subject builders for the NATS transport.
//! - [`transport`]: the [`Transport`] trait with TCP, NATS and in-memory
//!   implementations.
//! - [`error`]: Network-layer error types.

pub mod codec;
pub mod error;
pub mod messages;
pub mod subjects;
pub mod transport;

pub use codec::{decode, decode_inbound, encode};
pub use error::NetError;
pub use messages::{HostEvent, Inbound, Notification, Request, Response, RpcError};
pub use transport::{InboundFrames, Transport};

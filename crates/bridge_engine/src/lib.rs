//! # bridge_engine
//!
//! Pipeline engine core for a host application driven over an RPC bridge.
//!
//! This crate provides:
//!
//! - [`bridge`]: request/response correlation over a [`bridge_net`]
//!   transport, plus the [`RpcCall`] and [`Probe`] capabilities.
//! - [`remote`]: proxies for host-side objects.
//! - [`heartbeat`]: the liveness supervisor.
//! - [`engine`]: the orchestrator and its run loop.
//! - [`context`], [`cache`], [`settings`]: pipeline context, resolution and
//!   persistence.
//! - [`commands`], [`panel`], [`display`], [`worker`]: what the host panel
//!   shows and the background queries behind it.
//! - [`hooks`]: user-overridable behaviour.
//! - [`project`]: importing, comps and rendering in the open project.
//! - [`logging`]: log forwarding in both directions.

pub mod bridge;
pub mod cache;
pub mod commands;
pub mod config;
pub mod context;
pub mod display;
pub mod engine;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod hooks;
pub mod logging;
pub mod panel;
pub mod project;
pub mod remote;
pub mod sequence;
pub mod settings;
pub mod switch;
pub mod worker;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, Probe, RpcCall};
pub use config::EngineConfig;
pub use context::{Context, ContextResolver, EntityRef, PrefixResolver};
pub use engine::{Engine, EngineExit, HostConnection};
pub use error::{BridgeError, EngineError};
pub use heartbeat::{Heartbeat, HeartbeatConfig, TickOutcome};
pub use logging::HostLogLayer;
pub use settings::{FileSettingsStore, SettingsStore};

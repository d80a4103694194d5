//! # bridge_app: engine process
//!
//! Connects to a host application's bridge and keeps the pipeline engine in
//! step with it until the host goes away.
//!
//! ## Startup Sequence
//!
//! 1. Initialise logging (stderr plus forwarding to the host panel).
//! 2. Connect over TCP (`HOSTBRIDGE_PORT`) or NATS.
//! 3. Restore the context exported by a previous engine, if any.
//! 4. Push the initial panel state and prime the context cache.
//! 5. Run the heartbeat loop until Ctrl-C or the host stops answering.

mod cli;
mod roots;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use bridge_engine::config::CONTEXT_ENV;
use bridge_engine::logging::forward_logs;
use bridge_engine::{
    Bridge, Context, ContextResolver, Engine, EngineConfig, EngineExit, FileSettingsStore,
    HostConnection, HostLogLayer, PrefixResolver, events,
};
use bridge_net::transport::{NatsTransport, TcpTransport};
use bridge_net::{InboundFrames, Transport};
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise structured logging.
    let (host_logs, log_lines) = HostLogLayer::channel();
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("bridge_app=info".parse()?)
                .add_directive("bridge_engine=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(host_logs.with_min_level(Level::INFO))
        .init();

    let args = Args::parse();
    let config = args.apply(EngineConfig::from_env()?);
    info!(app_id = %config.app_id, "bridge engine starting");

    let (transport, inbound) = connect(&args, &config).await?;
    let (events_tx, events) = events::channel();
    let bridge = Bridge::new(
        transport,
        events_tx.clone(),
        config.call_timeout,
        config.network_debug,
    );
    let reader = bridge.spawn_reader(inbound);
    info!("connected to host");

    let resolver: Arc<dyn ContextResolver> = match &args.roots {
        Some(path) => Arc::new(roots::load_roots(path)?),
        None => Arc::new(PrefixResolver::new()),
    };
    let settings_root = config
        .settings_root
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("hostbridge"));
    let settings = Arc::new(FileSettingsStore::new(settings_root));

    let connection = HostConnection::from_bridge(&bridge, events_tx, events);
    let mut engine =
        Engine::new(config, connection, resolver, settings).with_context(initial_context());
    let forwarder = forward_logs(log_lines, engine.panel().clone());

    engine
        .post_app_init()
        .await
        .context("failed to initialise the host panel")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let exit = engine.run(shutdown_rx).await;
    engine.shutdown().await;
    bridge.disconnect().await;
    reader.abort();
    forwarder.abort();

    match exit {
        EngineExit::Shutdown => {
            info!("bridge engine shut down");
            Ok(())
        }
        EngineExit::ConnectionLost => anyhow::bail!("lost the connection to the host"),
    }
}

async fn connect(
    args: &Args,
    config: &EngineConfig,
) -> Result<(Arc<dyn Transport>, InboundFrames)> {
    if args.nats {
        info!(url = %args.nats_url, "connecting to NATS");
        let (transport, inbound) = NatsTransport::connect_to(&args.nats_url, &config.app_id).await?;
        return Ok((Arc::new(transport), inbound));
    }
    let port = config
        .port
        .context("a bridge port is required: pass --port or set HOSTBRIDGE_PORT")?;
    let (transport, inbound) = TcpTransport::connect(&args.host, port).await?;
    Ok((Arc::new(transport), inbound))
}

/// The context a previous engine exported into the environment.
fn initial_context() -> Context {
    let Ok(serialized) = std::env::var(CONTEXT_ENV) else {
        return Context::default();
    };
    if serialized.trim().is_empty() {
        return Context::default();
    }
    Context::from_json(&serialized).unwrap_or_else(|e| {
        warn!(error = %e, "ignoring malformed {CONTEXT_ENV}");
        Context::default()
    })
}

//! Log forwarding between the engine and the host.
//!
//! [`HostLogLayer`] captures engine log events and queues them for the host
//! panel's console; [`forward_logs`] drains that queue through
//! `log_message`. In the other direction, [`emit_host_log`] re-emits lines
//! the host sends as `logging` events.

use std::fmt::Write as _;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::panel::HostPanel;

/// Target used for log lines that originate in the host.
pub const HOST_LOG_TARGET: &str = "host";

/// Targets never forwarded, since forwarding itself logs through them.
const SKIPPED_TARGETS: &[&str] = &[
    HOST_LOG_TARGET,
    "bridge_net",
    "bridge_engine::bridge",
    "bridge_engine::logging",
];

/// A captured engine log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
}

/// Host-side name for a tracing level.
#[must_use]
pub fn js_level(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG | Level::TRACE => "debug",
    }
}

/// A tracing layer that queues engine events for the host.
#[derive(Debug)]
pub struct HostLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
    min_level: Level,
}

impl HostLogLayer {
    /// Create the layer and the queue it feeds.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                min_level: Level::DEBUG,
            },
            rx,
        )
    }

    /// Set minimum level to forward.
    #[must_use]
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

/// Collects the message and any extra fields of an event.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for HostLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.min_level {
            return;
        }
        let target = metadata.target();
        if SKIPPED_TARGETS.iter().any(|skip| target.starts_with(skip)) {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let _ = self.tx.send(LogLine {
            level: *metadata.level(),
            message: format!("{}{}", visitor.message, visitor.fields),
        });
    }
}

/// Send queued log lines to the host panel until the queue closes.
pub fn forward_logs(mut rx: mpsc::UnboundedReceiver<LogLine>, panel: HostPanel) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = panel.log_message(js_level(line.level), &line.message).await {
                tracing::debug!(error = %e, "could not forward log line to host");
            }
        }
    })
}

/// Re-emit a log line received from the host.
pub fn emit_host_log(level: &str, message: &str) {
    match level.to_ascii_lowercase().as_str() {
        "error" => tracing::error!(target: "host", origin = "host", "{message}"),
        "warn" | "warning" => tracing::warn!(target: "host", origin = "host", "{message}"),
        "debug" => tracing::debug!(target: "host", origin = "host", "{message}"),
        _ => tracing::info!(target: "host", origin = "host", "{message}"),
    }
}

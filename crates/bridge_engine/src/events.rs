//! The engine's inbound event channel.
//!
//! Host notifications (from the bridge reader) and worker results (from the
//! data retriever) are funnelled into one unbounded channel. The engine's run
//! loop drains it after every healthy heartbeat, so the heartbeat interval
//! bounds event-delivery latency.

use bridge_net::HostEvent;
use tokio::sync::mpsc;

use crate::worker::WorkerEvent;

/// Anything the engine's dispatch loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// An event pushed by the host application.
    Host(HostEvent),
    /// A background query finished.
    Worker(WorkerEvent),
}

/// Producer side of the event channel. Cheap to clone.
pub type EventSender = mpsc::UnboundedSender<EngineEvent>;

/// Consumer side of the event channel, owned by the engine.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

/// Create a connected sender/queue pair.
#[must_use]
pub fn channel() -> (EventSender, EventQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, EventQueue { rx })
}

impl EventQueue {
    /// Take every event queued so far, in arrival order, without waiting.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the next event. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }
}

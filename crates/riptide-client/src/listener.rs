//! Listener registration and fan-out delivery.
//!
//! Each registered listener owns an unbounded queue drained by its own
//! forwarder task, so a listener that blocks in a callback delays only
//! its own event stream, never the subscribe loop or other listeners.
//! Within one listener's stream, delivery order matches arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::event::{
    ActionEvent, ConnectionStatus, ErrorEvent, MessageEvent, ObjectEvent, PresenceEvent,
    StreamEvent,
};

/// Caller-supplied event sink.
///
/// All callbacks default to no-ops so implementations override only the
/// capabilities they care about. Callbacks run on the listener's own
/// forwarder task; blocking in one stalls only that listener's queue.
pub trait EventListener: Send + Sync + 'static {
    /// A connection-health transition occurred.
    fn on_status(&self, _status: ConnectionStatus) {}

    /// A message arrived on a subscribed channel.
    fn on_message(&self, _event: &MessageEvent) {}

    /// A signal arrived on a subscribed channel.
    fn on_signal(&self, _event: &MessageEvent) {}

    /// A presence transition was reported for a presence-enabled channel.
    fn on_presence(&self, _event: &PresenceEvent) {}

    /// An object (metadata) update was announced.
    fn on_object(&self, _event: &ObjectEvent) {}

    /// A message action was announced.
    fn on_message_action(&self, _event: &ActionEvent) {}

    /// A non-fatal failure occurred (decode failure, heartbeat failure).
    fn on_error(&self, _event: &ErrorEvent) {}
}

/// Handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// One unit of work on a listener's queue.
#[derive(Debug, Clone)]
pub(crate) enum Delivery {
    /// A decoded stream event.
    Event(StreamEvent),
    /// A connection-status transition.
    Status(ConnectionStatus),
    /// A surfaced non-fatal failure.
    Error(ErrorEvent),
}

struct ListenerEntry {
    id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
    task: JoinHandle<()>,
}

/// Registry of listeners with per-listener delivery queues.
pub(crate) struct ListenerRegistry {
    entries: Mutex<Vec<ListenerEntry>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a listener and spawns its forwarder task.
    pub fn add(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

        let task = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                match delivery {
                    Delivery::Status(status) => listener.on_status(status),
                    Delivery::Error(event) => listener.on_error(&event),
                    Delivery::Event(StreamEvent::Message(event)) => listener.on_message(&event),
                    Delivery::Event(StreamEvent::Signal(event)) => listener.on_signal(&event),
                    Delivery::Event(StreamEvent::Presence(event)) => listener.on_presence(&event),
                    Delivery::Event(StreamEvent::Object(event)) => listener.on_object(&event),
                    Delivery::Event(StreamEvent::Action(event)) => {
                        listener.on_message_action(&event);
                    }
                }
            }
        });

        self.entries.lock().push(ListenerEntry { id, tx, task });
        debug!(listener = id, "listener registered");
        ListenerId(id)
    }

    /// Removes a listener. Nothing new is enqueued for it; deliveries
    /// already on its queue drain, then its forwarder exits.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|e| e.id == id.0) {
            let entry = entries.remove(pos);
            drop(entry.tx);
            debug!(listener = id.0, "listener removed");
            true
        } else {
            false
        }
    }

    /// Enqueues a delivery for every registered listener.
    pub fn broadcast(&self, delivery: &Delivery) {
        let entries = self.entries.lock();
        for entry in entries.iter() {
            // A closed queue means the forwarder died; skip it.
            let _ = entry.tx.send(delivery.clone());
        }
    }

    /// Number of registered listeners.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Tears down all listeners. Forwarder tasks are aborted at their
    /// next await point, so no callback fires after this returns.
    pub fn shutdown(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for entry in entries {
            entry.task.abort();
        }
    }
}

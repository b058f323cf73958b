//! Event classification and fan-out.
//!
//! The dispatcher sits between the subscribe loop and the listener
//! registry: it runs each raw event through the injected codec and
//! enqueues the result on every listener's queue, in arrival order.
//! A decode failure is surfaced as an error delivery and never drops
//! the remaining events of the batch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::event::{ConnectionStatus, ErrorEvent, EventCodec, RawEvent};
use crate::listener::{Delivery, ListenerRegistry};
use crate::metrics::ClientMetrics;

/// Classifies, decodes, and fans out events and statuses.
pub(crate) struct Dispatcher {
    codec: Arc<dyn EventCodec>,
    listeners: Arc<ListenerRegistry>,
    metrics: Arc<ClientMetrics>,
}

impl Dispatcher {
    pub fn new(
        codec: Arc<dyn EventCodec>,
        listeners: Arc<ListenerRegistry>,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            codec,
            listeners,
            metrics,
        }
    }

    /// Dispatches one poll response's events in response order.
    pub fn dispatch_batch(&self, events: Vec<RawEvent>) {
        for raw in events {
            match self.codec.decode(&raw) {
                Ok(event) => {
                    self.metrics.record_event();
                    self.listeners.broadcast(&Delivery::Event(event));
                }
                Err(err) => {
                    self.metrics.record_decode_error();
                    warn!(channel = %err.channel, error = %err, "failed to decode event");
                    self.listeners.broadcast(&Delivery::Error(ErrorEvent {
                        channel: Some(err.channel),
                        message: err.message,
                    }));
                }
            }
        }
    }

    /// Broadcasts a connection-status transition.
    pub fn dispatch_status(&self, status: ConnectionStatus) {
        info!(?status, "connection status changed");
        self.listeners.broadcast(&Delivery::Status(status));
    }

    /// Broadcasts a non-fatal failure.
    pub fn dispatch_error(&self, event: ErrorEvent) {
        debug!(message = %event.message, "surfacing error to listeners");
        self.listeners.broadcast(&Delivery::Error(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering as AtomicOrdering;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::event::{JsonCodec, MessageEvent, MessageKind};
    use crate::listener::EventListener;

    #[derive(Default)]
    struct Recorder {
        order: Mutex<Vec<String>>,
        errors: std::sync::atomic::AtomicUsize,
    }

    impl EventListener for Recorder {
        fn on_message(&self, event: &MessageEvent) {
            self.order
                .lock()
                .push(event.payload.as_str().unwrap_or("?").to_string());
        }
        fn on_error(&self, _event: &ErrorEvent) {
            self.errors.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    fn raw(payload: serde_json::Value, kind: MessageKind, channel: &str) -> RawEvent {
        RawEvent {
            channel: channel.into(),
            subscription: None,
            timetoken: 1,
            publisher: None,
            kind,
            payload,
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<Recorder>, Arc<ClientMetrics>) {
        let listeners = Arc::new(ListenerRegistry::new());
        let recorder = Arc::new(Recorder::default());
        listeners.add(recorder.clone());
        let metrics = Arc::new(ClientMetrics::new());
        let d = Dispatcher::new(Arc::new(JsonCodec), listeners, Arc::clone(&metrics));
        (d, recorder, metrics)
    }

    #[tokio::test]
    async fn test_batch_dispatched_in_response_order() {
        let (d, recorder, _) = dispatcher();
        d.dispatch_batch(vec![
            raw(json!("e1"), MessageKind::Message, "ch"),
            raw(json!("e2"), MessageKind::Message, "ch"),
            raw(json!("e3"), MessageKind::Message, "ch"),
        ]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*recorder.order.lock(), vec!["e1", "e2", "e3"]);
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_drop_batch() {
        let (d, recorder, metrics) = dispatcher();
        d.dispatch_batch(vec![
            raw(json!("before"), MessageKind::Message, "ch"),
            // Garbage presence payload: classification says presence,
            // decode fails.
            raw(json!(17), MessageKind::Presence, "ch-pnpres"),
            raw(json!("after"), MessageKind::Message, "ch"),
        ]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*recorder.order.lock(), vec!["before", "after"]);
        assert_eq!(recorder.errors.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(metrics.snapshot().decode_errors, 1);
        assert_eq!(metrics.snapshot().events_dispatched, 2);
    }
}

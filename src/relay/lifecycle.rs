//! Connection lifecycle handling
//!
//! Drives the per-client state machine (connected, then closed) from
//! transport events. Each event updates the registry, fans out where
//! needed, and reports to the event sink.

use std::fmt::Display;
use std::sync::Arc;

use tracing::debug;

use super::{
    Broadcaster, Channel, ClientId, DeliveryReport, EventSink, Identity, Registry, RelayEvent,
};

/// Orchestrates connect/message/close/error events for all connections
pub struct ConnectionLifecycle {
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    sink: Arc<dyn EventSink>,
    /// Unregister recipients whose delivery failed during a relayed message
    evict_on_send_failure: bool,
}

impl ConnectionLifecycle {
    /// Create a lifecycle handler with a fresh registry
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_registry(Arc::new(Registry::new()), sink)
    }

    /// Create a lifecycle handler over an existing registry
    pub fn with_registry(registry: Arc<Registry>, sink: Arc<dyn EventSink>) -> Self {
        let broadcaster = Broadcaster::new(Arc::clone(&registry), Arc::clone(&sink));
        Self {
            registry,
            broadcaster,
            sink,
            evict_on_send_failure: false,
        }
    }

    /// Enable or disable eviction of clients whose delivery fails
    pub fn with_eviction(mut self, evict_on_send_failure: bool) -> Self {
        self.evict_on_send_failure = evict_on_send_failure;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Handle a new connection, assigning it a fresh identifier
    pub async fn on_connect(&self, channel: Arc<dyn Channel>) -> ClientId {
        let id = ClientId::generate();
        self.on_connect_as(id.clone(), channel).await;
        id
    }

    /// Handle a new connection whose identifier was assigned by the transport
    pub async fn on_connect_as(&self, id: ClientId, channel: Arc<dyn Channel>) {
        let identity = Identity::new(id.clone());
        self.registry.register(id.clone(), channel, identity).await;
        self.sink.report(&RelayEvent::connected(id));
    }

    /// Handle an inbound message: relay it to every other client
    pub async fn on_message(&self, id: &ClientId, payload: &str) -> DeliveryReport {
        self.registry.touch(id).await;

        let report = self.broadcaster.send_to_all_except(payload, id).await;
        if self.evict_on_send_failure {
            self.evict_failed(&report).await;
        }

        self.sink.report(&RelayEvent::message(id.clone(), payload));
        report
    }

    /// Handle a clean close. Safe to call more than once.
    pub async fn on_close(&self, id: &ClientId) {
        self.registry.unregister(id).await;
        self.sink.report(&RelayEvent::disconnected(id.clone()));
    }

    /// Handle a transport failure. Cleans up exactly like a close.
    pub async fn on_error(&self, id: &ClientId, cause: impl Display) {
        self.registry.unregister(id).await;
        self.sink.report(&RelayEvent::error(id.clone(), cause.to_string()));
    }

    async fn evict_failed(&self, report: &DeliveryReport) {
        for (id, cause) in &report.failed {
            if self.registry.unregister(id).await.is_some() {
                debug!("Evicting {} after failed delivery", id);
                self.sink
                    .report(&RelayEvent::error(id.clone(), format!("evicted: {}", cause)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::{RecordingChannel, RecordingSink};
    use crate::relay::EventKind;

    fn lifecycle() -> (ConnectionLifecycle, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (ConnectionLifecycle::new(sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_conversation_between_two_clients() {
        let (relay, sink) = lifecycle();
        let a = ClientId::from("A");
        let b = ClientId::from("B");
        let a_channel = RecordingChannel::new();
        let b_channel = RecordingChannel::new();

        relay.on_connect_as(a.clone(), a_channel.clone()).await;
        relay.on_connect_as(b.clone(), b_channel.clone()).await;

        relay.on_message(&a, "hello").await;
        assert_eq!(b_channel.received(), vec!["hello".to_string()]);
        assert!(a_channel.received().is_empty());

        relay.on_close(&b).await;

        let report = relay.on_message(&a, "ping").await;
        assert_eq!(report, DeliveryReport::default());
        assert!(a_channel.received().is_empty());
        assert_eq!(b_channel.received(), vec!["hello".to_string()]);

        let kinds: Vec<EventKind> = sink.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Connected,
                EventKind::Connected,
                EventKind::Message,
                EventKind::Disconnected,
                EventKind::Message,
            ]
        );
    }

    #[tokio::test]
    async fn test_on_connect_assigns_unique_ids() {
        let (relay, _sink) = lifecycle();
        let first = relay.on_connect(RecordingChannel::new()).await;
        let second = relay.on_connect(RecordingChannel::new()).await;

        assert_ne!(first, second);
        assert_eq!(relay.registry().len().await, 2);
        let state = relay.registry().get(&first).await.unwrap();
        assert_eq!(state.identity.id, first);
        assert!(state.identity.display_name.is_empty());
    }

    #[tokio::test]
    async fn test_message_event_carries_sender_and_payload() {
        let (relay, sink) = lifecycle();
        let a = ClientId::from("A");
        relay.on_connect_as(a.clone(), RecordingChannel::new()).await;

        relay.on_message(&a, "payload").await;

        let events = sink.events();
        let message = events.last().unwrap();
        assert_eq!(message.kind, EventKind::Message);
        assert_eq!(message.client_id, a);
        assert_eq!(message.detail, "payload");
    }

    #[tokio::test]
    async fn test_close_then_error_is_idempotent() {
        let (relay, sink) = lifecycle();
        let a = ClientId::from("A");
        relay.on_connect_as(a.clone(), RecordingChannel::new()).await;

        relay.on_close(&a).await;
        relay.on_error(&a, "connection reset").await;

        assert!(relay.registry().is_empty().await);
        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].kind, EventKind::Error);
        assert_eq!(events[2].detail, "connection reset");
    }

    #[tokio::test]
    async fn test_error_unregisters() {
        let (relay, _sink) = lifecycle();
        let a = ClientId::from("A");
        let b = ClientId::from("B");
        let b_channel = RecordingChannel::new();
        relay.on_connect_as(a.clone(), RecordingChannel::new()).await;
        relay.on_connect_as(b.clone(), b_channel.clone()).await;

        relay.on_error(&b, "broken pipe").await;
        relay.on_message(&a, "after").await;

        assert!(!relay.registry().contains(&b).await);
        assert!(b_channel.received().is_empty());
    }

    #[tokio::test]
    async fn test_message_from_unregistered_sender_still_relays() {
        let (relay, _sink) = lifecycle();
        let b_channel = RecordingChannel::new();
        relay
            .on_connect_as(ClientId::from("B"), b_channel.clone())
            .await;

        relay.on_message(&ClientId::from("gone"), "late").await;

        assert_eq!(b_channel.received(), vec!["late".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_recipient_kept_by_default() {
        let (relay, _sink) = lifecycle();
        let a = ClientId::from("A");
        let broken = ClientId::from("broken");
        relay.on_connect_as(a.clone(), RecordingChannel::new()).await;
        relay
            .on_connect_as(broken.clone(), RecordingChannel::failing())
            .await;

        let report = relay.on_message(&a, "hi").await;

        assert_eq!(report.failed_count(), 1);
        assert!(relay.registry().contains(&broken).await);
    }

    #[tokio::test]
    async fn test_failed_recipient_evicted_when_enabled() {
        let sink = Arc::new(RecordingSink::default());
        let relay = ConnectionLifecycle::new(sink.clone()).with_eviction(true);
        let a = ClientId::from("A");
        let broken = ClientId::from("broken");
        let healthy = RecordingChannel::new();
        relay.on_connect_as(a.clone(), RecordingChannel::new()).await;
        relay
            .on_connect_as(broken.clone(), RecordingChannel::failing())
            .await;
        relay
            .on_connect_as(ClientId::from("healthy"), healthy.clone())
            .await;

        relay.on_message(&a, "hi").await;

        assert!(!relay.registry().contains(&broken).await);
        assert_eq!(relay.registry().len().await, 2);
        assert_eq!(healthy.received(), vec!["hi".to_string()]);

        let evictions: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::Error)
            .collect();
        assert_eq!(evictions.len(), 1);
        assert_eq!(evictions[0].client_id, broken);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connections_leave_registry_empty() {
        let sink = Arc::new(RecordingSink::default());
        let relay = Arc::new(ConnectionLifecycle::new(sink));

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let relay = Arc::clone(&relay);
                tokio::spawn(async move {
                    let id = ClientId::new(format!("conn-{}", i));
                    relay.on_connect_as(id.clone(), RecordingChannel::new()).await;
                    relay.on_message(&id, "chatter").await;
                    if i % 2 == 0 {
                        relay.on_close(&id).await;
                    } else {
                        relay.on_error(&id, "dropped").await;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(relay.registry().is_empty().await);
    }
}

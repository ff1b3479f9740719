//! Message fan-out
//!
//! Delivers a message to all clients, all clients but one, or a single client.
//! Broadcasts work from a registry snapshot and never hold the registry lock
//! while sending. A failing recipient is reported and skipped; it is not
//! unregistered here.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::{ChannelError, ClientId, EventSink, Registry, RelayEvent};

/// Errors that can occur during a targeted send
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("Unknown recipient: {0}")]
    UnknownRecipient(ClientId),

    #[error("Delivery to {id} failed: {source}")]
    Delivery {
        id: ClientId,
        #[source]
        source: ChannelError,
    },
}

/// Result type for broadcaster operations
pub type BroadcastResult<T> = Result<T, BroadcastError>;

/// Outcome of a fan-out
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients that accepted the message
    pub delivered: Vec<ClientId>,
    /// Recipients whose channel failed
    pub failed: Vec<(ClientId, ChannelError)>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fans messages out to registered clients
pub struct Broadcaster {
    registry: Arc<Registry>,
    sink: Arc<dyn EventSink>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, sink: Arc<dyn EventSink>) -> Self {
        Self { registry, sink }
    }

    /// Send a message to every connected client
    pub async fn send_to_all(&self, message: &str) -> DeliveryReport {
        self.fan_out(message, None).await
    }

    /// Send a message to every connected client except `excluded`
    pub async fn send_to_all_except(&self, message: &str, excluded: &ClientId) -> DeliveryReport {
        self.fan_out(message, Some(excluded)).await
    }

    /// Send a message to a single client
    ///
    /// Unlike the broadcast variants, a delivery failure is returned to the
    /// caller instead of being reported to the event sink.
    pub async fn send_to_one(&self, message: &str, id: &ClientId) -> BroadcastResult<()> {
        let state = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| BroadcastError::UnknownRecipient(id.clone()))?;

        state
            .channel
            .send(message)
            .map_err(|source| BroadcastError::Delivery {
                id: id.clone(),
                source,
            })
    }

    async fn fan_out(&self, message: &str, excluded: Option<&ClientId>) -> DeliveryReport {
        let recipients = self.registry.snapshot().await;
        let mut report = DeliveryReport::default();

        for (id, state) in recipients {
            if excluded == Some(&id) {
                continue;
            }

            match state.channel.send(message) {
                Ok(()) => report.delivered.push(id),
                Err(e) => {
                    self.sink
                        .report(&RelayEvent::delivery_failed(id.clone(), e.to_string()));
                    report.failed.push((id, e));
                }
            }
        }

        debug!(
            "Fan-out complete: {} delivered, {} failed",
            report.delivered_count(),
            report.failed_count()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::{RecordingChannel, RecordingSink};
    use crate::relay::{EventKind, Identity};

    struct Fixture {
        registry: Arc<Registry>,
        sink: Arc<RecordingSink>,
        broadcaster: Broadcaster,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(Registry::new());
        let sink = Arc::new(RecordingSink::default());
        let broadcaster = Broadcaster::new(Arc::clone(&registry), sink.clone());
        Fixture {
            registry,
            sink,
            broadcaster,
        }
    }

    async fn connect(registry: &Registry, id: &str, channel: Arc<RecordingChannel>) {
        let id = ClientId::from(id);
        registry.register(id.clone(), channel, Identity::new(id)).await;
    }

    #[tokio::test]
    async fn test_send_to_all_except_skips_sender() {
        let f = fixture();
        let channels: Vec<_> = (0..5).map(|_| RecordingChannel::new()).collect();
        for (i, channel) in channels.iter().enumerate() {
            connect(&f.registry, &format!("c{}", i), channel.clone()).await;
        }

        let report = f
            .broadcaster
            .send_to_all_except("msg", &ClientId::from("c2"))
            .await;

        assert_eq!(report.delivered_count(), 4);
        assert!(report.is_clean());
        for (i, channel) in channels.iter().enumerate() {
            if i == 2 {
                assert!(channel.received().is_empty());
            } else {
                assert_eq!(channel.received(), vec!["msg".to_string()]);
            }
        }
    }

    #[tokio::test]
    async fn test_send_to_all_isolates_failures() {
        let f = fixture();
        let first = RecordingChannel::new();
        let broken = RecordingChannel::failing();
        let third = RecordingChannel::new();
        connect(&f.registry, "1", first.clone()).await;
        connect(&f.registry, "2", broken.clone()).await;
        connect(&f.registry, "3", third.clone()).await;

        let report = f.broadcaster.send_to_all("hello").await;

        assert_eq!(first.received(), vec!["hello".to_string()]);
        assert_eq!(third.received(), vec!["hello".to_string()]);
        assert_eq!(report.delivered_count(), 2);
        assert_eq!(
            report.failed,
            vec![(ClientId::from("2"), ChannelError::Closed)]
        );

        // Reported, not evicted
        assert!(f.registry.contains(&ClientId::from("2")).await);
        let events = f.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::DeliveryFailed);
        assert_eq!(events[0].client_id, ClientId::from("2"));
    }

    #[tokio::test]
    async fn test_send_to_all_with_no_clients() {
        let f = fixture();
        let report = f.broadcaster.send_to_all("nobody").await;
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    async fn test_send_to_one_delivers() {
        let f = fixture();
        let target = RecordingChannel::new();
        let other = RecordingChannel::new();
        connect(&f.registry, "target", target.clone()).await;
        connect(&f.registry, "other", other.clone()).await;

        f.broadcaster
            .send_to_one("direct", &ClientId::from("target"))
            .await
            .unwrap();

        assert_eq!(target.received(), vec!["direct".to_string()]);
        assert!(other.received().is_empty());
    }

    #[tokio::test]
    async fn test_send_to_one_unknown_recipient() {
        let f = fixture();
        let bystander = RecordingChannel::new();
        connect(&f.registry, "a", bystander.clone()).await;

        let result = f
            .broadcaster
            .send_to_one("hi", &ClientId::from("missing"))
            .await;

        assert_eq!(
            result,
            Err(BroadcastError::UnknownRecipient(ClientId::from("missing")))
        );
        assert!(bystander.received().is_empty());
        assert_eq!(bystander.attempts(), 0);
    }

    #[tokio::test]
    async fn test_send_to_one_surfaces_delivery_failure() {
        let f = fixture();
        connect(&f.registry, "broken", RecordingChannel::failing()).await;

        let result = f
            .broadcaster
            .send_to_one("hi", &ClientId::from("broken"))
            .await;

        assert!(matches!(result, Err(BroadcastError::Delivery { .. })));
        // Targeted failures go to the caller, not the sink
        assert!(f.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_per_sender_order_preserved() {
        let f = fixture();
        let receiver = RecordingChannel::new();
        connect(&f.registry, "sender", RecordingChannel::new()).await;
        connect(&f.registry, "receiver", receiver.clone()).await;

        let sender = ClientId::from("sender");
        for msg in ["one", "two", "three"] {
            f.broadcaster.send_to_all_except(msg, &sender).await;
        }

        assert_eq!(receiver.received(), vec!["one", "two", "three"]);
    }
}

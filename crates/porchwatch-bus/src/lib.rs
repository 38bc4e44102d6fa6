//! In-process control-plane bus for engine events.

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use porchwatch_types::{events::SystemEvent, Result};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: SystemEvent) -> Result<()>;
    fn subscribe(&self) -> BoxStream<'static, SystemEvent>;
}

/// Bus backed by a broadcast channel. Publishing never blocks; slow
/// subscribers lose the oldest messages.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: SystemEvent) -> Result<()> {
        if self.tx.send(event).is_err() {
            debug!("bus event published with no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, SystemEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move {
                match event {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!("bus subscriber lagged; skipped {skipped} events");
                        None
                    }
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porchwatch_types::events::{EventKind, LifecyclePhase};

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = LocalBus::new(8);
        let mut stream = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(SystemEvent::lifecycle(LifecyclePhase::Boot, None))
            .await
            .expect("publish");
        let event = stream.next().await.expect("event");
        assert_eq!(event.kind, EventKind::Lifecycle);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_ok() {
        let bus = LocalBus::default();
        bus.publish(SystemEvent::lifecycle(LifecyclePhase::Ready, None))
            .await
            .expect("publish");
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_oldest() {
        let bus = LocalBus::new(2);
        let mut stream = bus.subscribe();
        for details in ["a", "b", "c"] {
            bus.publish(SystemEvent::lifecycle(
                LifecyclePhase::Ready,
                Some(details.to_string()),
            ))
            .await
            .expect("publish");
        }
        let first = stream.next().await.expect("event");
        match first.payload {
            porchwatch_types::events::EventPayload::Lifecycle(lifecycle) => {
                assert_eq!(lifecycle.details.as_deref(), Some("b"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}

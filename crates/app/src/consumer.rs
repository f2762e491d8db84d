//! Message consumer: classifies raw bus messages into queue items.
//!
//! The [`ConsumerProxy`] is the registration point between the bus client
//! and consumers: it receives every bus message and hands the ones under a
//! known routing-key namespace to each registered [`BusConsumer`].

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use devicehub_domain::payload::Payload;
use devicehub_domain::routing::{Intent, MessageSource, RoutingKey};

use crate::ports::BusMessage;
use crate::queue::{Envelope, QueueItem, QueueProducer};

/// Receives raw messages from the bus. Must never block the caller.
pub trait BusConsumer: Send + Sync {
    fn consume(&self, source: MessageSource, routing_key: &str, data: Option<Payload>);
}

/// Wraps recognised messages into tagged [`QueueItem`]s and appends them
/// to the dispatch queue.
pub struct MessageConsumer {
    producer: QueueProducer,
}

impl MessageConsumer {
    /// Create a consumer appending to the queue behind `producer`.
    #[must_use]
    pub fn new(producer: QueueProducer) -> Self {
        Self { producer }
    }

    /// Register this consumer with the proxy.
    pub fn register(self: Arc<Self>, proxy: &ConsumerProxy) {
        proxy.register(self);
    }

    /// Classify a message, or `None` when it must be ignored.
    #[must_use]
    pub fn classify(
        source: MessageSource,
        routing_key: &str,
        data: Option<Payload>,
    ) -> Option<QueueItem> {
        let Ok(key) = routing_key.parse::<RoutingKey>() else {
            tracing::debug!(routing_key, "unrecognised routing key, ignoring message");
            return None;
        };
        let Some(data) = data else {
            tracing::warn!(routing_key, "message without payload, ignoring");
            return None;
        };

        let envelope = Envelope::new(source, key, data);
        Some(match key.intent() {
            Intent::PropertyAction => QueueItem::PropertyAction(envelope),
            Intent::ControlAction => QueueItem::ControlAction(envelope),
            Intent::EntityNotification => QueueItem::EntityEvent(envelope),
        })
    }
}

impl BusConsumer for MessageConsumer {
    fn consume(&self, source: MessageSource, routing_key: &str, data: Option<Payload>) {
        if let Some(item) = Self::classify(source, routing_key, data) {
            self.producer.append(item);
        }
    }
}

/// Fan-out point between the bus client and registered consumers.
#[derive(Clone, Default)]
pub struct ConsumerProxy {
    consumers: Arc<RwLock<Vec<Arc<dyn BusConsumer>>>>,
}

impl ConsumerProxy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a consumer; it receives every message delivered from now on.
    pub fn register(&self, consumer: Arc<dyn BusConsumer>) {
        self.consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(consumer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand one bus message to every registered consumer.
    pub fn deliver(&self, message: &BusMessage) {
        if !RoutingKey::in_namespace(&message.routing_key) {
            tracing::trace!(routing_key = %message.routing_key, "message outside known namespaces");
            return;
        }
        let consumers = self
            .consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for consumer in consumers.iter() {
            consumer.consume(message.source, &message.routing_key, message.data.clone());
        }
    }

    /// Pump a bus subscription into this proxy until the bus closes.
    #[must_use]
    pub fn spawn(self, mut receiver: broadcast::Receiver<BusMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => self.deliver(&message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "bus subscription lagged, messages were lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("bus closed, consumer proxy exiting");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::ports::BusPublisher;
    use crate::queue::Queue;
    use std::sync::Mutex;

    fn data() -> Option<Payload> {
        let mut payload = Payload::new();
        payload.insert("id".to_string(), serde_json::json!("x"));
        Some(payload)
    }

    #[derive(Default)]
    struct SpyConsumer {
        keys: Mutex<Vec<String>>,
    }

    impl BusConsumer for SpyConsumer {
        fn consume(&self, _source: MessageSource, routing_key: &str, _data: Option<Payload>) {
            self.keys.lock().unwrap().push(routing_key.to_string());
        }
    }

    #[test]
    fn should_classify_property_action() {
        let item =
            MessageConsumer::classify(MessageSource::Api, "devices.action.device.property", data());
        assert!(matches!(item, Some(QueueItem::PropertyAction(_))));
    }

    #[test]
    fn should_classify_control_action() {
        let item = MessageConsumer::classify(
            MessageSource::Api,
            "devices.action.connector.control",
            data(),
        );
        assert!(matches!(item, Some(QueueItem::ControlAction(_))));
    }

    #[test]
    fn should_classify_entity_notification() {
        let item = MessageConsumer::classify(
            MessageSource::Registry,
            "devices.entity.deleted.channel.property",
            data(),
        );
        let Some(QueueItem::EntityEvent(envelope)) = item else {
            panic!("expected entity event, got {item:?}");
        };
        assert_eq!(envelope.source(), MessageSource::Registry);
    }

    #[test]
    fn should_ignore_unknown_routing_key() {
        let item =
            MessageConsumer::classify(MessageSource::Api, "devices.action.toaster.bread", data());
        assert!(item.is_none());
    }

    #[test]
    fn should_ignore_message_without_payload() {
        let item =
            MessageConsumer::classify(MessageSource::Api, "devices.action.device.property", None);
        assert!(item.is_none());
    }

    #[test]
    fn should_append_classified_message_to_queue() {
        let queue = Queue::new(8);
        let consumer = MessageConsumer::new(queue.producer());

        consumer.consume(MessageSource::Api, "devices.action.channel.control", data());
        consumer.consume(MessageSource::Api, "nonsense", data());

        assert!(matches!(queue.pop(), Some(QueueItem::ControlAction(_))));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn should_deliver_only_known_namespaces_to_consumers() {
        let proxy = ConsumerProxy::new();
        let spy = Arc::new(SpyConsumer::default());
        proxy.register(spy.clone());

        proxy.deliver(&BusMessage {
            source: MessageSource::Automation,
            routing_key: "triggers.entity.created.trigger".to_string(),
            data: data(),
        });
        proxy.deliver(&BusMessage {
            source: MessageSource::Registry,
            routing_key: "devices.entity.created.device".to_string(),
            data: data(),
        });

        assert_eq!(
            *spy.keys.lock().unwrap(),
            ["devices.entity.created.device".to_string()]
        );
    }

    #[test]
    fn should_register_message_consumer_with_proxy() {
        let queue = Queue::new(8);
        let proxy = ConsumerProxy::new();
        Arc::new(MessageConsumer::new(queue.producer())).register(&proxy);
        assert_eq!(proxy.len(), 1);
    }

    #[tokio::test]
    async fn should_pump_bus_messages_into_queue() {
        let bus = InProcessBus::new(16);
        let queue = Queue::new(8);
        let proxy = ConsumerProxy::new();
        Arc::new(MessageConsumer::new(queue.producer())).register(&proxy);
        let pump = proxy.spawn(bus.subscribe());

        let mut payload = Payload::new();
        payload.insert("id".to_string(), serde_json::json!("x"));
        bus.publish(BusMessage::new(
            MessageSource::Registry,
            RoutingKey::CONNECTOR_ENTITY_UPDATED,
            payload,
        ))
        .await
        .unwrap();
        drop(bus);
        pump.await.unwrap();

        assert!(matches!(queue.pop(), Some(QueueItem::EntityEvent(_))));
    }
}

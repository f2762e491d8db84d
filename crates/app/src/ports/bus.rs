//! Bus publisher port: outbound messages to the message bus.

use std::future::Future;

use devicehub_domain::error::DeviceHubError;
use devicehub_domain::payload::Payload;
use devicehub_domain::routing::{MessageSource, RoutingKey};

/// One message as it travels on the bus.
///
/// The routing key is kept as the raw string so that consumers see keys
/// from foreign namespaces (and malformed ones) exactly as published.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub source: MessageSource,
    pub routing_key: String,
    pub data: Option<Payload>,
}

impl BusMessage {
    #[must_use]
    pub fn new(source: MessageSource, routing_key: RoutingKey, data: Payload) -> Self {
        Self {
            source,
            routing_key: routing_key.to_string(),
            data: Some(data),
        }
    }
}

/// Publishes messages to the bus.
pub trait BusPublisher {
    fn publish(
        &self,
        message: BusMessage,
    ) -> impl Future<Output = Result<(), DeviceHubError>> + Send;
}

impl<T: BusPublisher + Send + Sync> BusPublisher for std::sync::Arc<T> {
    fn publish(
        &self,
        message: BusMessage,
    ) -> impl Future<Output = Result<(), DeviceHubError>> + Send {
        (**self).publish(message)
    }
}

/// An absent publisher silently discards messages.
impl<T: BusPublisher + Send + Sync> BusPublisher for Option<T> {
    fn publish(
        &self,
        message: BusMessage,
    ) -> impl Future<Output = Result<(), DeviceHubError>> + Send {
        async move {
            match self {
                Some(publisher) => publisher.publish(message).await,
                None => Ok(()),
            }
        }
    }
}

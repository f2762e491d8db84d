//! In-process message bus backed by a tokio broadcast channel.

use std::future::Future;

use tokio::sync::broadcast;

use devicehub_domain::error::DeviceHubError;

use crate::ports::{BusMessage, BusPublisher};

/// In-process bus using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the message is simply dropped).
#[derive(Clone)]
pub struct InProcessBus {
    sender: broadcast::Sender<BusMessage>,
}

impl InProcessBus {
    /// Create a new bus buffering up to `capacity` messages per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to messages published *after* this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

impl BusPublisher for InProcessBus {
    fn publish(
        &self,
        message: BusMessage,
    ) -> impl Future<Output = Result<(), DeviceHubError>> + Send {
        // broadcast::send only fails with zero receivers.
        let _ = self.sender.send(message);
        async { Ok(()) }
    }
}

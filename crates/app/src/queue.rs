//! Bounded FIFO of inbound bus messages awaiting dispatch.
//!
//! There is one queue for all three message intents, so items are processed
//! in exact submission order regardless of kind. Appending never blocks: a
//! full queue drops the new item and logs an error.
//!
//! The producer side ([`QueueProducer`]) may live on a different task than
//! the drain loop. The receiving half sits behind an async mutex that is
//! held only while waiting for the next item, never while one is handled.

use tokio::sync::{Mutex, mpsc, watch};

use devicehub_domain::payload::Payload;
use devicehub_domain::routing::{MessageSource, RoutingKey};

/// Default queue bound.
pub const QUEUE_CAPACITY: usize = 1000;

/// Immutable contents shared by every queue item kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    source: MessageSource,
    routing_key: RoutingKey,
    data: Payload,
}

impl Envelope {
    /// Wrap a classified bus message.
    #[must_use]
    pub fn new(source: MessageSource, routing_key: RoutingKey, data: Payload) -> Self {
        Self {
            source,
            routing_key,
            data,
        }
    }

    #[must_use]
    pub fn source(&self) -> MessageSource {
        self.source
    }

    #[must_use]
    pub fn routing_key(&self) -> RoutingKey {
        self.routing_key
    }

    /// The message payload, as published.
    #[must_use]
    pub fn data(&self) -> &Payload {
        &self.data
    }
}

/// A queued message, tagged by intent.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    PropertyAction(Envelope),
    ControlAction(Envelope),
    EntityEvent(Envelope),
}

impl QueueItem {
    /// The message carried by this item, whatever its intent.
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        match self {
            Self::PropertyAction(envelope)
            | Self::ControlAction(envelope)
            | Self::EntityEvent(envelope) => envelope,
        }
    }
}

/// Cloneable append-only handle onto a [`Queue`], handed to consumers so
/// they never touch the receiving side.
#[derive(Clone)]
pub struct QueueProducer {
    sender: mpsc::Sender<QueueItem>,
}

impl QueueProducer {
    /// Append without blocking; drops the item when the queue is full.
    pub fn append(&self, item: QueueItem) {
        match self.sender.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(item)) => {
                tracing::error!(
                    routing_key = %item.envelope().routing_key(),
                    capacity = self.sender.max_capacity(),
                    "queue is full, dropping message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(item)) => {
                tracing::error!(
                    routing_key = %item.envelope().routing_key(),
                    "queue is closed, dropping message"
                );
            }
        }
    }
}

/// Bounded FIFO between the message consumer and the drain loop.
///
/// Producers never block: an item that does not fit is dropped and logged.
/// Only one task drains the queue at a time.
pub struct Queue {
    sender: mpsc::Sender<QueueItem>,
    receiver: Mutex<mpsc::Receiver<QueueItem>>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(QUEUE_CAPACITY)
    }
}

impl Queue {
    /// Create a queue holding at most `capacity` items (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// A new append handle for a consumer.
    #[must_use]
    pub fn producer(&self) -> QueueProducer {
        QueueProducer {
            sender: self.sender.clone(),
        }
    }

    /// Append without blocking; drops the item when the queue is full.
    pub fn append(&self, item: QueueItem) {
        self.producer().append(item);
    }

    /// Take the next item, or `None` when the queue is empty.
    ///
    /// Also returns `None` while the drain loop is parked waiting for work,
    /// since it then owns the receiving half.
    pub fn pop(&self) -> Option<QueueItem> {
        self.receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Number of items waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Wait for the next item.
    ///
    /// Queued items take precedence over shutdown: `None` is returned only
    /// once `stopping` is set *and* the queue is empty.
    pub(crate) async fn next(&self, stopping: &mut watch::Receiver<bool>) -> Option<QueueItem> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            item = receiver.recv() => item,
            _ = stopping.wait_for(|stopping| *stopping) => None,
        }
    }
}

//! Process-local broker: one queue per topic, one consumer per topic.
//!
//! A message handed to a consumer stays in flight until it is acked or
//! nacked. If the consumer goes away first, its in-flight messages are
//! queued again for the next subscriber.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{
    Acknowledger, AppError, BrokerError, Delivery, Envelope, MessagePublisher, MessageSubscriber,
    Subscription,
};

#[derive(Default)]
struct TopicQueue {
    pending: VecDeque<Envelope>,
    in_flight: Vec<Envelope>,
    consumer: Option<mpsc::UnboundedSender<Delivery>>,
}

impl TopicQueue {
    /// Puts unsettled messages back at the front, oldest first.
    fn requeue_in_flight(&mut self) {
        for envelope in self.in_flight.drain(..).rev() {
            self.pending.push_front(envelope);
        }
    }

    fn settle(&mut self, uuid: Uuid) {
        self.in_flight.retain(|e| e.uuid != uuid);
    }
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, TopicQueue>>,
    acked: Mutex<Vec<Uuid>>,
    nacked: Mutex<Vec<Uuid>>,
}

/// In-memory broker. Nacked messages are queued again after
/// `redelivery_delay`.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
    redelivery_delay: Duration,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_redelivery_delay(Duration::from_secs(1))
    }

    #[must_use]
    pub fn with_redelivery_delay(redelivery_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            redelivery_delay,
        }
    }

    /// Ids of acknowledged messages, oldest first.
    pub async fn acked(&self) -> Vec<Uuid> {
        self.inner.acked.lock().await.clone()
    }

    /// Ids of nacked messages, oldest first. A message appears once per nack.
    pub async fn nacked(&self) -> Vec<Uuid> {
        self.inner.nacked.lock().await.clone()
    }

    /// Messages handed to the consumer on `topic` but not settled yet.
    pub async fn in_flight(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .await
            .get(topic)
            .map_or(0, |q| q.in_flight.len())
    }

    /// Messages waiting for a consumer on `topic`.
    pub async fn pending(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .await
            .get(topic)
            .map_or(0, |q| q.pending.len())
    }

    fn acker(&self) -> Arc<dyn Acknowledger> {
        Arc::new(BrokerAcker {
            broker: self.clone(),
        })
    }

    async fn enqueue(&self, topic: &str, envelope: Envelope) {
        let acker = self.acker();
        let mut topics = self.inner.topics.lock().await;
        let queue = topics.entry(topic.to_string()).or_default();

        if let Some(consumer) = &queue.consumer {
            match consumer.send(Delivery::new(topic, envelope.clone(), acker)) {
                Ok(()) => {
                    queue.in_flight.push(envelope);
                    return;
                }
                Err(_) => {
                    debug!(topic, "Consumer gone, keeping message queued");
                    queue.consumer = None;
                    queue.requeue_in_flight();
                }
            }
        }
        queue.pending.push_back(envelope);
    }

    async fn settle(&self, topic: &str, uuid: Uuid) {
        if let Some(queue) = self.inner.topics.lock().await.get_mut(topic) {
            queue.settle(uuid);
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    #[instrument(skip(self, envelope), fields(message_uuid = %envelope.uuid))]
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), AppError> {
        self.enqueue(topic, envelope).await;
        Ok(())
    }
}

#[async_trait]
impl MessageSubscriber for InMemoryBroker {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, AppError> {
        let acker = self.acker();
        let mut topics = self.inner.topics.lock().await;
        let queue = topics.entry(topic.to_string()).or_default();

        if queue.consumer.as_ref().is_some_and(|c| !c.is_closed()) {
            return Err(BrokerError::AlreadySubscribed(topic.to_string()).into());
        }

        // Whatever the previous consumer left unsettled goes first.
        queue.requeue_in_flight();

        let (tx, rx) = mpsc::unbounded_channel();
        for envelope in queue.pending.drain(..) {
            // rx is alive in this scope, so sending cannot fail
            let _ = tx.send(Delivery::new(topic, envelope.clone(), Arc::clone(&acker)));
            queue.in_flight.push(envelope);
        }
        queue.consumer = Some(tx);
        Ok(Subscription::new(rx))
    }
}

struct BrokerAcker {
    broker: InMemoryBroker,
}

#[async_trait]
impl Acknowledger for BrokerAcker {
    async fn ack(&self, topic: &str, envelope: &Envelope) -> Result<(), AppError> {
        self.broker.settle(topic, envelope.uuid).await;
        self.broker.inner.acked.lock().await.push(envelope.uuid);
        Ok(())
    }

    async fn nack(&self, topic: &str, envelope: Envelope) -> Result<(), AppError> {
        self.broker.settle(topic, envelope.uuid).await;
        self.broker.inner.nacked.lock().await.push(envelope.uuid);

        let broker = self.broker.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(broker.redelivery_delay).await;
            broker.enqueue(&topic, envelope).await;
        });
        Ok(())
    }
}

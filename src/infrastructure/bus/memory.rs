//! In-process bus for tests. Delivers every injected message to the subscription
//! regardless of topic, the way a wildcard binding would, and records what
//! is published, acknowledged and rejected.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use super::{BusMessage, MessageBus, MessageStream};
use crate::common::error::{BusError, BusResult};
use crate::modules::transcode::events::Topic;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: Topic,
    pub key: String,
    pub payload: Vec<u8>,
}

pub struct InMemoryBus {
    inbound_tx: async_channel::Sender<BusMessage>,
    inbound_rx: async_channel::Receiver<BusMessage>,
    next_tag: AtomicU64,
    published: Mutex<Vec<PublishedMessage>>,
    acked: Mutex<Vec<u64>>,
    rejected: Mutex<Vec<(u64, bool)>>,
    consumer_connected: AtomicBool,
    producer_connected: AtomicBool,
    fail_consumer_connect: AtomicBool,
    fail_producer_connect: AtomicBool,
    fail_publish: AtomicBool,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = async_channel::unbounded();
        Self {
            inbound_tx,
            inbound_rx,
            next_tag: AtomicU64::new(1),
            published: Mutex::new(Vec::new()),
            acked: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            consumer_connected: AtomicBool::new(false),
            producer_connected: AtomicBool::new(false),
            fail_consumer_connect: AtomicBool::new(false),
            fail_producer_connect: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
        }
    }

    /// Injects a message as if a producer had sent it. Returns its delivery tag.
    pub fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> u64 {
        let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let message = BusMessage {
            topic: topic.to_string(),
            payload: payload.into(),
            delivery_tag,
            redelivered: false,
        };
        if self.inbound_tx.try_send(message).is_err() {
            debug!("In-memory bus closed, message dropped");
        }
        delivery_tag
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn rejected(&self) -> Vec<(u64, bool)> {
        self.rejected.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn is_consumer_connected(&self) -> bool {
        self.consumer_connected.load(Ordering::SeqCst)
    }

    pub fn is_producer_connected(&self) -> bool {
        self.producer_connected.load(Ordering::SeqCst)
    }

    pub fn fail_consumer_connect(&self, fail: bool) {
        self.fail_consumer_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_producer_connect(&self, fail: bool) {
        self.fail_producer_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn connect_consumer(&self) -> BusResult<()> {
        if self.fail_consumer_connect.load(Ordering::SeqCst) {
            return Err(BusError::Connection("consumer refused".into()));
        }
        self.consumer_connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn connect_producer(&self) -> BusResult<()> {
        if self.fail_producer_connect.load(Ordering::SeqCst) {
            return Err(BusError::Connection("producer refused".into()));
        }
        self.producer_connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, _topics: &[Topic]) -> BusResult<MessageStream> {
        if !self.is_consumer_connected() {
            return Err(BusError::NotConnected("consumer"));
        }
        Ok(self.inbound_rx.clone().boxed())
    }

    async fn ack(&self, message: &BusMessage) -> BusResult<()> {
        if let Ok(mut acked) = self.acked.lock() {
            acked.push(message.delivery_tag);
        }
        Ok(())
    }

    async fn reject(&self, message: &BusMessage, requeue: bool) -> BusResult<()> {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.push((message.delivery_tag, requeue));
        }
        Ok(())
    }

    async fn publish(&self, topic: Topic, key: &str, payload: &[u8]) -> BusResult<()> {
        if !self.is_producer_connected() {
            return Err(BusError::NotConnected("producer"));
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::Publish("publish refused".into()));
        }
        if let Ok(mut published) = self.published.lock() {
            published.push(PublishedMessage {
                topic,
                key: key.to_string(),
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }

    async fn disconnect_consumer(&self) -> BusResult<()> {
        self.consumer_connected.store(false, Ordering::SeqCst);
        self.inbound_tx.close();
        Ok(())
    }

    async fn disconnect_producer(&self) -> BusResult<()> {
        self.producer_connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_injected_messages_in_order() {
        let bus = InMemoryBus::new();
        bus.connect_consumer().await.unwrap();
        let mut stream = bus.subscribe(&[Topic::TranscodeStart]).await.unwrap();

        let first = bus.deliver("transcode-start", b"one".to_vec());
        let second = bus.deliver("other", b"two".to_vec());

        let a = stream.next().await.unwrap();
        let b = stream.next().await.unwrap();
        assert_eq!((a.delivery_tag, a.topic.as_str()), (first, "transcode-start"));
        assert_eq!((b.delivery_tag, b.topic.as_str()), (second, "other"));
    }

    #[tokio::test]
    async fn disconnecting_the_consumer_ends_the_stream() {
        let bus = InMemoryBus::new();
        bus.connect_consumer().await.unwrap();
        let mut stream = bus.subscribe(&[Topic::TranscodeStart]).await.unwrap();
        bus.disconnect_consumer().await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn publish_requires_a_connected_producer() {
        let bus = InMemoryBus::new();
        assert!(bus.publish(Topic::TranscodeUpdate, "c1", b"{}").await.is_err());

        bus.connect_producer().await.unwrap();
        bus.publish(Topic::TranscodeUpdate, "c1", b"{}").await.unwrap();
        assert_eq!(bus.published().len(), 1);
        assert_eq!(bus.published()[0].key, "c1");
    }
}

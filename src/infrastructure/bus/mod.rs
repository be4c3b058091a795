//! Topic-based message bus capability.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::common::error::BusResult;
use crate::modules::transcode::events::Topic;

#[cfg(test)]
pub mod memory;
pub mod rabbitmq;

#[cfg(test)]
pub use memory::InMemoryBus;
pub use rabbitmq::RabbitMqBus;

/// A message received from the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
}

pub type MessageStream = BoxStream<'static, BusMessage>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn connect_consumer(&self) -> BusResult<()>;

    async fn connect_producer(&self) -> BusResult<()>;

    /// Starts consuming `topics`. The stream ends when the consumer is
    /// disconnected.
    async fn subscribe(&self, topics: &[Topic]) -> BusResult<MessageStream>;

    async fn ack(&self, message: &BusMessage) -> BusResult<()>;

    async fn reject(&self, message: &BusMessage, requeue: bool) -> BusResult<()>;

    /// Publishes `payload` on `topic`. Messages sharing `key` keep their
    /// relative order.
    async fn publish(&self, topic: Topic, key: &str, payload: &[u8]) -> BusResult<()>;

    async fn disconnect_consumer(&self) -> BusResult<()>;

    async fn disconnect_producer(&self) -> BusResult<()>;
}

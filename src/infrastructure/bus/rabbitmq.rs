use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{BusMessage, MessageBus, MessageStream};
use crate::common::error::{BusError, BusResult};
use crate::infrastructure::redact_url;
use crate::modules::transcode::events::Topic;

/// Header carrying the ordering key of a published message.
pub const PARTITION_KEY_HEADER: &str = "partition-key";

const CONSUMER_PREFETCH: u16 = 16;

struct AmqpLink {
    conn: Connection,
    channel: Channel,
}

/// AMQP message bus.
///
/// Topics are routing keys on a durable topic exchange. The consumer owns a
/// durable queue named after the client id (the consumer group), bound to
/// each subscribed topic. Consumer and producer use separate connections.
pub struct RabbitMqBus {
    url: String,
    exchange: String,
    client_id: String,
    consumer: Mutex<Option<AmqpLink>>,
    producer: Mutex<Option<AmqpLink>>,
}

impl RabbitMqBus {
    pub fn new(url: &str, exchange: &str, client_id: &str) -> Self {
        Self {
            url: url.to_string(),
            exchange: exchange.to_string(),
            client_id: client_id.to_string(),
            consumer: Mutex::new(None),
            producer: Mutex::new(None),
        }
    }

    async fn connect(&self, role: &str) -> BusResult<AmqpLink> {
        info!("Connecting {} to RabbitMQ at {}", role, redact_url(&self.url));
        let conn = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))?;

        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("Failed to declare exchange: {}", e)))?;

        info!("Connected {} to RabbitMQ", role);
        Ok(AmqpLink { conn, channel })
    }

    async fn consumer_channel(&self) -> BusResult<Channel> {
        self.consumer
            .lock()
            .await
            .as_ref()
            .map(|link| link.channel.clone())
            .ok_or(BusError::NotConnected("consumer"))
    }

    async fn producer_channel(&self) -> BusResult<Channel> {
        self.producer
            .lock()
            .await
            .as_ref()
            .map(|link| link.channel.clone())
            .ok_or(BusError::NotConnected("producer"))
    }

    async fn connect_producer_link(&self) -> BusResult<AmqpLink> {
        let link = self.connect("producer").await?;
        link.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to enable confirms: {}", e)))?;
        Ok(link)
    }

    async fn reconnect_producer(&self) -> BusResult<()> {
        warn!("RabbitMQ producer connection dropped, reconnecting...");
        let link = self.connect_producer_link().await?;
        *self.producer.lock().await = Some(link);
        Ok(())
    }

    async fn publish_internal(&self, topic: Topic, key: &str, payload: &[u8]) -> BusResult<()> {
        let channel = self.producer_channel().await?;

        let mut headers = FieldTable::default();
        headers.insert(PARTITION_KEY_HEADER.into(), AMQPValue::LongString(key.into()));

        channel
            .basic_publish(
                &self.exchange,
                topic.as_str(),
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_headers(headers),
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish message: {}", e)))?
            .await
            .map_err(|e| BusError::Publish(format!("Failed to confirm publication: {}", e)))?;

        Ok(())
    }

    async fn close_link(link: AmqpLink, role: &str) {
        if let Err(e) = link.channel.close(200, "shutting down".into()).await {
            debug!("Closing {} channel failed: {}", role, e);
        }
        if let Err(e) = link.conn.close(200, "shutting down".into()).await {
            warn!("Closing {} connection failed: {}", role, e);
        }
        info!("Disconnected {} from RabbitMQ", role);
    }
}

#[async_trait]
impl MessageBus for RabbitMqBus {
    async fn connect_consumer(&self) -> BusResult<()> {
        let link = self.connect("consumer").await?;
        *self.consumer.lock().await = Some(link);
        Ok(())
    }

    async fn connect_producer(&self) -> BusResult<()> {
        let link = self.connect_producer_link().await?;
        *self.producer.lock().await = Some(link);
        Ok(())
    }

    async fn subscribe(&self, topics: &[Topic]) -> BusResult<MessageStream> {
        let channel = self.consumer_channel().await?;
        let queue_name = self.client_id.as_str();

        channel
            .basic_qos(CONSUMER_PREFETCH, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to set prefetch: {}", e)))?;

        // Ensure queue exists
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to declare queue: {}", e)))?;

        for topic in topics {
            channel
                .queue_bind(
                    queue_name,
                    &self.exchange,
                    topic.as_str(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BusError::Subscribe(format!("Failed to bind {}: {}", topic, e)))?;
        }

        let consumer = channel
            .basic_consume(
                queue_name,
                queue_name,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to create consumer: {}", e)))?;

        info!("Subscribed '{}' to {:?}", queue_name, topics);

        let stream = consumer.filter_map(|delivery| {
            futures_util::future::ready(match delivery {
                Ok(delivery) => Some(BusMessage {
                    topic: delivery.routing_key.as_str().to_string(),
                    payload: delivery.data,
                    delivery_tag: delivery.delivery_tag,
                    redelivered: delivery.redelivered,
                }),
                Err(e) => {
                    warn!("RabbitMQ delivery error: {}", e);
                    None
                }
            })
        });

        Ok(stream.boxed())
    }

    async fn ack(&self, message: &BusMessage) -> BusResult<()> {
        self.consumer_channel()
            .await?
            .basic_ack(message.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn reject(&self, message: &BusMessage, requeue: bool) -> BusResult<()> {
        self.consumer_channel()
            .await?
            .basic_nack(
                message.delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..BasicNackOptions::default()
                },
            )
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn publish(&self, topic: Topic, key: &str, payload: &[u8]) -> BusResult<()> {
        if let Err(e) = self.publish_internal(topic, key, payload).await {
            warn!("RabbitMQ publish failed: {}. Retrying after reconnect.", e);
            self.reconnect_producer().await?;
            self.publish_internal(topic, key, payload).await?;
        }

        Ok(())
    }

    async fn disconnect_consumer(&self) -> BusResult<()> {
        if let Some(link) = self.consumer.lock().await.take() {
            Self::close_link(link, "consumer").await;
        }
        Ok(())
    }

    async fn disconnect_producer(&self) -> BusResult<()> {
        if let Some(link) = self.producer.lock().await.take() {
            Self::close_link(link, "producer").await;
        }
        Ok(())
    }
}

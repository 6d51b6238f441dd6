use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{
        BasicAckOptions, BasicGetOptions, BasicPublishOptions, BasicRecoverOptions,
        QueueDeclareOptions, QueuePurgeOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clients::queue::{MessageAttributes, MessageQueue, QueueAttributes, ReceivedMessage};

const EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";
const QUEUE_TYPE_ARGUMENT: &str = "x-queue-type";

/// Quorum queues stamp `x-delivery-count` on every redelivery, which is what
/// the processor's dead-letter limit counts against.
fn queue_arguments() -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from(QUEUE_TYPE_ARGUMENT),
        AMQPValue::LongString(LongString::from("quorum")),
    );
    arguments
}

fn receive_count(previous_deliveries: Option<u32>, redelivered: bool) -> u32 {
    match previous_deliveries {
        Some(n) => n.saturating_add(1),
        None if redelivered => 2,
        None => 1,
    }
}

pub struct RabbitMqClient {
    connection: Connection,
}

impl RabbitMqClient {
    pub async fn connect(rabbitmq_url: &str) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        info!("RabbitMQ connection established");

        Ok(Self { connection })
    }

    /// Opens a dedicated channel for `queue_name` and declares it as a durable
    /// quorum queue. A pre-existing classic queue of the same name makes the
    /// declaration fail with PRECONDITION_FAILED.
    pub async fn queue(&self, queue_name: &str) -> Result<RabbitMqQueue, Error> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_arguments(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue {}: {}", queue_name, e))?;

        info!(queue = queue_name, "Queue declared");

        Ok(RabbitMqQueue {
            channel,
            queue_name: queue_name.to_string(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}

pub struct RabbitMqQueue {
    channel: Channel,
    queue_name: String,
}

impl RabbitMqQueue {
    fn to_headers(attributes: &MessageAttributes) -> FieldTable {
        let mut headers = FieldTable::default();
        for (key, value) in attributes {
            headers.insert(
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }
        headers
    }

    fn from_headers(headers: Option<&FieldTable>) -> (MessageAttributes, Option<u32>) {
        let mut attributes = MessageAttributes::new();
        let mut previous_deliveries = None;

        if let Some(headers) = headers {
            for (key, value) in headers.inner() {
                let key = key.as_str();
                match value {
                    AMQPValue::LongLongInt(n) if key == DELIVERY_COUNT_HEADER => {
                        previous_deliveries = u32::try_from(*n).ok();
                    }
                    AMQPValue::LongInt(n) if key == DELIVERY_COUNT_HEADER => {
                        previous_deliveries = u32::try_from(*n).ok();
                    }
                    AMQPValue::LongString(s) => {
                        attributes.insert(key.to_string(), s.to_string());
                    }
                    AMQPValue::ShortString(s) => {
                        attributes.insert(key.to_string(), s.to_string());
                    }
                    _ => {}
                }
            }
        }

        (attributes, previous_deliveries)
    }
}

#[async_trait]
impl MessageQueue for RabbitMqQueue {
    fn name(&self) -> &str {
        &self.queue_name
    }

    async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, Error> {
        let message_id = Uuid::new_v4().to_string();

        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type(ShortString::from("application/json"))
            .with_message_id(ShortString::from(message_id.clone()))
            .with_headers(Self::to_headers(attributes));

        self.channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                body.as_bytes(),
                properties,
            )
            .await
            .map_err(|e| anyhow!("Failed to publish to {}: {}", self.queue_name, e))?
            .await
            .map_err(|e| anyhow!("Publish to {} was not confirmed: {}", self.queue_name, e))?;

        debug!(queue = %self.queue_name, message_id = %message_id, "Message published");

        Ok(message_id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, Error> {
        // Deliveries left unacknowledged by earlier polls go back on the queue.
        self.channel
            .basic_recover(BasicRecoverOptions { requeue: true })
            .await
            .map_err(|e| anyhow!("Failed to recover unacknowledged messages: {}", e))?;

        let deadline = Instant::now() + wait;
        let mut messages = Vec::with_capacity(max_messages);

        while messages.len() < max_messages {
            let fetched = self
                .channel
                .basic_get(&self.queue_name, BasicGetOptions { no_ack: false })
                .await
                .map_err(|e| anyhow!("Failed to fetch from {}: {}", self.queue_name, e))?;

            match fetched {
                Some(message) => {
                    let delivery = message.delivery;
                    let (attributes, previous) =
                        Self::from_headers(delivery.properties.headers().as_ref());

                    let receive_count = receive_count(previous, delivery.redelivered);

                    let message_id = delivery
                        .properties
                        .message_id()
                        .as_ref()
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| delivery.delivery_tag.to_string());

                    messages.push(ReceivedMessage {
                        message_id,
                        body: String::from_utf8_lossy(&delivery.data).into_owned(),
                        receipt: delivery.delivery_tag.to_string(),
                        attributes,
                        receive_count,
                    });
                }
                None if !messages.is_empty() => break,
                None => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    sleep(EMPTY_POLL_INTERVAL).await;
                }
            }
        }

        Ok(messages)
    }

    async fn delete(&self, receipt: &str) -> Result<(), Error> {
        let delivery_tag: u64 = receipt
            .parse()
            .map_err(|_| anyhow!("Invalid receipt '{}'", receipt))?;

        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    async fn purge(&self) -> Result<u64, Error> {
        let purged = self
            .channel
            .queue_purge(&self.queue_name, QueuePurgeOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to purge {}: {}", self.queue_name, e))?;

        info!(queue = %self.queue_name, purged, "Queue purged");

        Ok(u64::from(purged))
    }

    async fn attributes(&self) -> Result<QueueAttributes, Error> {
        let queue = self
            .channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to inspect {}: {}", self.queue_name, e))?;

        Ok(QueueAttributes {
            approx_visible: u64::from(queue.message_count()),
            approx_in_flight: 0,
            approx_delayed: 0,
        })
    }
}

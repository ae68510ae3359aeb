//! RabbitMQ implementation over AMQP 0-9-1.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::future::Future;

use crate::traits::{
    BrokerChannel, BrokerConnector, BrokerError, BrokerResult, Delivery, DeliveryStream,
};

const PERSISTENT: u8 = 2;
const PREFETCH: u16 = 1;

pub struct AmqpConnector {
    uri: String,
    queues: Vec<String>,
    consumer_tag: String,
}

impl AmqpConnector {
    /// `queues` are declared durable on every connect.
    pub fn new(uri: impl Into<String>, queues: Vec<String>, consumer_tag: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            queues,
            consumer_tag: consumer_tag.into(),
        }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> BrokerResult<Box<dyn BrokerChannel>> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let setup = async {
            let channel = connection
                .create_channel()
                .await
                .map_err(|e| BrokerError::Channel(e.to_string()))?;

            channel
                .basic_qos(PREFETCH, BasicQosOptions::default())
                .await
                .map_err(|e| BrokerError::Channel(e.to_string()))?;

            // Publishes wait for the broker to take responsibility for the message
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| BrokerError::Channel(e.to_string()))?;

            for queue in &self.queues {
                channel
                    .queue_declare(
                        queue,
                        QueueDeclareOptions {
                            durable: true,
                            ..QueueDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| BrokerError::Channel(format!("declare {}: {}", queue, e)))?;
            }
            Ok::<Channel, BrokerError>(channel)
        };

        let teardown = async {
            if let Err(e) = connection.close(0, "setup failed").await {
                tracing::debug!(error = %e, "Closing half-open AMQP connection failed");
            }
        };

        let channel = close_on_error(setup, teardown).await?;

        tracing::info!(queues = ?self.queues, "AMQP channel ready");

        Ok(Box::new(AmqpChannel {
            connection,
            channel,
            consumer_tag: self.consumer_tag.clone(),
        }))
    }
}

/// Await `setup`; if it fails, run `teardown` before handing the error back.
async fn close_on_error<T, S, D>(setup: S, teardown: D) -> BrokerResult<T>
where
    S: Future<Output = BrokerResult<T>>,
    D: Future<Output = ()>,
{
    match setup.await {
        Ok(value) => Ok(value),
        Err(e) => {
            teardown.await;
            Err(e)
        }
    }
}

/// Only a broker ack means the message is safe; a nack or a channel without
/// confirms enabled is a failed publish.
fn require_ack(queue: &str, confirmation: Confirmation) -> BrokerResult<()> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(BrokerError::Publish {
            queue: queue.to_string(),
            reason: "broker nacked the message".to_string(),
        }),
        Confirmation::NotRequested => Err(BrokerError::Publish {
            queue: queue.to_string(),
            reason: "publisher confirms are not enabled".to_string(),
        }),
    }
}

pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    consumer_tag: String,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        let publish_err = |e: lapin::Error| BrokerError::Publish {
            queue: queue.to_string(),
            reason: e.to_string(),
        };

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(publish_err)?
            .await
            .map_err(publish_err)?;

        require_ack(queue, confirmation)
    }

    async fn consume(&self, queue: &str) -> BrokerResult<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let queue = queue.to_string();
        let stream = consumer.map(move |item| {
            item.map(|d| Delivery {
                tag: d.delivery_tag,
                payload: d.data,
                redelivered: d.redelivered,
            })
            .map_err(|e| BrokerError::Consume {
                queue: queue.clone(),
                reason: e.to_string(),
            })
        });

        Ok(stream.boxed())
    }

    async fn ack(&self, tag: u64) -> BrokerResult<()> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(format!("ack {}: {}", tag, e)))
    }

    async fn nack(&self, tag: u64, requeue: bool) -> BrokerResult<()> {
        self.channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| BrokerError::Channel(format!("nack {}: {}", tag, e)))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.channel
            .close(200, "OK")
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;
        self.connection
            .close(200, "OK")
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        tracing::info!("AMQP channel and connection closed");
        Ok(())
    }
}

//! Broker abstraction traits

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connect(String),

    #[error("Broker channel error: {0}")]
    Channel(String),

    #[error("Publish to {queue} failed: {reason}")]
    Publish { queue: String, reason: String },

    #[error("Consume from {queue} failed: {reason}")]
    Consume { queue: String, reason: String },

    #[error("Broker unreachable after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// One message handed to a consumer, unsettled until acked or nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub payload: Vec<u8>,
    /// Set when the broker has handed this message out before
    pub redelivered: bool,
}

pub type DeliveryStream = BoxStream<'static, BrokerResult<Delivery>>;

/// Opens a ready channel: connection up, both queues declared, prefetch applied.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> BrokerResult<Box<dyn BrokerChannel>>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Publish a persistent JSON message to `queue` on the default exchange.
    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()>;

    /// Deliveries from `queue`, one unacknowledged at a time. Ends when the channel closes.
    async fn consume(&self, queue: &str) -> BrokerResult<DeliveryStream>;

    async fn ack(&self, tag: u64) -> BrokerResult<()>;

    async fn nack(&self, tag: u64, requeue: bool) -> BrokerResult<()>;

    /// Close the channel, then the connection. Unsettled deliveries return to their queue.
    async fn close(&self) -> BrokerResult<()>;
}

//! Tally message broker layer
//!
//! `BrokerConnector` opens a channel with both durable queues declared;
//! `BrokerChannel` publishes, consumes and settles deliveries. The AMQP
//! implementation talks to RabbitMQ, the in-memory one backs tests and local runs.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;
pub mod retry;
pub mod traits;

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;
pub use memory::MemoryBroker;
pub use retry::connect_with_retry;
pub use traits::{BrokerChannel, BrokerConnector, BrokerError, BrokerResult, Delivery, DeliveryStream};

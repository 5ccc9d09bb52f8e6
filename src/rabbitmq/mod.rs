// src/rabbitmq/mod.rs
// Synchronous RabbitMQ client and the pieces it is built from

pub mod amqp_client;
pub mod client;
pub mod errors;
pub mod last_error;

#[cfg(test)]
pub(crate) mod memory;

pub use amqp_client::{Broker, Connector, ExchangeType, LapinBroker, LapinConnector};
pub use client::BrokerClient;
pub use errors::{ClientError, ErrorKind, RabbitMQError, Result};
pub use last_error::{LastError, Step};

//! Blocking RabbitMQ facade for callers that cannot use exceptions or async.
//!
//! [`BrokerClient`] returns `Result`s and also keeps a sticky last-error record
//! per instance. [`Bridge`] exposes the same operations using only primitives
//! and string arrays, with the error read back through accessors.

pub mod bridge;
pub mod config;
pub mod logging;
pub mod message;
pub mod rabbitmq;

pub use bridge::Bridge;
pub use config::{BridgeConfig, ClientOptions, ConnectionConfig};
pub use message::{MessageRecord, PROPERTY_SLOTS};
pub use rabbitmq::{BrokerClient, ClientError, ErrorKind, ExchangeType, RabbitMQError};

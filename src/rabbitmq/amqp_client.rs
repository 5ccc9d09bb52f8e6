// src/rabbitmq/amqp_client.rs

use async_trait::async_trait;
use lapin::{
    options::{BasicGetOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use super::errors::{RabbitMQError, Result};
use crate::config::ConnectionConfig;

/// Exchange types accepted by `declare_exchange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Topic,
    Fanout,
    Headers,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Topic => "topic",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeType {
    type Err = RabbitMQError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ExchangeType::Direct),
            "topic" => Ok(ExchangeType::Topic),
            "fanout" => Ok(ExchangeType::Fanout),
            "headers" => Ok(ExchangeType::Headers),
            other => Err(RabbitMQError::InvalidInput(format!(
                "unknown exchange type '{}', expected direct, topic, fanout or headers",
                other
            ))),
        }
    }
}

impl From<ExchangeType> for ExchangeKind {
    fn from(kind: ExchangeType) -> Self {
        match kind {
            ExchangeType::Direct => ExchangeKind::Direct,
            ExchangeType::Topic => ExchangeKind::Topic,
            ExchangeType::Fanout => ExchangeKind::Fanout,
            ExchangeType::Headers => ExchangeKind::Headers,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFlags {
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeFlags {
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
}

/// A message taken off a queue by a single fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub properties: BasicProperties,
    pub body: Vec<u8>,
    /// Messages still waiting in the queue, as reported by the broker.
    pub message_count: u32,
}

/// One open connection plus its current channel.
///
/// Passive declares report a missing resource as an error; with a real broker
/// that error also closes the channel.
#[async_trait]
pub trait Broker: Send {
    fn connection_is_open(&self) -> bool;

    fn channel_is_open(&self) -> bool;

    /// Replace the current channel with a fresh one from the connection.
    async fn open_channel(&mut self) -> Result<()>;

    async fn declare_exchange(&mut self, name: &str, kind: ExchangeType, flags: ExchangeFlags) -> Result<()>;

    /// Returns the number of messages in the queue.
    async fn declare_queue(&mut self, name: &str, flags: QueueFlags) -> Result<u32>;

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<()>;

    /// Fetch one message with automatic acknowledgement, if any is waiting.
    async fn get(&mut self, queue: &str) -> Result<Option<Fetched>>;

    async fn close_channel(&mut self) -> Result<()>;

    async fn close_connection(&mut self) -> Result<()>;
}

/// Opens [`Broker`] connections.
#[async_trait]
pub trait Connector {
    type Broker: Broker;

    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Broker>;
}

/// Connects through lapin.
#[derive(Debug, Clone, Copy, Default)]
pub struct LapinConnector;

#[async_trait]
impl Connector for LapinConnector {
    type Broker = LapinBroker;

    async fn connect(&self, config: &ConnectionConfig) -> Result<LapinBroker> {
        let uri = config.amqp_uri()?;
        info!("Connecting to RabbitMQ at {}", config.redacted());

        let connection = Connection::connect_uri(uri, ConnectionProperties::default()).await?;
        debug!("Successfully connected to RabbitMQ");

        Ok(LapinBroker {
            connection,
            channel: None,
        })
    }
}

pub struct LapinBroker {
    connection: Connection,
    channel: Option<Channel>,
}

impl LapinBroker {
    fn channel(&self) -> Result<&Channel> {
        self.channel
            .as_ref()
            .filter(|channel| channel.status().connected())
            .ok_or_else(|| RabbitMQError::ChannelError("channel is not open".to_string()))
    }
}

#[async_trait]
impl Broker for LapinBroker {
    fn connection_is_open(&self) -> bool {
        self.connection.status().connected()
    }

    fn channel_is_open(&self) -> bool {
        self.channel
            .as_ref()
            .map_or(false, |channel| channel.status().connected())
    }

    async fn open_channel(&mut self) -> Result<()> {
        let channel = self.connection.create_channel().await?;
        debug!(channel_id = channel.id(), "Channel opened");
        self.channel = Some(channel);
        Ok(())
    }

    async fn declare_exchange(&mut self, name: &str, kind: ExchangeType, flags: ExchangeFlags) -> Result<()> {
        self.channel()?
            .exchange_declare(
                name,
                kind.into(),
                ExchangeDeclareOptions {
                    passive: flags.passive,
                    durable: flags.durable,
                    auto_delete: flags.auto_delete,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&mut self, name: &str, flags: QueueFlags) -> Result<u32> {
        let queue = self
            .channel()?
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: flags.passive,
                    durable: flags.durable,
                    exclusive: flags.exclusive,
                    auto_delete: flags.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(queue.message_count())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<()> {
        // No confirm mode on this channel, so the returned confirm is not awaited
        self.channel()?
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?;
        Ok(())
    }

    async fn get(&mut self, queue: &str) -> Result<Option<Fetched>> {
        let message = self
            .channel()?
            .basic_get(queue, BasicGetOptions { no_ack: true })
            .await?;

        Ok(message.map(|mut message| Fetched {
            properties: message.delivery.properties.clone(),
            body: std::mem::take(&mut message.delivery.data),
            message_count: message.message_count,
        }))
    }

    async fn close_channel(&mut self) -> Result<()> {
        if let Some(channel) = self.channel.take() {
            channel.close(200, "Closing channel").await?;
        }
        Ok(())
    }

    async fn close_connection(&mut self) -> Result<()> {
        info!("Closing RabbitMQ connection gracefully");
        self.connection.close(200, "Closing connection").await?;
        Ok(())
    }
}

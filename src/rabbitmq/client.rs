// src/rabbitmq/client.rs

use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

use super::amqp_client::{
    Broker, Connector, ExchangeFlags, ExchangeType, LapinBroker, LapinConnector, QueueFlags,
};
use super::errors::{ClientError, RabbitMQError, Result};
use super::last_error::{LastError, Step};
use crate::config::{ClientOptions, ConnectionConfig};
use crate::message::MessageRecord;

/// Synchronous facade over one broker connection and one channel.
///
/// Every operation clears the sticky error first, runs, and records any
/// failure against the step that was in progress before returning it. The
/// same failure is therefore visible both as the returned `Err` and through
/// [`is_last_error`](Self::is_last_error) / [`last_error_message`](Self::last_error_message).
///
/// Calls block the current thread and must not be made from inside an async
/// runtime. One call at a time per instance.
pub struct BrokerClient<B: Broker = LapinBroker> {
    runtime: Option<Runtime>,
    broker: Option<B>,
    queue: String,
    exchange: String,
    last_error: LastError,
}

impl BrokerClient<LapinBroker> {
    /// Connects through lapin. Never fails outright: check
    /// [`is_last_error`](Self::is_last_error) right after.
    pub fn connect(config: &ConnectionConfig, options: &ClientOptions) -> Self {
        Self::connect_with(&LapinConnector, config, options)
    }
}

impl<B: Broker> BrokerClient<B> {
    pub fn connect_with<C>(connector: &C, config: &ConnectionConfig, options: &ClientOptions) -> Self
    where
        C: Connector<Broker = B>,
    {
        let mut client = BrokerClient {
            runtime: None,
            broker: None,
            queue: config.queue.clone(),
            exchange: config.exchange_name().unwrap_or_default().to_string(),
            last_error: LastError::new(),
        };

        match client.open(connector, config, options) {
            Ok(()) => info!(
                queue = %client.queue,
                exchange = %client.exchange,
                "Broker client ready"
            ),
            Err(err) => debug!(error = %err, "Broker client constructed with an error"),
        }
        client
    }

    fn open<C>(&mut self, connector: &C, config: &ConnectionConfig, options: &ClientOptions) -> std::result::Result<(), ClientError>
    where
        C: Connector<Broker = B>,
    {
        self.last_error.set_header(Step::OpenConnection);
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| self.fail(e.into()))?;
        let broker = runtime
            .block_on(connector.connect(config))
            .map_err(|e| self.fail(e))?;
        self.runtime = Some(runtime);
        self.broker = Some(broker);

        self.last_error.set_header(Step::OpenChannel);
        self.with_broker(|rt, broker| rt.block_on(broker.open_channel()))?;

        if !self.exchange.is_empty() {
            self.last_error.set_header(Step::CheckExchange);
            let exchange = self.exchange.clone();
            let flags = ExchangeFlags {
                passive: true,
                ..ExchangeFlags::default()
            };
            self.with_broker(|rt, broker| {
                rt.block_on(broker.declare_exchange(&exchange, ExchangeType::Direct, flags))
            })?;
        } else if options.validate_queue {
            self.last_error.set_header(Step::CheckQueue);
            let queue = self.queue.clone();
            let flags = QueueFlags {
                passive: true,
                ..QueueFlags::default()
            };
            self.with_broker(|rt, broker| rt.block_on(broker.declare_queue(&queue, flags)))?;
        }

        Ok(())
    }

    /// Create the bound queue if absent, or verify it matches the flags.
    pub fn declare_queue(&mut self, durable: bool, exclusive: bool, auto_delete: bool) -> std::result::Result<(), ClientError> {
        self.last_error.clear();
        self.ensure_channel()?;

        self.last_error.set_header(Step::DeclareQueue);
        let queue = self.queue.clone();
        let flags = QueueFlags {
            passive: false,
            durable,
            exclusive,
            auto_delete,
        };
        let message_count = self.with_broker(|rt, broker| rt.block_on(broker.declare_queue(&queue, flags)))?;

        info!("Queue '{}' declared with {} messages", queue, message_count);
        Ok(())
    }

    /// Declare the bound exchange. With `passive` set this only checks that it exists.
    pub fn declare_exchange(
        &mut self,
        kind: ExchangeType,
        passive: bool,
        durable: bool,
        auto_delete: bool,
    ) -> std::result::Result<(), ClientError> {
        self.last_error.clear();
        self.ensure_channel()?;

        self.last_error.set_header(Step::DeclareExchange);
        let exchange = self.exchange.clone();
        let flags = ExchangeFlags {
            passive,
            durable,
            auto_delete,
        };
        self.with_broker(|rt, broker| rt.block_on(broker.declare_exchange(&exchange, kind, flags)))?;

        info!(exchange = %exchange, kind = %kind, "Exchange declared");
        Ok(())
    }

    /// Publish to the bound exchange, routed by the bound queue name.
    pub fn send(&mut self, message: &MessageRecord) -> std::result::Result<(), ClientError> {
        let queue = self.queue.clone();
        self.send_to_queue(&queue, message)
    }

    /// Publish with `queue` as the routing key. Delivery is not confirmed.
    pub fn send_to_queue(&mut self, queue: &str, message: &MessageRecord) -> std::result::Result<(), ClientError> {
        self.last_error.clear();

        self.last_error.set_header(Step::SendMessage);
        let exchange = self.exchange.clone();
        let properties = message.to_properties().map_err(|e| self.fail(e))?;
        self.with_broker(|rt, broker| {
            rt.block_on(broker.publish(&exchange, queue, message.body(), properties))
        })?;

        debug!(
            exchange = %exchange,
            routing_key = %queue,
            bytes = message.body_len(),
            "Published message"
        );
        Ok(())
    }

    /// Fetch one message from the bound queue.
    pub fn read(&mut self) -> std::result::Result<MessageRecord, ClientError> {
        let queue = self.queue.clone();
        self.read_from_queue(&queue)
    }

    /// Fetch one message, acknowledging it immediately.
    ///
    /// An empty queue is not an error: the result is an empty record.
    pub fn read_from_queue(&mut self, queue: &str) -> std::result::Result<MessageRecord, ClientError> {
        self.last_error.clear();

        self.last_error.set_header(Step::ReadMessage);
        let fetched = self.with_broker(|rt, broker| rt.block_on(broker.get(queue)))?;

        match fetched {
            Some(fetched) => {
                debug!(
                    queue = %queue,
                    bytes = fetched.body.len(),
                    remaining = fetched.message_count,
                    "Fetched message"
                );
                Ok(MessageRecord::from_delivery(
                    &fetched.properties,
                    fetched.body,
                    fetched.message_count,
                ))
            }
            None => {
                debug!(queue = %queue, "Queue is empty");
                Ok(MessageRecord::new())
            }
        }
    }

    pub fn is_open(&mut self) -> bool {
        self.last_error.clear();
        self.last_error.set_header(Step::IsOpen);
        self.broker
            .as_ref()
            .map_or(false, |broker| broker.connection_is_open())
    }

    /// Close the channel, then the connection. Failures are discarded and the
    /// sticky error is left as it was. Safe to call any number of times.
    pub fn close(&mut self) {
        let (Some(runtime), Some(mut broker)) = (self.runtime.as_ref(), self.broker.take()) else {
            return;
        };

        if let Err(err) = runtime.block_on(broker.close_channel()) {
            debug!(error = %err, "Ignoring failure while closing channel");
        }
        if let Err(err) = runtime.block_on(broker.close_connection()) {
            debug!(error = %err, "Ignoring failure while closing connection");
        }
    }

    pub fn is_last_error(&self) -> bool {
        self.last_error.is_error()
    }

    pub fn last_error_message(&self) -> String {
        self.last_error.message()
    }

    pub fn last_error(&self) -> &LastError {
        &self.last_error
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Bound exchange; empty for the default exchange.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Start a fresh call that failed before reaching the broker.
    pub(crate) fn reject(&mut self, step: Step, source: RabbitMQError) -> ClientError {
        self.last_error.clear();
        self.last_error.set_header(step);
        self.fail(source)
    }

    /// Reopen the channel if the broker closed it.
    fn ensure_channel(&mut self) -> std::result::Result<(), ClientError> {
        self.last_error.set_header(Step::OpenChannel);
        self.with_broker(|rt, broker| {
            if broker.channel_is_open() {
                return Ok(());
            }
            debug!("Channel closed, opening a new one");
            rt.block_on(broker.open_channel())
        })
    }

    fn with_broker<T>(&mut self, op: impl FnOnce(&Runtime, &mut B) -> Result<T>) -> std::result::Result<T, ClientError> {
        let outcome = match (self.runtime.as_ref(), self.broker.as_mut()) {
            (Some(runtime), Some(broker)) => op(runtime, broker),
            _ => Err(RabbitMQError::ConnectionError("connection is not open".to_string())),
        };
        outcome.map_err(|e| self.fail(e))
    }

    fn fail(&mut self, source: RabbitMQError) -> ClientError {
        self.last_error.set_message(source.detail(), None);
        let step = self.last_error.header().to_string();
        warn!(step = %step, error = %source, "RabbitMQ operation failed");
        ClientError::new(step, source)
    }
}

impl<B: Broker> Drop for BrokerClient<B> {
    fn drop(&mut self) {
        self.close();
    }
}

// src/rabbitmq/memory.rs
//
// In-process broker used by the unit tests. Routing is deliberately simple:
// the default exchange and every named exchange deliver to the queue whose
// name equals the routing key, and unroutable messages are dropped.

use async_trait::async_trait;
use lapin::BasicProperties;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::amqp_client::{Broker, Connector, ExchangeFlags, ExchangeType, Fetched, QueueFlags};
use super::errors::{RabbitMQError, Result};
use crate::config::ConnectionConfig;

struct StoredQueue {
    flags: QueueFlags,
    messages: VecDeque<(BasicProperties, Vec<u8>)>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeType>,
    queues: HashMap<String, StoredQueue>,
}

#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<State>>,
    reachable: bool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        let mut state = State::default();
        for (name, kind) in [
            ("", ExchangeType::Direct),
            ("amq.direct", ExchangeType::Direct),
            ("amq.topic", ExchangeType::Topic),
            ("amq.fanout", ExchangeType::Fanout),
            ("amq.headers", ExchangeType::Headers),
        ] {
            state.exchanges.insert(name.to_string(), kind);
        }

        Self {
            state: Arc::new(Mutex::new(state)),
            reachable: true,
        }
    }

    /// A broker that refuses every connection attempt.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    pub fn with_queue(self, name: &str) -> Self {
        self.lock().queues.insert(
            name.to_string(),
            StoredQueue {
                flags: QueueFlags::default(),
                messages: VecDeque::new(),
            },
        );
        self
    }

    pub fn with_exchange(self, name: &str, kind: ExchangeType) -> Self {
        self.lock().exchanges.insert(name.to_string(), kind);
        self
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.lock().exchanges.contains_key(name)
    }

    pub fn queue_len(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, |q| q.messages.len())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory broker state poisoned")
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Broker = MemoryBroker;

    async fn connect(&self, config: &ConnectionConfig) -> Result<MemoryBroker> {
        config.amqp_uri()?;
        if !self.reachable {
            return Err(RabbitMQError::ConnectionError(
                "Connection refused (os error 111)".to_string(),
            ));
        }

        Ok(MemoryBroker {
            state: self.state.clone(),
            connection_open: true,
            channel_open: false,
            channels_opened: 0,
        })
    }
}

pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    connection_open: bool,
    channel_open: bool,
    pub channels_opened: usize,
}

impl MemoryBroker {
    fn check_channel(&self) -> Result<()> {
        if self.channel_open {
            Ok(())
        } else {
            Err(RabbitMQError::ChannelError("invalid channel state: Closed".to_string()))
        }
    }

    /// Channel-level errors close the channel, as a real broker does.
    fn channel_failure(&mut self, error: RabbitMQError) -> RabbitMQError {
        self.channel_open = false;
        error
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory broker state poisoned")
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn connection_is_open(&self) -> bool {
        self.connection_open
    }

    fn channel_is_open(&self) -> bool {
        self.channel_open
    }

    async fn open_channel(&mut self) -> Result<()> {
        if !self.connection_open {
            return Err(RabbitMQError::ConnectionError("invalid connection state: Closed".to_string()));
        }
        self.channel_open = true;
        self.channels_opened += 1;
        Ok(())
    }

    async fn declare_exchange(&mut self, name: &str, kind: ExchangeType, flags: ExchangeFlags) -> Result<()> {
        self.check_channel()?;
        let existing = self.lock().exchanges.get(name).copied();

        match existing {
            None if flags.passive => Err(self.channel_failure(RabbitMQError::NotFound(format!(
                "NOT_FOUND - no exchange '{}' in vhost '/'",
                name
            )))),
            None => {
                self.lock().exchanges.insert(name.to_string(), kind);
                Ok(())
            }
            Some(current) if !flags.passive && current != kind => {
                Err(self.channel_failure(RabbitMQError::PreconditionFailed(format!(
                    "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}': received '{}' but current is '{}'",
                    name, kind, current
                ))))
            }
            Some(_) => Ok(()),
        }
    }

    async fn declare_queue(&mut self, name: &str, flags: QueueFlags) -> Result<u32> {
        self.check_channel()?;
        let existing = self
            .lock()
            .queues
            .get(name)
            .map(|q| (q.flags, q.messages.len() as u32));

        match existing {
            None if flags.passive => Err(self.channel_failure(RabbitMQError::NotFound(format!(
                "NOT_FOUND - no queue '{}' in vhost '/'",
                name
            )))),
            None => {
                self.lock().queues.insert(
                    name.to_string(),
                    StoredQueue {
                        flags,
                        messages: VecDeque::new(),
                    },
                );
                Ok(0)
            }
            Some((current, _)) if !flags.passive && current.durable != flags.durable => {
                Err(self.channel_failure(RabbitMQError::PreconditionFailed(format!(
                    "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{}'",
                    name
                ))))
            }
            Some((_, count)) => Ok(count),
        }
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<()> {
        self.check_channel()?;
        let mut state = self.lock();
        if !state.exchanges.contains_key(exchange) {
            drop(state);
            return Err(self.channel_failure(RabbitMQError::NotFound(format!(
                "NOT_FOUND - no exchange '{}' in vhost '/'",
                exchange
            ))));
        }
        if let Some(queue) = state.queues.get_mut(routing_key) {
            queue.messages.push_back((properties, body.to_vec()));
        }
        Ok(())
    }

    async fn get(&mut self, queue: &str) -> Result<Option<Fetched>> {
        self.check_channel()?;
        let mut state = self.lock();
        let Some(stored) = state.queues.get_mut(queue) else {
            drop(state);
            return Err(self.channel_failure(RabbitMQError::NotFound(format!(
                "NOT_FOUND - no queue '{}' in vhost '/'",
                queue
            ))));
        };

        Ok(stored.messages.pop_front().map(|(properties, body)| Fetched {
            properties,
            body,
            message_count: stored.messages.len() as u32,
        }))
    }

    async fn close_channel(&mut self) -> Result<()> {
        if !self.channel_open {
            return Err(RabbitMQError::ChannelError("invalid channel state: Closed".to_string()));
        }
        self.channel_open = false;
        Ok(())
    }

    async fn close_connection(&mut self) -> Result<()> {
        if !self.connection_open {
            return Err(RabbitMQError::ConnectionError("invalid connection state: Closed".to_string()));
        }
        self.connection_open = false;
        self.channel_open = false;
        Ok(())
    }
}

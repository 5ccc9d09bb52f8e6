// src/bridge.rs
//
// Flat calling convention for hosts that can only exchange primitives and
// string arrays. Failures never leave this layer as values: they are read
// back through `is_last_error` / `get_last_error_message`.

use tracing::{debug, warn};

use crate::config::{ClientOptions, ConnectionConfig};
use crate::message::{MessageRecord, PROPERTY_SLOTS};
use crate::rabbitmq::amqp_client::{Broker, ExchangeType, LapinBroker};
use crate::rabbitmq::errors::RabbitMQError;
use crate::rabbitmq::last_error::Step;
use crate::rabbitmq::BrokerClient;

pub struct Bridge<B: Broker = LapinBroker> {
    client: BrokerClient<B>,
    defaults: MessageRecord,
    last_read: MessageRecord,
}

impl Bridge<LapinBroker> {
    /// Connect with discrete settings. `host` may also be a full `amqp://` URI,
    /// in which case port, credentials and vhost are ignored.
    pub fn new(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        virtual_host: &str,
        queue: &str,
        exchange: Option<&str>,
    ) -> Self {
        let mut config = ConnectionConfig::new(host, queue)
            .with_port(port)
            .with_credentials(user, password)
            .with_virtual_host(virtual_host);
        config.exchange = exchange.map(str::to_string);

        Self::from_client(BrokerClient::connect(&config, &ClientOptions::default()))
    }
}

impl<B: Broker> Bridge<B> {
    pub fn from_client(client: BrokerClient<B>) -> Self {
        Self {
            client,
            defaults: MessageRecord::new(),
            last_read: MessageRecord::new(),
        }
    }

    /// Properties copied onto every outgoing message. Headers and body of the
    /// template are ignored.
    pub fn defaults_mut(&mut self) -> &mut MessageRecord {
        &mut self.defaults
    }

    pub fn client(&self) -> &BrokerClient<B> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut BrokerClient<B> {
        &mut self.client
    }

    /// Returns true when the declare failed.
    pub fn declare_queue(&mut self, durable: bool, exclusive: bool, auto_delete: bool) -> bool {
        self.client.declare_queue(durable, exclusive, auto_delete).is_err()
    }

    /// `exchange_type` is one of direct, topic, fanout or headers. Returns true
    /// when the declare failed.
    pub fn declare_exchange(&mut self, exchange_type: &str, passive: bool, durable: bool, auto_delete: bool) -> bool {
        match exchange_type.parse::<ExchangeType>() {
            Ok(kind) => self
                .client
                .declare_exchange(kind, passive, durable, auto_delete)
                .is_err(),
            Err(err) => {
                self.client.reject(Step::DeclareExchange, err);
                true
            }
        }
    }

    pub fn send(
        &mut self,
        body: &[u8],
        correlation_id: Option<&str>,
        message_id: Option<&str>,
        headers: Option<&[&str]>,
    ) {
        let message = self.outgoing(body, correlation_id, message_id, headers);
        let _ = self.client.send(&message);
    }

    pub fn send_to_queue(
        &mut self,
        queue: &str,
        body: &[u8],
        correlation_id: Option<&str>,
        message_id: Option<&str>,
        headers: Option<&[&str]>,
    ) {
        let message = self.outgoing(body, correlation_id, message_id, headers);
        let _ = self.client.send_to_queue(queue, &message);
    }

    /// Fetch one message into the flat arrays and keep it for the body
    /// accessors. Returns true on error.
    ///
    /// `out_props` needs [`PROPERTY_SLOTS`] entries; a shorter array is
    /// rejected before anything is fetched. Up to `out_headers.len()` headers
    /// are copied, remaining slots are blanked and extra headers are dropped.
    pub fn read_into(&mut self, out_props: &mut [String], out_headers: Option<&mut [String]>) -> bool {
        if out_props.len() < PROPERTY_SLOTS {
            self.client.reject(
                Step::ReadProperties,
                RabbitMQError::InvalidInput(format!(
                    "property array holds {} values, {} required",
                    out_props.len(),
                    PROPERTY_SLOTS
                )),
            );
            return true;
        }

        self.last_read = self.client.read().unwrap_or_default();
        if self.client.is_last_error() {
            return true;
        }

        for (slot, value) in out_props.iter_mut().zip(self.last_read.property_slots()) {
            *slot = value;
        }

        if let Some(out_headers) = out_headers {
            let mut entries = self.last_read.header_strings().into_iter();
            for slot in out_headers.iter_mut() {
                *slot = entries.next().unwrap_or_default();
            }

            let dropped = entries.count();
            if dropped > 0 {
                warn!(
                    capacity = out_headers.len(),
                    dropped,
                    "Header array too small, extra headers dropped"
                );
            }
        }

        false
    }

    /// The last message read, empty if none.
    pub fn last_read(&self) -> &MessageRecord {
        &self.last_read
    }

    /// Body of the last message read, empty if none.
    pub fn read_body_as_bytes(&self) -> Vec<u8> {
        self.last_read.body().to_vec()
    }

    pub fn read_body_as_text(&self) -> String {
        self.last_read.body_text()
    }

    pub fn is_open(&mut self) -> bool {
        self.client.is_open()
    }

    pub fn is_last_error(&self) -> bool {
        self.client.is_last_error()
    }

    /// `"ERROR [<step>]: <detail>"`, or empty when the last call succeeded.
    pub fn get_last_error_message(&self) -> String {
        self.client.last_error_message()
    }

    pub fn close(&mut self) {
        self.client.close();
    }

    fn outgoing(
        &self,
        body: &[u8],
        correlation_id: Option<&str>,
        message_id: Option<&str>,
        headers: Option<&[&str]>,
    ) -> MessageRecord {
        let mut message = self.defaults.clone();
        message.clear_headers();
        message.set_body(body);

        if let Some(id) = present(correlation_id) {
            message.correlation_id = Some(id.to_string());
        }
        if let Some(id) = present(message_id) {
            message.message_id = Some(id.to_string());
        }
        if let Some(headers) = headers {
            message.set_header_strings(headers.iter().copied());
        }

        debug!(
            bytes = message.body_len(),
            headers = message.headers().len(),
            "Prepared outgoing message"
        );
        message
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rabbitmq::memory::{MemoryBroker, MemoryConnector};

    fn bridge(broker: &MemoryConnector, queue: &str) -> Bridge<MemoryBroker> {
        let config = ConnectionConfig::new("localhost", queue);
        Bridge::from_client(BrokerClient::connect_with(broker, &config, &ClientOptions::default()))
    }

    fn slots() -> Vec<String> {
        vec![String::new(); PROPERTY_SLOTS]
    }

    #[test]
    fn test_flat_round_trip() {
        let broker = MemoryConnector::new().with_queue("Q");
        let mut bridge = bridge(&broker, "Q");
        assert!(!bridge.is_last_error());

        bridge.send(b"hello", Some("cid1"), Some("m1"), Some(&["x=1"][..]));
        assert!(!bridge.is_last_error());

        let mut props = slots();
        let mut headers = vec!["stale".to_string(); 3];
        assert!(!bridge.read_into(&mut props, Some(headers.as_mut_slice())));

        assert_eq!(props[0], "5");
        assert_eq!(props[1], "0");
        assert_eq!(props[4], "cid1");
        assert_eq!(props[7], "m1");
        assert!(!props[14].is_empty());
        assert_eq!(headers, vec!["x=1".to_string(), String::new(), String::new()]);
        assert_eq!(bridge.read_body_as_text(), "hello");
        assert_eq!(bridge.read_body_as_bytes(), b"hello".to_vec());
    }

    #[test]
    fn test_defaults_apply_and_empty_ids_mean_absent() {
        let broker = MemoryConnector::new().with_queue("Q");
        let mut bridge = bridge(&broker, "Q");
        bridge.defaults_mut().content_type = Some("text/xml".to_string());
        bridge.defaults_mut().delivery_mode = Some(2);
        bridge.defaults_mut().correlation_id = Some("template".to_string());

        bridge.send(b"<a/>", Some(""), None, None);

        let mut props = slots();
        assert!(!bridge.read_into(&mut props, None));
        assert_eq!(props[2], "text/xml");
        assert_eq!(props[4], "template");
        assert_eq!(props[7], "");
        assert_eq!(props[12], "2");
    }

    #[test]
    fn test_malformed_headers_dropped() {
        let broker = MemoryConnector::new().with_queue("Q");
        let mut bridge = bridge(&broker, "Q");

        bridge.send(b"x", None, None, Some(&["noequals", "a=b=c", "=v"][..]));
        assert!(!bridge.is_last_error());

        let mut props = slots();
        let mut headers = vec![String::new(); 4];
        assert!(!bridge.read_into(&mut props, Some(headers.as_mut_slice())));
        assert_eq!(headers[0], "a=b=c");
        assert_eq!(headers[1], "");
    }

    #[test]
    fn test_read_empty_queue() {
        let broker = MemoryConnector::new().with_queue("Q");
        let mut bridge = bridge(&broker, "Q");

        let mut props = slots();
        assert!(!bridge.read_into(&mut props, None));
        assert_eq!(props[0], "0");
        assert_eq!(props[2], "");
        assert!(bridge.read_body_as_bytes().is_empty());
        assert_eq!(bridge.get_last_error_message(), "");
    }

    #[test]
    fn test_short_property_array_is_an_error() {
        let broker = MemoryConnector::new().with_queue("Q");
        let mut bridge = bridge(&broker, "Q");
        bridge.send(b"body", Some("cid1"), None, None);

        let mut props = vec![String::new(); 3];
        assert!(bridge.read_into(&mut props, None));
        assert_eq!(
            bridge.get_last_error_message(),
            "ERROR [read properties]: property array holds 3 values, 15 required"
        );

        // Nothing was fetched
        assert_eq!(broker.queue_len("Q"), 1);
        assert!(bridge.read_body_as_bytes().is_empty());

        let mut props = slots();
        assert!(!bridge.read_into(&mut props, None));
        assert_eq!(props[4], "cid1");
        assert_eq!(bridge.read_body_as_text(), "body");
    }

    #[test]
    fn test_extra_headers_dropped_without_error() {
        let broker = MemoryConnector::new().with_queue("Q");
        let mut bridge = bridge(&broker, "Q");
        bridge.send(b"", None, None, Some(&["a=1", "b=2", "c=3"][..]));

        let mut props = slots();
        let mut headers = vec![String::new(); 2];
        assert!(!bridge.read_into(&mut props, Some(headers.as_mut_slice())));
        assert_eq!(headers, vec!["a=1".to_string(), "b=2".to_string()]);
        assert!(!bridge.is_last_error());
        assert_eq!(bridge.last_read().headers().len(), 3);
    }

    #[test]
    fn test_oversized_id_recorded_on_send() {
        let broker = MemoryConnector::new().with_queue("Q");
        let mut bridge = bridge(&broker, "Q");

        let long_id = "m".repeat(300);
        bridge.send(b"x", None, Some(long_id.as_str()), None);

        assert!(bridge
            .get_last_error_message()
            .starts_with("ERROR [send message]: message id is 300 bytes"));
        assert_eq!(broker.queue_len("Q"), 0);
    }

    #[test]
    fn test_declare_exchange_rejects_unknown_type() {
        let broker = MemoryConnector::new().with_queue("Q");
        let mut bridge = bridge(&broker, "Q");

        assert!(bridge.declare_exchange("x-delayed", false, false, false));
        assert!(bridge
            .get_last_error_message()
            .starts_with("ERROR [declare exchange]: unknown exchange type"));

        // The next call starts clean
        assert!(bridge.is_open());
        assert!(!bridge.is_last_error());
    }

    #[test]
    fn test_declare_queue_flag() {
        let broker = MemoryConnector::new();
        let mut bridge = bridge(&broker, "fresh");
        assert!(bridge.is_last_error());

        assert!(!bridge.declare_queue(false, false, true));
        assert!(broker.has_queue("fresh"));
    }

    #[test]
    fn test_read_failure_resets_last_body() {
        let broker = MemoryConnector::new().with_queue("Q");
        let mut bridge = bridge(&broker, "Q");
        bridge.send(b"first", None, None, None);

        let mut props = slots();
        assert!(!bridge.read_into(&mut props, None));
        assert_eq!(bridge.read_body_as_text(), "first");

        bridge.close();
        assert!(bridge.read_into(&mut props, None));
        assert!(bridge.read_body_as_text().is_empty());
        assert!(!bridge.is_open());
    }
}

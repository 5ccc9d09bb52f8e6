// Live broker tests. They need a RabbitMQ server on localhost (guest/guest)
// and are ignored by default: run with `cargo test -- --ignored`.

use rabbit_bridge::config::{ClientOptions, ConnectionConfig};
use rabbit_bridge::{Bridge, BrokerClient, ErrorKind, ExchangeType, MessageRecord, PROPERTY_SLOTS};
use uuid::Uuid;

fn scratch_queue() -> String {
    format!("rabbit_bridge_test_{}", Uuid::new_v4())
}

fn unvalidated() -> ClientOptions {
    ClientOptions {
        validate_queue: false,
    }
}

#[test]
#[ignore]
fn test_declare_send_read() {
    let queue = scratch_queue();
    let mut client = BrokerClient::connect(&ConnectionConfig::new("localhost", &queue), &unvalidated());
    assert!(!client.is_last_error(), "{}", client.last_error_message());

    client.declare_queue(false, false, true).unwrap();

    let mut message = MessageRecord::with_properties(Some("text/plain"), Some(1), None);
    message.set_body_text("hello");
    message.correlation_id = Some("cid1".to_string());
    message.set_header_strings(["x=1"]);
    client.send(&message).unwrap();

    let read = client.read().unwrap();
    assert_eq!(read.body_text(), "hello");
    assert_eq!(read.correlation_id.as_deref(), Some("cid1"));
    assert_eq!(read.header("x"), Some("1"));

    // Drained
    assert!(client.read().unwrap().body().is_empty());
    client.close();
    client.close();
}

#[test]
#[ignore]
fn test_missing_queue_reported_on_connect() {
    let queue = scratch_queue();
    let client = BrokerClient::connect(&ConnectionConfig::new("localhost", &queue), &ClientOptions::default());

    assert!(client.is_last_error());
    assert!(client.last_error_message().starts_with("ERROR [check queue]: "));
}

#[test]
#[ignore]
fn test_missing_exchange_reported_on_connect() {
    let config = ConnectionConfig::new("localhost", scratch_queue()).with_exchange(scratch_queue());
    let mut client = BrokerClient::connect(&config, &ClientOptions::default());

    assert!(client.last_error_message().starts_with("ERROR [check exchange]: "));

    // Declaring reopens the channel the failed check closed
    client
        .declare_exchange(ExchangeType::Direct, false, false, true)
        .unwrap();
    assert!(!client.is_last_error());
}

#[test]
#[ignore]
fn test_unreachable_broker() {
    let config = ConnectionConfig::new("localhost", "q").with_port(1);
    let mut client = BrokerClient::connect(&config, &ClientOptions::default());

    assert!(client.last_error_message().starts_with("ERROR [open connection]: "));
    let err = client.read().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connectivity);
}

#[test]
#[ignore]
fn test_bridge_flat_round_trip() {
    let queue = scratch_queue();
    let mut bridge = Bridge::new("localhost", 5672, "guest", "guest", "/", &queue, None);
    assert!(!bridge.declare_queue(false, false, true), "{}", bridge.get_last_error_message());

    bridge.defaults_mut().content_type = Some("text/xml".to_string());
    bridge.send("текст".as_bytes(), None, Some("0005"), Some(&["system=AnyWay"][..]));
    assert!(!bridge.is_last_error());

    let mut props = vec![String::new(); PROPERTY_SLOTS];
    let mut headers = vec![String::new(); 2];
    assert!(!bridge.read_into(&mut props, Some(headers.as_mut_slice())));
    assert_eq!(props[2], "text/xml");
    assert_eq!(props[7], "0005");
    assert_eq!(headers[0], "system=AnyWay");
    assert_eq!(bridge.read_body_as_text(), "текст");

    bridge.close();
}

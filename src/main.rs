// src/main.rs
//
// Smoke test against a live broker: send one message with headers through the
// flat interface, read it back and print the property and header arrays.

use anyhow::{bail, Result};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use rabbit_bridge::config::{self, BridgeConfig, ClientOptions, ConnectionConfig};
use rabbit_bridge::{logging, Bridge, BrokerClient, PROPERTY_SLOTS};

const HEADER_SLOTS: usize = 5;

fn main() -> Result<()> {
    logging::init("info");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [flag, path] = args.as_slice() {
        if flag == "--create-config" {
            config::create_default_config_file(Path::new(path))?;
            return Ok(());
        }
    }
    if !args.is_empty() {
        bail!("usage: rabbit-bridge [--create-config <path>]");
    }

    let (connection, options) = resolve_config();
    let mut bridge = Bridge::from_client(BrokerClient::connect(&connection, &options));
    let outcome = run(&mut bridge);
    bridge.close();
    outcome
}

fn resolve_config() -> (ConnectionConfig, ClientOptions) {
    match config::load_config() {
        Ok(BridgeConfig {
            connection,
            options,
        }) => return (connection, options),
        Err(e) => info!("No config file used: {}", e),
    }

    match ConnectionConfig::from_env() {
        Ok(found) => found,
        Err(e) => {
            warn!("Environment configuration unavailable ({}), using defaults", e);
            (ConnectionConfig::new("localhost", "Test"), ClientOptions::default())
        }
    }
}

fn run(bridge: &mut Bridge) -> Result<()> {
    check(bridge)?;

    bridge.defaults_mut().content_type = Some("text/xml".to_string());
    bridge.defaults_mut().delivery_mode = Some(1);

    let message_id = Uuid::new_v4().to_string();
    let headers = ["system=AnyWay", "node-request=test.anyway", "service-name=getClient"];
    bridge.send(
        "Test message русский текст".as_bytes(),
        None,
        Some(message_id.as_str()),
        Some(&headers[..]),
    );
    check(bridge)?;

    let mut props = vec![String::new(); PROPERTY_SLOTS];
    let mut header_slots = vec![String::new(); HEADER_SLOTS];
    bridge.read_into(&mut props, Some(header_slots.as_mut_slice()));
    check(bridge)?;

    println!("Props");
    for prop in &props {
        println!("    {}", prop);
    }
    println!(" ");
    println!("Headers");
    for header in header_slots.iter().take_while(|h| !h.is_empty()) {
        println!("    {}", header);
    }
    println!(" ");
    println!("Body: {}", bridge.read_body_as_text());

    info!(
        "Received message: {}",
        serde_json::to_string(bridge.last_read())?
    );
    Ok(())
}

fn check(bridge: &Bridge) -> Result<()> {
    if bridge.is_last_error() {
        bail!(bridge.get_last_error_message());
    }
    Ok(())
}

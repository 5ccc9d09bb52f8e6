// src/config.rs
use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;
use lapin::uri::AMQPUri;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::rabbitmq::errors::RabbitMQError;

const CONFIG_FILE_NAME: &str = "rabbit_bridge.json";

// Configuration structures
#[derive(Debug, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub options: ClientOptions,
}

/// Where and how to reach the broker, and which queue/exchange to bind.
///
/// When `host` is a full `amqp://` or `amqps://` URI it takes precedence over
/// `port`, `user`, `password` and `virtual_host`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_user")]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub virtual_host: String,
    pub queue: String,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub heartbeat_seconds: u16,
    #[serde(default = "default_timeout")]
    pub connection_timeout_ms: u64,
}

/// Behaviour switches for [`BrokerClient`](crate::rabbitmq::BrokerClient) construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Passively check the bound queue on connect. Only applies when no
    /// exchange is bound; exchange-routed sends never need the queue.
    #[serde(default = "default_validate_queue")]
    pub validate_queue: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            validate_queue: default_validate_queue(),
        }
    }
}

// Default values
fn default_port() -> u16 { 5672 }
fn default_user() -> String { "guest".to_string() }
fn default_vhost() -> String { "/".to_string() }
fn default_timeout() -> u64 { 5000 }
fn default_validate_queue() -> bool { true }

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, queue: impl Into<String>) -> Self {
        ConnectionConfig {
            host: host.into(),
            port: default_port(),
            user: default_user(),
            password: default_user(),
            virtual_host: default_vhost(),
            queue: queue.into(),
            exchange: None,
            heartbeat_seconds: 0,
            connection_timeout_ms: default_timeout(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_virtual_host(mut self, vhost: impl Into<String>) -> Self {
        self.virtual_host = vhost.into();
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Whether `host` holds a complete connection URI.
    pub fn is_uri(&self) -> bool {
        let host = self.host.to_ascii_lowercase();
        host.starts_with("amqp://") || host.starts_with("amqps://")
    }

    /// The bound exchange, with an empty name meaning "none".
    pub fn exchange_name(&self) -> Option<&str> {
        self.exchange.as_deref().filter(|e| !e.is_empty())
    }

    pub fn amqp_uri(&self) -> Result<AMQPUri, RabbitMQError> {
        let mut uri = if self.is_uri() {
            self.host
                .parse::<AMQPUri>()
                .map_err(|e| RabbitMQError::InvalidConfig(format!("invalid AMQP URI: {}", e)))?
        } else {
            if self.host.is_empty() {
                return Err(RabbitMQError::InvalidConfig("host cannot be empty".to_string()));
            }
            let mut uri = AMQPUri::default();
            uri.authority.host = self.host.clone();
            uri.authority.port = self.port;
            uri.authority.userinfo.username = self.user.clone();
            uri.authority.userinfo.password = self.password.clone();
            uri.vhost = self.virtual_host.clone();
            uri
        };

        uri.query.heartbeat.get_or_insert(self.heartbeat_seconds);
        uri.query.connection_timeout.get_or_insert(self.connection_timeout_ms);
        Ok(uri)
    }

    /// Connection target with the password masked, for logs.
    pub fn redacted(&self) -> String {
        match self.amqp_uri() {
            Ok(uri) => format!(
                "amqp://{}:*****@{}:{}/{}",
                uri.authority.userinfo.username, uri.authority.host, uri.authority.port, uri.vhost
            ),
            Err(_) => "<invalid uri>".to_string(),
        }
    }

    /// Reads `RABBITMQ_*` variables, loading a `.env` file first if present.
    pub fn from_env() -> Result<(Self, ClientOptions), RabbitMQError> {
        dotenv().ok();
        Self::from_vars(|key| env::var(key))
    }

    pub fn from_vars<F>(lookup: F) -> Result<(Self, ClientOptions), RabbitMQError>
    where
        F: Fn(&str) -> std::result::Result<String, env::VarError>,
    {
        let optional = |key: &str| lookup(key).ok().filter(|v| !v.is_empty());

        let mut config = ConnectionConfig::new(lookup("RABBITMQ_HOST")?, lookup("RABBITMQ_QUEUE")?);
        if let Some(port) = optional("RABBITMQ_PORT") {
            config.port = port.parse()?;
        }
        if let Some(user) = optional("RABBITMQ_USER") {
            config.user = user;
        }
        if let Some(password) = optional("RABBITMQ_PASSWORD") {
            config.password = password;
        }
        if let Some(vhost) = optional("RABBITMQ_VHOST") {
            config.virtual_host = vhost;
        }
        config.exchange = optional("RABBITMQ_EXCHANGE");

        let mut options = ClientOptions::default();
        if let Some(flag) = optional("RABBITMQ_VALIDATE_QUEUE") {
            options.validate_queue = match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(RabbitMQError::InvalidConfig(format!(
                        "RABBITMQ_VALIDATE_QUEUE must be a boolean, got '{}'",
                        other
                    )))
                }
            };
        }

        Ok((config, options))
    }
}

// Configuration loading and management functions
pub fn find_config_file() -> Result<PathBuf> {
    let local = Path::new(CONFIG_FILE_NAME).to_path_buf();
    let nested = Path::new("config").join(CONFIG_FILE_NAME);

    for (location_name, path) in [("Current directory", local), ("Config directory", nested)] {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Ok(path);
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(format!(".{}", CONFIG_FILE_NAME));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Ok(home_config);
        }
    }

    Err(anyhow!(
        "Could not find {} in the current directory, ./config or the home directory",
        CONFIG_FILE_NAME
    ))
}

pub fn load_config() -> Result<BridgeConfig> {
    let config_path = find_config_file()?;
    load_config_from(&config_path)
}

pub fn load_config_from(path: &Path) -> Result<BridgeConfig> {
    let config_content = fs::read_to_string(path)
        .context(format!("Failed to read config file at {}", path.display()))?;

    let config: BridgeConfig = serde_json::from_str(&config_content)
        .context("Configuration file contains invalid JSON or missing required fields")?;

    if config.connection.host.is_empty() {
        return Err(anyhow!("Configuration error: connection.host cannot be empty"));
    }
    if config.connection.queue.is_empty() {
        return Err(anyhow!("Configuration error: connection.queue cannot be empty"));
    }

    Ok(config)
}

pub fn create_default_config_file(path: &Path) -> Result<()> {
    let default_config = BridgeConfig {
        connection: ConnectionConfig::new("localhost", "Test"),
        options: ClientOptions::default(),
    };

    let json = serde_json::to_string_pretty(&default_config)
        .context("Failed to serialize default configuration")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory at {}", parent.display()))?;
        }
    }

    fs::write(path, json)
        .context(format!("Failed to write configuration to {}", path.display()))?;

    info!("Created default configuration file at: {}", path.display());
    Ok(())
}

// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RabbitMQError {
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("RabbitMQ resource not found: {0}")]
    NotFound(String),

    #[error("RabbitMQ access refused: {0}")]
    AccessRefused(String),

    #[error("RabbitMQ precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("RabbitMQ consume error: {0}")]
    ConsumeError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// The four failure families a boundary caller can tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broker unreachable, authentication refused, connection gone.
    Connectivity,
    /// A passive declare found nothing, or a declare clashed with existing topology.
    Topology,
    /// The channel was closed when the operation needed it open.
    ChannelState,
    /// Caller-supplied data or configuration could not be interpreted.
    MalformedInput,
    Other,
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

impl RabbitMQError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RabbitMQError::ConnectionError(_) | RabbitMQError::AccessRefused(_) => {
                ErrorKind::Connectivity
            }
            RabbitMQError::NotFound(_) | RabbitMQError::PreconditionFailed(_) => {
                ErrorKind::Topology
            }
            RabbitMQError::ChannelError(_) => ErrorKind::ChannelState,
            RabbitMQError::InvalidInput(_) | RabbitMQError::InvalidConfig(_) => {
                ErrorKind::MalformedInput
            }
            RabbitMQError::PublishError(_)
            | RabbitMQError::ConsumeError(_)
            | RabbitMQError::Unknown(_) => ErrorKind::Other,
        }
    }

    /// The underlying failure text, without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            RabbitMQError::ConnectionError(s)
            | RabbitMQError::ChannelError(s)
            | RabbitMQError::NotFound(s)
            | RabbitMQError::AccessRefused(s)
            | RabbitMQError::PreconditionFailed(s)
            | RabbitMQError::PublishError(s)
            | RabbitMQError::ConsumeError(s)
            | RabbitMQError::InvalidInput(s)
            | RabbitMQError::InvalidConfig(s)
            | RabbitMQError::Unknown(s) => s,
        }
    }
}

// Converting from lapin errors
impl From<LapinError> for RabbitMQError {
    fn from(error: LapinError) -> Self {
        let error_text = error.to_string();

        match error {
            LapinError::IOError(_) | LapinError::InvalidConnectionState(_) => {
                return RabbitMQError::ConnectionError(error_text)
            }
            LapinError::InvalidChannelState(_) | LapinError::InvalidChannel(_) => {
                return RabbitMQError::ChannelError(error_text)
            }
            _ => {}
        }

        // Use the broker's reply text for everything else
        if error_text.contains("NOT_FOUND") {
            RabbitMQError::NotFound(error_text)
        } else if error_text.contains("ACCESS_REFUSED") {
            RabbitMQError::AccessRefused(error_text)
        } else if error_text.contains("PRECONDITION_FAILED") || error_text.contains("RESOURCE_LOCKED") {
            RabbitMQError::PreconditionFailed(error_text)
        } else if error_text.contains("connection") {
            RabbitMQError::ConnectionError(error_text)
        } else if error_text.contains("channel") {
            RabbitMQError::ChannelError(error_text)
        } else {
            RabbitMQError::Unknown(error_text)
        }
    }
}

impl From<std::env::VarError> for RabbitMQError {
    fn from(err: std::env::VarError) -> Self {
        RabbitMQError::InvalidConfig(format!("Environment variable error: {}", err))
    }
}

impl From<std::num::ParseIntError> for RabbitMQError {
    fn from(err: std::num::ParseIntError) -> Self {
        RabbitMQError::InvalidConfig(format!("Parse error: {}", err))
    }
}

impl From<std::io::Error> for RabbitMQError {
    fn from(err: std::io::Error) -> Self {
        RabbitMQError::Unknown(err.to_string())
    }
}

/// A failed client operation, tagged with the step that was in progress.
///
/// `Display` renders the same text the sticky error accessor returns.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct ClientError {
    pub step: String,
    #[source]
    pub source: RabbitMQError,
}

impl ClientError {
    pub fn new(step: impl Into<String>, source: RabbitMQError) -> Self {
        Self {
            step: step.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR {}", format_entry(&self.step, self.source.detail()))
    }
}

/// `[<step>]: <detail>`, with a placeholder when the detail is blank.
pub(crate) fn format_entry(step: &str, detail: &str) -> String {
    let detail = if detail.is_empty() {
        "Undefined error"
    } else {
        detail
    };
    format!("[{}]: {}", step, detail)
}

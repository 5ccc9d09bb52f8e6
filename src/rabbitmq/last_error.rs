// src/rabbitmq/last_error.rs

use std::fmt;

use super::errors::format_entry;

/// Named steps of the client operations, used as error breadcrumbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    OpenConnection,
    OpenChannel,
    CheckExchange,
    CheckQueue,
    DeclareQueue,
    DeclareExchange,
    SendMessage,
    ReadMessage,
    ReadProperties,
    IsOpen,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::OpenConnection => "open connection",
            Step::OpenChannel => "open channel",
            Step::CheckExchange => "check exchange",
            Step::CheckQueue => "check queue",
            Step::DeclareQueue => "declare queue",
            Step::DeclareExchange => "declare exchange",
            Step::SendMessage => "send message",
            Step::ReadMessage => "read message",
            Step::ReadProperties => "read properties",
            Step::IsOpen => "is open",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Step> for String {
    fn from(step: Step) -> Self {
        step.as_str().to_string()
    }
}

/// Sticky record of the most recent failure on one client.
///
/// `is_error()` holds exactly when `message()` is non-empty. The header is
/// updated before every risky step so a failure is reported against the step
/// that was running when it happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastError {
    has_error: bool,
    message: String,
    header: String,
}

impl LastError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.has_error = false;
        self.message.clear();
        self.header.clear();
    }

    pub fn set_header(&mut self, header: impl Into<String>) {
        self.header = header.into();
    }

    /// Record a failure. A missing or empty `header` falls back to the last one set.
    pub fn set_message(&mut self, detail: &str, header: Option<&str>) {
        let header = match header {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => self.header.clone(),
        };
        self.message = format_entry(&header, detail);
        self.header = header;
        self.has_error = true;
    }

    pub fn is_error(&self) -> bool {
        self.has_error
    }

    /// `ERROR [<step>]: <detail>`, or an empty string when nothing failed.
    pub fn message(&self) -> String {
        if self.has_error {
            format!("ERROR {}", self.message)
        } else {
            String::new()
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }
}

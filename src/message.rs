use chrono::{DateTime, SecondsFormat, Utc};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::BasicProperties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::rabbitmq::errors::RabbitMQError;

/// Number of slots in the flat property array handed across the boundary.
pub const PROPERTY_SLOTS: usize = 15;

const SHORT_STRING_LIMIT: usize = u8::MAX as usize;

/// One broker message: standard properties, custom headers and body.
///
/// Optional properties that were not present on the wire stay `None`; they are
/// never replaced by empty strings. The body is always a concrete byte vector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MessageRecord {
    /// Messages left in the queue when this one was fetched. Only set on read.
    pub message_count: u32,

    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub cluster_id: Option<String>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub timestamp: Option<DateTime<Utc>>,

    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl MessageRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record with the properties senders most often set up front.
    pub fn with_properties(
        content_type: Option<&str>,
        delivery_mode: Option<u8>,
        priority: Option<u8>,
    ) -> Self {
        MessageRecord {
            content_type: content_type.map(str::to_string),
            delivery_mode,
            priority,
            ..Self::default()
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Body decoded as UTF-8; invalid sequences are replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn set_body_text(&mut self, text: &str) {
        self.body = text.as_bytes().to_vec();
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Replaces all headers.
    pub fn set_headers<I, K, V>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
    }

    pub fn clear_headers(&mut self) {
        self.headers.clear();
    }

    /// Adds headers given as `"key=value"` strings. Entries without a key are skipped.
    pub fn set_header_strings<I, S>(&mut self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for entry in entries {
            let entry = entry.as_ref();
            match parse_header_string(entry) {
                Some((key, value)) => {
                    self.headers.insert(key, value);
                }
                None => debug!(entry = %entry, "Dropping malformed header string"),
            }
        }
    }

    /// Headers as `"key=value"` strings, ordered by key.
    pub fn header_strings(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    /// Present properties as `"Name=value"` lines, led by the count and body length.
    pub fn property_strings(&self) -> Vec<String> {
        let mut props = vec![
            format!("MessageCount={}", self.message_count),
            format!("BodyLength={}", self.body_len()),
        ];

        let named: [(&str, Option<String>); 13] = [
            ("ContentType", self.content_type.clone()),
            ("ContentEncoding", self.content_encoding.clone()),
            ("CorrelationId", self.correlation_id.clone()),
            ("ReplyTo", self.reply_to.clone()),
            ("Expiration", self.expiration.clone()),
            ("MessageId", self.message_id.clone()),
            ("Type", self.kind.clone()),
            ("UserId", self.user_id.clone()),
            ("AppId", self.app_id.clone()),
            ("ClusterId", self.cluster_id.clone()),
            ("DeliveryMode", self.delivery_mode.map(|v| v.to_string())),
            ("Priority", self.priority.map(|v| v.to_string())),
            ("Timestamp", self.timestamp.map(format_timestamp)),
        ];

        props.extend(
            named
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| format!("{}={}", name, v))),
        );
        props
    }

    /// The fixed-position property array: body length, message count, then the
    /// thirteen wire properties. Absent values are empty strings.
    pub fn property_slots(&self) -> [String; PROPERTY_SLOTS] {
        fn text(value: &Option<String>) -> String {
            value.clone().unwrap_or_default()
        }

        [
            self.body_len().to_string(),
            self.message_count.to_string(),
            text(&self.content_type),
            text(&self.content_encoding),
            text(&self.correlation_id),
            text(&self.reply_to),
            text(&self.expiration),
            text(&self.message_id),
            text(&self.kind),
            text(&self.user_id),
            text(&self.app_id),
            text(&self.cluster_id),
            self.delivery_mode.map(|v| v.to_string()).unwrap_or_default(),
            self.priority.map(|v| v.to_string()).unwrap_or_default(),
            self.timestamp.map(format_timestamp).unwrap_or_default(),
        ]
    }

    /// Builds the outgoing property block. A missing timestamp becomes "now"
    /// on the wire only; the record itself is left untouched.
    ///
    /// String properties and header keys are AMQP short strings and must fit
    /// in 255 bytes; timestamps before 1970 cannot be encoded.
    pub fn to_properties(&self) -> Result<BasicProperties, RabbitMQError> {
        let mut props = BasicProperties::default();

        if let Some(v) = &self.content_type {
            props = props.with_content_type(short("content type", v)?);
        }
        if let Some(v) = &self.content_encoding {
            props = props.with_content_encoding(short("content encoding", v)?);
        }
        if let Some(v) = &self.correlation_id {
            props = props.with_correlation_id(short("correlation id", v)?);
        }
        if let Some(v) = &self.reply_to {
            props = props.with_reply_to(short("reply-to", v)?);
        }
        if let Some(v) = &self.expiration {
            props = props.with_expiration(short("expiration", v)?);
        }
        if let Some(v) = &self.message_id {
            props = props.with_message_id(short("message id", v)?);
        }
        if let Some(v) = &self.kind {
            props = props.with_type(short("type", v)?);
        }
        if let Some(v) = &self.user_id {
            props = props.with_user_id(short("user id", v)?);
        }
        if let Some(v) = &self.app_id {
            props = props.with_app_id(short("app id", v)?);
        }
        if let Some(v) = &self.cluster_id {
            props = props.with_cluster_id(short("cluster id", v)?);
        }
        if let Some(v) = self.delivery_mode {
            props = props.with_delivery_mode(v);
        }
        if let Some(v) = self.priority {
            props = props.with_priority(v);
        }

        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        let seconds = u64::try_from(timestamp.timestamp()).map_err(|_| {
            RabbitMQError::InvalidInput(format!(
                "timestamp {} is before 1970 and cannot be sent",
                format_timestamp(timestamp)
            ))
        })?;
        props = props.with_timestamp(seconds);

        if !self.headers.is_empty() {
            let mut table = FieldTable::default();
            for (key, value) in &self.headers {
                table.insert(
                    short("header key", key)?,
                    AMQPValue::LongString(value.clone().into()),
                );
            }
            props = props.with_headers(table);
        }

        Ok(props)
    }

    /// Builds a record from a fetched message.
    pub fn from_delivery(properties: &BasicProperties, body: Vec<u8>, message_count: u32) -> Self {
        let mut record = MessageRecord {
            message_count,
            body,
            ..Self::default()
        };
        record.apply_properties(properties);
        record.apply_headers(properties.headers().as_ref());
        record
    }

    fn apply_properties(&mut self, properties: &BasicProperties) {
        fn text(value: &Option<ShortString>) -> Option<String> {
            value.as_ref().map(|s| s.as_str().to_string())
        }

        self.content_type = text(properties.content_type());
        self.content_encoding = text(properties.content_encoding());
        self.correlation_id = text(properties.correlation_id());
        self.reply_to = text(properties.reply_to());
        self.expiration = text(properties.expiration());
        self.message_id = text(properties.message_id());
        self.kind = text(properties.kind());
        self.user_id = text(properties.user_id());
        self.app_id = text(properties.app_id());
        self.cluster_id = text(properties.cluster_id());
        self.delivery_mode = *properties.delivery_mode();
        self.priority = *properties.priority();
        self.timestamp =
            (*properties.timestamp()).and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));
    }

    fn apply_headers(&mut self, table: Option<&FieldTable>) {
        self.headers = table
            .map(|t| {
                t.inner()
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), value_to_string(v)))
                    .collect()
            })
            .unwrap_or_default();
    }
}

impl fmt::Display for MessageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BasicProperties:")?;
        for prop in self.property_strings() {
            writeln!(f, "{}", prop)?;
        }
        writeln!(f)?;
        writeln!(f, "Headers:")?;
        for header in self.header_strings() {
            writeln!(f, "{}", header)?;
        }
        writeln!(f)?;
        write!(f, "{}", self.body_text())
    }
}

/// Splits `"key=value"` on the first `=`. Entries with no `=` or an empty key yield `None`.
pub fn parse_header_string(entry: &str) -> Option<(String, String)> {
    let (key, value) = entry.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Renders a header value the way it is shown to boundary callers.
pub fn value_to_string(value: &AMQPValue) -> String {
    match value {
        AMQPValue::Boolean(v) => v.to_string(),
        AMQPValue::ShortShortInt(v) => v.to_string(),
        AMQPValue::ShortShortUInt(v) => v.to_string(),
        AMQPValue::ShortInt(v) => v.to_string(),
        AMQPValue::ShortUInt(v) => v.to_string(),
        AMQPValue::LongInt(v) => v.to_string(),
        AMQPValue::LongUInt(v) => v.to_string(),
        AMQPValue::LongLongInt(v) => v.to_string(),
        AMQPValue::Float(v) => v.to_string(),
        AMQPValue::Double(v) => v.to_string(),
        AMQPValue::DecimalValue(d) => {
            let scale = d.scale as usize;
            let digits = format!("{:0>width$}", d.value, width = scale + 1);
            let (int, frac) = digits.split_at(digits.len() - scale);
            if frac.is_empty() {
                int.to_string()
            } else {
                format!("{}.{}", int, frac)
            }
        }
        AMQPValue::ShortString(s) => s.as_str().to_string(),
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        AMQPValue::FieldArray(a) => {
            let items: Vec<String> = a.as_slice().iter().map(value_to_string).collect();
            format!("[{}]", items.join(", "))
        }
        AMQPValue::Timestamp(t) => t.to_string(),
        AMQPValue::FieldTable(t) => {
            let items: Vec<String> = t
                .inner()
                .iter()
                .map(|(k, v)| format!("{}={}", k.as_str(), value_to_string(v)))
                .collect();
            format!("{{{}}}", items.join(", "))
        }
        AMQPValue::ByteArray(b) => String::from_utf8_lossy(b.as_slice()).into_owned(),
        AMQPValue::Void => String::new(),
        #[allow(unreachable_patterns)]
        other => format!("{:?}", other),
    }
}

fn short(field: &str, value: &str) -> Result<ShortString, RabbitMQError> {
    if value.len() > SHORT_STRING_LIMIT {
        return Err(RabbitMQError::InvalidInput(format!(
            "{} is {} bytes, the limit is {}",
            field,
            value.len(),
            SHORT_STRING_LIMIT
        )));
    }
    Ok(ShortString::from(value.to_string()))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

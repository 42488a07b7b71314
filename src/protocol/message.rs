//! Client-side message model
//!
//! A [`Message`] is what application code hands to the producer. Its body may
//! take any of the shapes in [`Body`]; the send pipeline normalizes it to text
//! before a driver ever sees it.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Reserved property names stamped by the producer and router
pub mod properties {
    pub const TOPIC_NAME: &str = "courier.topic_name";
    pub const COMMAND_NAME: &str = "courier.command_name";
    pub const PROCESSOR_NAME: &str = "courier.processor_name";
    pub const PROCESSOR_QUEUE_NAME: &str = "courier.processor_queue_name";
}

/// An application object carried as a message body.
///
/// Objects exposing a canonical JSON form are encoded as JSON; any other
/// object is rejected by body normalization with its type name.
pub trait BodyObject: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &str;

    fn canonical_json(&self) -> Option<Value> {
        None
    }
}

/// Object body with a canonical JSON representation
#[derive(Debug, Clone)]
pub struct JsonObject {
    type_name: String,
    value: Value,
}

impl JsonObject {
    pub fn new<S: Into<String>>(type_name: S, value: Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }
}

impl BodyObject for JsonObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn canonical_json(&self) -> Option<Value> {
        Some(self.value.clone())
    }
}

/// Object body without a JSON representation
#[derive(Debug, Clone)]
pub struct OpaqueObject {
    type_name: String,
}

impl OpaqueObject {
    pub fn new<S: Into<String>>(type_name: S) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl BodyObject for OpaqueObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// Message body before normalization
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// Ordered array; elements may be scalars, null or nested arrays
    List(Vec<Body>),
    /// Keyed array in insertion order
    Map(Vec<(String, Body)>),
    Object(Arc<dyn BodyObject>),
}

impl Body {
    /// Wrap any serializable value as an object with a canonical JSON form
    pub fn json<T: Serialize>(type_name: &str, value: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(Body::Object(Arc::new(JsonObject::new(type_name, value))))
    }

    pub fn object<O: BodyObject + 'static>(object: O) -> Self {
        Body::Object(Arc::new(object))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Body::Text(_) | Body::Integer(_) | Body::Float(_) | Body::Bool(_)
        )
    }

    /// Human-readable shape name, used in diagnostics
    pub fn type_name(&self) -> &str {
        match self {
            Body::Null => "null",
            Body::Text(_) => "string",
            Body::Integer(_) => "integer",
            Body::Float(_) => "float",
            Body::Bool(_) => "boolean",
            Body::List(_) | Body::Map(_) => "array",
            Body::Object(object) => object.type_name(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Body::Null, Body::Null) => true,
            (Body::Text(a), Body::Text(b)) => a == b,
            (Body::Integer(a), Body::Integer(b)) => a == b,
            (Body::Float(a), Body::Float(b)) => a == b,
            (Body::Bool(a), Body::Bool(b)) => a == b,
            (Body::List(a), Body::List(b)) => a == b,
            (Body::Map(a), Body::Map(b)) => a == b,
            (Body::Object(a), Body::Object(b)) => {
                a.type_name() == b.type_name() && a.canonical_json() == b.canonical_json()
            }
            _ => false,
        }
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_string())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<i64> for Body {
    fn from(value: i64) -> Self {
        Body::Integer(value)
    }
}

impl From<i32> for Body {
    fn from(value: i32) -> Self {
        Body::Integer(i64::from(value))
    }
}

impl From<f64> for Body {
    fn from(value: f64) -> Self {
        Body::Float(value)
    }
}

impl From<bool> for Body {
    fn from(value: bool) -> Self {
        Body::Bool(value)
    }
}

impl From<Vec<Body>> for Body {
    fn from(value: Vec<Body>) -> Self {
        Body::List(value)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Body::Null,
            Value::Bool(b) => Body::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Body::Integer(i),
                None => Body::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Body::Text(s),
            Value::Array(items) => Body::List(items.into_iter().map(Body::from).collect()),
            Value::Object(map) => Body::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

/// Delivery priority, mapped by drivers onto broker-native levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessagePriority {
    VeryLow,
    Low,
    Normal,
    High,
    VeryHigh,
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::VeryLow => "very_low",
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::High => "high",
            MessagePriority::VeryHigh => "very_high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "very_low" => Some(MessagePriority::VeryLow),
            "low" => Some(MessagePriority::Low),
            "normal" => Some(MessagePriority::Normal),
            "high" => Some(MessagePriority::High),
            "very_high" => Some(MessagePriority::VeryHigh),
            _ => None,
        }
    }
}

/// Outbound or received client message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub body: Body,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Unix timestamp in seconds
    pub timestamp: Option<i64>,
    pub expire: Option<Duration>,
    pub delay: Option<Duration>,
    pub priority: Option<MessagePriority>,
    pub headers: HashMap<String, String>,
    pub properties: HashMap<String, String>,
    pub redelivered: bool,
}

impl Message {
    pub fn new<B: Into<Body>>(body: B) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = Some(expire);
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Body as text; only meaningful after normalization
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_text()
    }
}

/// Logical send target: fan-out topic or point-to-point command
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Topic(String),
    Command(String),
}

impl Destination {
    pub fn topic<S: Into<String>>(name: S) -> Self {
        Destination::Topic(name.into())
    }

    pub fn command<S: Into<String>>(name: S) -> Self {
        Destination::Command(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Destination::Topic(name) | Destination::Command(name) => name,
        }
    }

    pub fn is_topic(&self) -> bool {
        matches!(self, Destination::Topic(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Topic(name) => write!(f, "topic:{name}"),
            Destination::Command(name) => write!(f, "command:{name}"),
        }
    }
}

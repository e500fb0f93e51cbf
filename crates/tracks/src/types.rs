//! Event types and serialization.

use crate::Error;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Typed property bag attached to an event.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Flattened, string-valued map as it goes on the wire.
pub type FlatMap = BTreeMap<String, String>;

/// How the user behind an event is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// Locally generated, session-scoped token.
    Anonymous,
    /// Logged-in username.
    Authenticated,
}

/// A scalar property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl PropertyValue {
    /// Convert a JSON value, rejecting arrays and objects.
    ///
    /// `null` becomes the empty string.
    pub fn from_json(key: &str, value: Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(PropertyValue::String(String::new())),
            Value::Bool(b) => Ok(PropertyValue::Bool(b)),
            Value::String(s) => Ok(PropertyValue::String(s)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(PropertyValue::Int(i)),
                None => n
                    .as_f64()
                    .map(PropertyValue::Float)
                    .ok_or_else(|| Error::UnsupportedValue {
                        key: key.into(),
                        kind: "number",
                    }),
            },
            Value::Array(_) => Err(Error::UnsupportedValue {
                key: key.into(),
                kind: "array",
            }),
            Value::Object(_) => Err(Error::UnsupportedValue {
                key: key.into(),
                kind: "object",
            }),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Int(i) => write!(f, "{}", i),
            PropertyValue::Float(x) => write!(f, "{}", x),
            PropertyValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.into())
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        PropertyValue::Int(i.into())
    }
}

impl From<usize> for PropertyValue {
    fn from(i: usize) -> Self {
        PropertyValue::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for PropertyValue {
    fn from(x: f64) -> Self {
        PropertyValue::Float(x)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

/// One tracked occurrence.
///
/// Everything but the retry counter is fixed at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    user: String,
    identity: IdentityKind,
    user_agent: String,
    timestamp: i64,
    retry_count: u32,
    user_properties: Option<Properties>,
    device_info: Option<Properties>,
    custom_properties: Option<Properties>,
}

impl Event {
    /// Create an event with no properties and a zero retry count.
    pub fn new(
        name: impl Into<String>,
        user: impl Into<String>,
        identity: IdentityKind,
        user_agent: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            identity,
            user_agent: user_agent.into(),
            timestamp,
            retry_count: 0,
            user_properties: None,
            device_info: None,
            custom_properties: None,
        }
    }

    pub fn with_user_properties(mut self, props: Properties) -> Self {
        self.user_properties = non_empty(props);
        self
    }

    pub fn with_device_info(mut self, props: Properties) -> Self {
        self.device_info = non_empty(props);
        self
    }

    pub fn with_custom_properties(mut self, props: Properties) -> Self {
        self.custom_properties = non_empty(props);
        self
    }

    pub(crate) fn add_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn identity(&self) -> IdentityKind {
        self.identity
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn user_properties(&self) -> Option<&Properties> {
        self.user_properties.as_ref()
    }

    pub fn device_info(&self) -> Option<&Properties> {
        self.device_info.as_ref()
    }

    pub fn custom_properties(&self) -> Option<&Properties> {
        self.custom_properties.as_ref()
    }
}

fn non_empty(props: Properties) -> Option<Properties> {
    if props.is_empty() {
        None
    } else {
        Some(props)
    }
}

/// Body of a `tracks/record` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPayload {
    pub events: Vec<FlatMap>,
    pub common_props: FlatMap,
}

//! Event builder for the fluent track API.

use crate::types::{Event, IdentityKind, Properties, PropertyValue};
use serde_json::Value;
use tracing::warn;

/// Identity for events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Anonymous id generated on the device.
    Anonymous(String),
    /// Username of a logged-in account.
    Authenticated(String),
}

impl Identity {
    pub fn kind(&self) -> IdentityKind {
        match self {
            Identity::Anonymous(_) => IdentityKind::Anonymous,
            Identity::Authenticated(_) => IdentityKind::Authenticated,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identity::Anonymous(id) => id,
            Identity::Authenticated(name) => name,
        }
    }
}

/// Per-event data captured from the client at build time.
pub(crate) struct EventContext {
    pub(crate) user_agent: String,
    pub(crate) now_ms: i64,
    pub(crate) device_info: Properties,
    pub(crate) user_properties: Option<Properties>,
}

/// Builder for track events.
#[derive(Debug)]
pub struct TrackBuilder {
    event_name: String,
    identity: Identity,
    properties: Properties,
    timestamp: Option<i64>,
}

impl TrackBuilder {
    pub(crate) fn new(event_name: impl Into<String>, identity: Identity) -> Self {
        Self {
            event_name: event_name.into(),
            identity,
            properties: Properties::new(),
            timestamp: None,
        }
    }

    /// Add a property.
    ///
    /// Arrays and objects are not supported and are skipped with a warning.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        match PropertyValue::from_json(&key, value.into()) {
            Ok(value) => {
                self.properties.insert(key, value);
            }
            Err(e) => warn!(error = %e, "skipping property"),
        }
        self
    }

    /// Add several properties.
    pub fn properties<K, V>(self, props: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        props
            .into_iter()
            .fold(self, |builder, (k, v)| builder.property(k, v))
    }

    /// Set custom timestamp (milliseconds since epoch).
    pub fn timestamp(mut self, ts: i64) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Build the event.
    pub(crate) fn build(self, ctx: EventContext) -> Event {
        let kind = self.identity.kind();
        let user = match self.identity {
            Identity::Anonymous(id) => id,
            Identity::Authenticated(name) => name,
        };

        let mut event = Event::new(
            self.event_name,
            user,
            kind,
            ctx.user_agent,
            self.timestamp.unwrap_or(ctx.now_ms),
        )
        .with_device_info(ctx.device_info)
        .with_custom_properties(self.properties);

        if let Some(props) = ctx.user_properties {
            event = event.with_user_properties(props);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{anonymous, authenticated};
    use serde_json::json;

    fn ctx() -> EventContext {
        EventContext {
            user_agent: "ua/1".into(),
            now_ms: 1706400000000,
            device_info: Properties::from([("locale".into(), "en".into())]),
            user_properties: Some(Properties::from([("plan".into(), "pro".into())])),
        }
    }

    #[test]
    fn test_track_builder_anonymous() {
        let event = TrackBuilder::new("reader_accessed", anonymous("abc"))
            .property("source", "menu")
            .build(ctx());

        assert_eq!(event.name(), "reader_accessed");
        assert_eq!(event.user(), "abc");
        assert_eq!(event.identity(), IdentityKind::Anonymous);
        assert_eq!(event.user_agent(), "ua/1");
        assert_eq!(event.timestamp(), 1706400000000);
        assert_eq!(event.retry_count(), 0);
        assert_eq!(
            event.custom_properties().unwrap().get("source"),
            Some(&PropertyValue::from("menu"))
        );
        assert!(event.device_info().is_some());
        assert!(event.user_properties().is_some());
    }

    #[test]
    fn test_track_builder_authenticated_custom_timestamp() {
        let event = TrackBuilder::new("stats_accessed", authenticated("alice"))
            .timestamp(42)
            .build(ctx());

        assert_eq!(event.identity(), IdentityKind::Authenticated);
        assert_eq!(event.user(), "alice");
        assert_eq!(event.timestamp(), 42);
        assert!(event.custom_properties().is_none());
    }

    #[test]
    fn test_structured_property_skipped() {
        let event = TrackBuilder::new("e", anonymous("abc"))
            .property("tags", json!(["a", "b"]))
            .property("count", 3)
            .build(ctx());

        let props = event.custom_properties().unwrap();
        assert!(props.get("tags").is_none());
        assert_eq!(props.get("count"), Some(&PropertyValue::Int(3)));
    }

    #[test]
    fn test_properties_from_iterator() {
        let event = TrackBuilder::new("e", anonymous("abc"))
            .properties([("a", json!(1)), ("b", json!(true))])
            .build(ctx());

        assert_eq!(event.custom_properties().unwrap().len(), 2);
    }
}

//! Capabilities the client borrows from its host.
//!
//! Everything here is injected at build time so tests can swap in fakes.

use crate::types::{Properties, PropertyValue};
use std::time::{SystemTime, UNIX_EPOCH};

/// Network reachability signal.
pub trait Connectivity: Send + Sync {
    fn is_available(&self) -> bool;
}

/// Connectivity that always reports the network as reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_available(&self) -> bool {
        true
    }
}

impl<F> Connectivity for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_available(&self) -> bool {
        self()
    }
}

/// Wall clock in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Source of anonymous user ids.
pub trait IdGenerator: Send + Sync {
    fn anonymous_id(&self) -> String;
}

/// Random v4 UUIDs without hyphens.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn anonymous_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Device attributes attached to events.
pub trait DeviceInfoProvider: Send + Sync {
    /// Attributes that never change for the process (model, OS, app version).
    fn immutable_info(&self) -> Properties;

    /// Attributes that may change between events (locale, orientation).
    fn mutable_info(&self) -> Properties;
}

/// Device info fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceInfo {
    immutable: Properties,
    mutable: Properties,
}

impl StaticDeviceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an immutable attribute.
    pub fn immutable(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.immutable.insert(key.into(), value.into());
        self
    }

    /// Add a mutable attribute.
    pub fn mutable(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.mutable.insert(key.into(), value.into());
        self
    }
}

impl DeviceInfoProvider for StaticDeviceInfo {
    fn immutable_info(&self) -> Properties {
        self.immutable.clone()
    }

    fn mutable_info(&self) -> Properties {
        self.mutable.clone()
    }
}

/// Host application state read by the tracker facade.
pub trait HostEnvironment: Send + Sync {
    /// Username of the logged-in account, if any.
    fn authenticated_username(&self) -> Option<String>;

    /// Whether the user manages sites through a fleet connection.
    fn is_fleet_managed(&self) -> bool;

    /// Number of visible accounts.
    fn account_count(&self) -> usize;

    /// Whether the app may use the network at all.
    fn has_network_permission(&self) -> bool {
        true
    }
}

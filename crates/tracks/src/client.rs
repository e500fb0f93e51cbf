//! Tracks client implementation.

use crate::builders::{EventContext, Identity, TrackBuilder};
use crate::config::{Config, TracksBuilder};
use crate::dispatcher::{Dispatcher, DispatcherHandle, DispatcherParts, SharedState};
use crate::env::{AlwaysOnline, Clock, DeviceInfoProvider, StaticDeviceInfo, SystemClock};
use crate::queue::RetryPolicy;
use crate::transport::{HttpTransport, Transport};
use crate::types::{Properties, PropertyValue};
use crate::Error;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Tracks analytics client.
///
/// Events are queued in memory and sent in batches by a background task once
/// more than `batch_threshold` are pending, or on [`flush`](Self::flush).
/// Must be built inside a tokio runtime.
///
/// # Example
///
/// ```rust,no_run
/// use tracks::{TracksClient, anonymous};
///
/// #[tokio::main]
/// async fn main() -> Result<(), tracks::Error> {
///     let client = TracksClient::builder()
///         .user_agent("MyApp/1.0")
///         .build()?;
///
///     client.track("app_opened", anonymous("5f1c0d"))
///         .property("source", "launcher")
///         .send()?;
///
///     client.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct TracksClient {
    config: Config,
    dispatcher: DispatcherHandle,
    shared: Arc<SharedState>,
    clock: Arc<dyn Clock>,
    device_info: Arc<dyn DeviceInfoProvider>,
    is_shutdown: AtomicBool,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl TracksBuilder {
    /// Build the client and start its dispatcher.
    pub fn build(self) -> Result<TracksClient, Error> {
        let config = self.build_config()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Config(
                "tracks client must be built inside a tokio runtime".into(),
            ));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config)?),
        };
        let connectivity = self.connectivity.unwrap_or_else(|| Arc::new(AlwaysOnline));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let device_info = self
            .device_info
            .unwrap_or_else(|| Arc::new(StaticDeviceInfo::new()));
        let shared = Arc::new(SharedState::new(config.user_agent()));

        let (dispatcher, task) = Dispatcher::spawn(DispatcherParts {
            batch_threshold: config.batch_threshold(),
            policy: RetryPolicy::new(config.max_retries(), config.max_event_age()),
            connectivity,
            clock: clock.clone(),
            device_info: device_info.clone(),
            transport,
            shared: shared.clone(),
        });

        debug!(api_host = %config.api_host(), "tracks client started");

        Ok(TracksClient {
            config,
            dispatcher,
            shared,
            clock,
            device_info,
            is_shutdown: AtomicBool::new(false),
            dispatch_task: Mutex::new(Some(task)),
        })
    }
}

impl TracksClient {
    /// Create a new builder.
    pub fn builder() -> TracksBuilder {
        TracksBuilder::new()
    }

    /// Get the client configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the number of pending events.
    pub async fn pending_event_count(&self) -> usize {
        self.dispatcher.pending().await.unwrap_or(0)
    }

    // ============================================
    // TRACK
    // ============================================

    /// Track an event for the given identity.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use tracks::{TracksClient, authenticated};
    /// # fn example(client: &TracksClient) -> Result<(), tracks::Error> {
    /// client.track("stats_accessed", authenticated("alice"))
    ///     .property("period", "week")
    ///     .send()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn track(&self, event_name: impl Into<String>, identity: Identity) -> SendableTrack<'_> {
        SendableTrack {
            builder: TrackBuilder::new(event_name, identity),
            client: self,
        }
    }

    // ============================================
    // USER PROPERTIES
    // ============================================

    /// Replace the user properties attached to future events.
    pub fn register_user_properties(&self, props: Properties) {
        *self.shared.user_properties.write() = Some(props);
    }

    /// Register a single user property, keeping the others.
    pub fn set_user_property(&self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.shared
            .user_properties
            .write()
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value.into());
    }

    /// Forget all user properties.
    pub fn clear_user_properties(&self) {
        *self.shared.user_properties.write() = None;
    }

    /// Get the current user properties.
    pub fn user_properties(&self) -> Option<Properties> {
        self.shared.user_properties.read().clone()
    }

    // ============================================
    // USER AGENT
    // ============================================

    /// Get the `User-Agent` used for new events and requests.
    pub fn user_agent(&self) -> String {
        self.shared.user_agent.read().clone()
    }

    /// Set the `User-Agent` used for new events and requests.
    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        *self.shared.user_agent.write() = user_agent.into();
    }

    // ============================================
    // LIFECYCLE
    // ============================================

    /// Send all pending events now, regardless of the batch threshold.
    ///
    /// Does nothing while the network is unavailable. Returns as soon as the
    /// request is scheduled.
    pub fn flush(&self) -> Result<(), Error> {
        self.ensure_not_shutdown()?;
        self.dispatcher.flush()
    }

    /// Wait until no batch is in flight.
    pub async fn wait_idle(&self) -> Result<(), Error> {
        self.dispatcher.wait_idle().await
    }

    /// Shutdown the client gracefully.
    ///
    /// Sends remaining events, waits for in-flight requests and stops the
    /// dispatcher.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), Error> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Ok(()); // Already shutdown
        }

        info!("shutting down client");

        self.dispatcher.shutdown().await?;

        let task = self.dispatch_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        Ok(())
    }

    // ============================================
    // INTERNAL
    // ============================================

    fn ensure_not_shutdown(&self) -> Result<(), Error> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    fn enqueue(&self, builder: TrackBuilder) -> Result<(), Error> {
        self.ensure_not_shutdown()?;

        let event = builder.build(EventContext {
            user_agent: self.user_agent(),
            now_ms: self.clock.now_ms(),
            device_info: self.device_info.mutable_info(),
            user_properties: self.user_properties(),
        });
        self.dispatcher.enqueue(event)
    }
}

/// Sendable track event builder.
pub struct SendableTrack<'a> {
    builder: TrackBuilder,
    client: &'a TracksClient,
}

impl<'a> SendableTrack<'a> {
    /// Add a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.builder = self.builder.property(key, value);
        self
    }

    /// Add several properties.
    pub fn properties<K, V>(mut self, props: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.builder = self.builder.properties(props);
        self
    }

    /// Set custom timestamp.
    pub fn timestamp(mut self, ts: i64) -> Self {
        self.builder = self.builder.timestamp(ts);
        self
    }

    /// Queue the event. Never blocks.
    pub fn send(self) -> Result<(), Error> {
        self.client.enqueue(self.builder)
    }
}

//! Client configuration.

use crate::env::{Clock, Connectivity, DeviceInfoProvider};
use crate::transport::Transport;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default REST API host.
pub const DEFAULT_API_HOST: &str = "https://public-api.wordpress.com/rest/v1.1";

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = "Nosara Client for Android";

/// Queue size that, once exceeded, triggers a send.
pub const DEFAULT_BATCH_THRESHOLD: usize = 5;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of resends before an event is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default age after which an unsent event is dropped.
pub const DEFAULT_MAX_EVENT_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Tracks client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) api_host: String,
    pub(crate) user_agent: String,
    pub(crate) batch_threshold: usize,
    pub(crate) timeout: Duration,
    pub(crate) max_retries: u32,
    pub(crate) max_event_age: Duration,
}

impl Config {
    /// Get the API host.
    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    /// Get the initial user agent.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Get the batch threshold.
    pub fn batch_threshold(&self) -> usize {
        self.batch_threshold
    }

    /// Get the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the retry budget per event.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Get the maximum event age.
    pub fn max_event_age(&self) -> Duration {
        self.max_event_age
    }
}

/// Builder for [`crate::TracksClient`].
pub struct TracksBuilder {
    api_host: Option<String>,
    user_agent: Option<String>,
    batch_threshold: Option<usize>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    max_event_age: Option<Duration>,
    pub(crate) connectivity: Option<Arc<dyn Connectivity>>,
    pub(crate) clock: Option<Arc<dyn Clock>>,
    pub(crate) device_info: Option<Arc<dyn DeviceInfoProvider>>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
}

impl TracksBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            api_host: None,
            user_agent: None,
            batch_threshold: None,
            timeout: None,
            max_retries: None,
            max_event_age: None,
            connectivity: None,
            clock: None,
            device_info: None,
            transport: None,
        }
    }

    /// Set the API host.
    pub fn api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = Some(host.into());
        self
    }

    /// Set the initial `User-Agent`.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the queue size above which a send is triggered.
    pub fn batch_threshold(mut self, threshold: usize) -> Self {
        self.batch_threshold = Some(threshold);
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how many times a failed event is resent.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set the age after which unsent events are dropped.
    pub fn max_event_age(mut self, age: Duration) -> Self {
        self.max_event_age = Some(age);
        self
    }

    /// Set the network reachability check.
    pub fn connectivity(mut self, connectivity: impl Connectivity + 'static) -> Self {
        self.connectivity = Some(Arc::new(connectivity));
        self
    }

    /// Set the clock used for event timestamps and expiry.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Set the device info provider.
    pub fn device_info(mut self, provider: impl DeviceInfoProvider + 'static) -> Self {
        self.device_info = Some(Arc::new(provider));
        self
    }

    /// Replace the HTTP transport.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Build the configuration.
    pub(crate) fn build_config(&self) -> Result<Config, crate::Error> {
        let api_host = self
            .api_host
            .clone()
            .unwrap_or_else(|| DEFAULT_API_HOST.into());
        if api_host.is_empty() {
            return Err(crate::Error::Config("api_host cannot be empty".into()));
        }

        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.into());
        if user_agent.is_empty() {
            return Err(crate::Error::Config("user_agent cannot be empty".into()));
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(crate::Error::Config("timeout must be positive".into()));
        }

        Ok(Config {
            api_host: api_host.trim_end_matches('/').to_string(),
            user_agent,
            batch_threshold: self.batch_threshold.unwrap_or(DEFAULT_BATCH_THRESHOLD),
            timeout,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            max_event_age: self.max_event_age.unwrap_or(DEFAULT_MAX_EVENT_AGE),
        })
    }
}

impl Default for TracksBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TracksBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracksBuilder")
            .field("api_host", &self.api_host)
            .field("user_agent", &self.user_agent)
            .field("batch_threshold", &self.batch_threshold)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("max_event_age", &self.max_event_age)
            .finish_non_exhaustive()
    }
}

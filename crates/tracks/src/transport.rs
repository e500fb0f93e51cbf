//! HTTP transport for sending events.

use crate::config::Config;
use crate::types::RecordPayload;
use crate::Error;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tracing::{debug, warn};

/// Path of the batch ingest endpoint, relative to the API host.
pub const RECORD_PATH: &str = "tracks/record";

/// Something that can deliver a batch.
///
/// Implementations perform exactly one attempt; retrying is the dispatcher's
/// business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &RecordPayload, user_agent: &str) -> Result<(), Error>;
}

/// HTTP transport for sending events to the Tracks API.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let endpoint = absolute_url(config.api_host(), RECORD_PATH);

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &RecordPayload, user_agent: &str) -> Result<(), Error> {
        debug!(
            endpoint = %self.endpoint,
            event_count = payload.events.len(),
            "sending events"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, user_agent)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".into());
            warn!(status = %status, body = %body, "API request failed");
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, body = %body, "events sent successfully");

        Ok(())
    }
}

/// Join `path` onto `base`.
///
/// A path that already starts with `base` passes through untouched.
fn absolute_url(base: &str, path: &str) -> String {
    if path.starts_with(base) {
        return path.to_string();
    }
    let path = path.strip_prefix('/').unwrap_or(path);
    format!("{}/{}", base.trim_end_matches('/'), path)
}

//! Client for the Tracks usage-analytics endpoint.
//!
//! Events are queued in memory, flattened into string maps and POSTed in
//! batches to `tracks/record`. Failed batches are retried a bounded number of
//! times and then dropped; delivery is best effort.
//!
//! # Example
//!
//! ```rust,ignore
//! use tracks::{Stat, Tracker, TracksClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let tracker = Tracker::new(
//!         TracksClient::builder().user_agent("MyApp/1.0"),
//!         host_environment(),
//!     );
//!
//!     tracker.begin_session();
//!     tracker.track(Stat::ApplicationOpened);
//!     tracker.end_session();
//!
//!     tracker.shutdown().await;
//! }
//! ```

mod builders;
mod client;
mod config;
mod dispatcher;
mod env;
mod error;
mod message;
mod queue;
mod tracker;
mod transport;
pub mod types;

pub use builders::{Identity, TrackBuilder};
pub use client::{SendableTrack, TracksClient};
pub use config::{Config, TracksBuilder};
pub use env::{
    AlwaysOnline, Clock, Connectivity, DeviceInfoProvider, HostEnvironment, IdGenerator,
    StaticDeviceInfo, SystemClock, UuidGenerator,
};
pub use error::{Error, FailureKind};
pub use message::{build_common_properties, build_event_payload, build_record_payload};
pub use queue::RetryPolicy;
pub use tracker::{SessionState, Stat, Tracker};
pub use transport::{HttpTransport, Transport};
pub use types::{Event, FlatMap, IdentityKind, Properties, PropertyValue, RecordPayload};

/// Create an anonymous identity.
pub fn anonymous(id: impl Into<String>) -> Identity {
    Identity::Anonymous(id.into())
}

/// Create an authenticated identity.
pub fn authenticated(username: impl Into<String>) -> Identity {
    Identity::Authenticated(username.into())
}

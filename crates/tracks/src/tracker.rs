//! App-level tracker over the Tracks client.
//!
//! Maps a closed catalog of app events to canonical names and keeps the
//! anonymous or authenticated identity of the current user. Every operation
//! is fire-and-forget: failures are logged, never returned.

use crate::builders::Identity;
use crate::config::TracksBuilder;
use crate::env::{HostEnvironment, IdGenerator, UuidGenerator};
use crate::types::{Properties, PropertyValue};
use crate::TracksClient;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Default prefix prepended to every event name.
pub const DEFAULT_EVENT_PREFIX: &str = "wpandroid_";

const JETPACK_USER: &str = "jetpack_user";
const NUMBER_OF_BLOGS: &str = "number_of_blogs";

/// App events known to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stat {
    ApplicationStarted,
    ApplicationOpened,
    ApplicationClosed,
    ReaderAccessed,
    ReaderOpenedArticle,
    ReaderLikedArticle,
    ReaderInfiniteScroll,
    NotificationsAccessed,
    StatsAccessed,
    StatsViewAllAccessed,
    StatsSinglePostAccessed,
    StatsOpenedWebVersion,
    StatsTappedBarChart,
    StatsScrolledToBottom,
    EditorCreatedPost,
    EditorPublishedPost,
    SharedItem,
    PushNotificationReceived,
    ThemesAccessed,
}

impl Stat {
    /// Canonical event name, without prefix.
    ///
    /// `None` for stats that are not reported.
    pub fn event_name(self) -> Option<&'static str> {
        let name = match self {
            Stat::ApplicationStarted => "application_started",
            Stat::ApplicationOpened => "application_opened",
            Stat::ApplicationClosed => "application_closed",
            Stat::ReaderAccessed => "reader_accessed",
            Stat::ReaderOpenedArticle => "reader_opened_article",
            Stat::ReaderLikedArticle => "reader_liked_article",
            Stat::ReaderInfiniteScroll => "reader_infinite_scroll_performed",
            Stat::NotificationsAccessed => "notifications_accessed",
            Stat::StatsAccessed => "stats_accessed",
            Stat::StatsViewAllAccessed => "stats_view_all_accessed",
            Stat::StatsSinglePostAccessed => "stats_single_post_accessed",
            Stat::StatsOpenedWebVersion => "stats_web_version_accessed",
            Stat::StatsTappedBarChart => "stats_tapped_bar_chart",
            Stat::StatsScrolledToBottom => "stats_scrolled_to_bottom",
            Stat::EditorCreatedPost
            | Stat::EditorPublishedPost
            | Stat::SharedItem
            | Stat::PushNotificationReceived
            | Stat::ThemesAccessed => return None,
        };
        Some(name)
    }
}

/// Session lifecycle of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    ActiveSession,
    NoSession,
}

#[derive(Debug)]
struct TrackerState {
    session: SessionState,
    anon_id: Option<String>,
    username: Option<String>,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            session: SessionState::Uninitialized,
            anon_id: None,
            username: None,
        }
    }

    fn identity(&self) -> Option<Identity> {
        if let Some(name) = &self.username {
            return Some(Identity::Authenticated(name.clone()));
        }
        self.anon_id.clone().map(Identity::Anonymous)
    }
}

/// Session-aware tracker facade.
pub struct Tracker {
    client: Option<TracksClient>,
    host: Arc<dyn HostEnvironment>,
    ids: Arc<dyn IdGenerator>,
    event_prefix: String,
    state: Mutex<TrackerState>,
}

impl Tracker {
    /// Build a tracker and its client.
    ///
    /// If the host lacks network permission or the client cannot be built,
    /// the tracker is disabled for its whole lifetime.
    pub fn new(builder: TracksBuilder, host: impl HostEnvironment + 'static) -> Self {
        let client = if !host.has_network_permission() {
            warn!("network permission missing, tracker disabled");
            None
        } else {
            match builder.build() {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(error = %e, "cannot build tracks client, tracker disabled");
                    None
                }
            }
        };
        Self::from_parts(client, Arc::new(host))
    }

    /// Wrap an existing client.
    pub fn with_client(client: TracksClient, host: impl HostEnvironment + 'static) -> Self {
        Self::from_parts(Some(client), Arc::new(host))
    }

    fn from_parts(client: Option<TracksClient>, host: Arc<dyn HostEnvironment>) -> Self {
        Self {
            client,
            host,
            ids: Arc::new(UuidGenerator),
            event_prefix: DEFAULT_EVENT_PREFIX.into(),
            state: Mutex::new(TrackerState::new()),
        }
    }

    /// Replace the anonymous id generator.
    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Replace the event name prefix.
    pub fn event_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.event_prefix = prefix.into();
        self
    }

    /// Whether the tracker has a working client.
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Get the underlying client.
    pub fn client(&self) -> Option<&TracksClient> {
        self.client.as_ref()
    }

    pub fn session_state(&self) -> SessionState {
        self.state.lock().session
    }

    /// Identity attached to tracked events, if resolved.
    pub fn identity(&self) -> Option<Identity> {
        self.state.lock().identity()
    }

    // ============================================
    // SESSION
    // ============================================

    /// Start a session and refresh the user metadata.
    pub fn begin_session(&self) {
        if self.client.is_none() {
            return;
        }
        self.refresh_metadata();
        self.state.lock().session = SessionState::ActiveSession;
    }

    /// End the session and try to send what is queued.
    pub fn end_session(&self) {
        let Some(client) = &self.client else {
            return;
        };
        {
            let mut state = self.state.lock();
            if state.session == SessionState::ActiveSession {
                state.session = SessionState::NoSession;
            }
        }
        if let Err(e) = client.flush() {
            warn!(error = %e, "flush at end of session failed");
        }
    }

    /// Resolve the identity and re-register user properties.
    pub fn refresh_metadata(&self) {
        let Some(client) = &self.client else {
            return;
        };

        let username = self
            .host
            .authenticated_username()
            .filter(|name| !name.is_empty());

        {
            let mut state = self.state.lock();
            match username {
                Some(name) => {
                    // TODO: emit an alias event linking the anonymous id to the username
                    if state.anon_id.take().is_some() {
                        debug!("discarding anonymous id after login");
                    }
                    state.username = Some(name);
                }
                None => {
                    state.username = None;
                    if state.anon_id.is_none() {
                        let id = self.ids.anonymous_id();
                        debug!(anon_id = %id, "generated anonymous id");
                        state.anon_id = Some(id);
                    }
                }
            }
        }

        client.register_user_properties(Properties::from([
            (
                JETPACK_USER.into(),
                PropertyValue::Bool(self.host.is_fleet_managed()),
            ),
            (
                NUMBER_OF_BLOGS.into(),
                PropertyValue::from(self.host.account_count()),
            ),
        ]));
    }

    /// Forget the identity and user properties.
    pub fn clear_all_data(&self) {
        let Some(client) = &self.client else {
            return;
        };
        client.clear_user_properties();
        *self.state.lock() = TrackerState::new();
    }

    // ============================================
    // TRACK
    // ============================================

    /// Track an app event.
    pub fn track(&self, stat: Stat) {
        self.track_with_properties(stat, std::iter::empty::<(String, Value)>());
    }

    /// Track an app event with extra properties.
    ///
    /// Array and object values are skipped.
    pub fn track_with_properties<K, V>(&self, stat: Stat, properties: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let Some(client) = &self.client else {
            return;
        };
        let Some(name) = stat.event_name() else {
            debug!(?stat, "stat is not reported");
            return;
        };
        let Some(identity) = self.identity() else {
            debug!(?stat, "no identity yet, dropping event");
            return;
        };

        let result = client
            .track(format!("{}{}", self.event_prefix, name), identity)
            .properties(properties)
            .send();
        if let Err(e) = result {
            error!(error = %e, event = name, "cannot queue event");
        }
    }

    /// Accepted for interface parity; push tokens are not reported.
    pub fn register_push_notification_token(&self, _token: &str) {}

    /// Flush and stop the client.
    pub async fn shutdown(&self) {
        if let Some(client) = &self.client {
            if let Err(e) = client.shutdown().await {
                warn!(error = %e, "tracker shutdown failed");
            }
        }
    }
}

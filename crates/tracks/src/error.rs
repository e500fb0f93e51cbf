//! Error types for the Tracks client.

/// Errors that can occur when using the Tracks client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Client has been shutdown.
    #[error("Client has been shutdown")]
    Shutdown,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A property value is not a scalar.
    #[error("Unsupported value for property `{key}`: {kind}")]
    UnsupportedValue { key: String, kind: &'static str },
}

/// Coarse classification of a failed send.
///
/// Only used for logging: every kind is recovered the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Server,
    Network,
    Other,
}

impl Error {
    /// Classify a transport failure.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Http(e) if e.is_timeout() => FailureKind::Timeout,
            Error::Http(e) if e.is_connect() || e.is_request() => FailureKind::Network,
            Error::Http(e) if e.status().is_some_and(|s| s.is_server_error()) => {
                FailureKind::Server
            }
            Error::Status { status, .. } if *status >= 500 => FailureKind::Server,
            _ => FailureKind::Other,
        }
    }
}

//! Connector error taxonomy.

use std::time::Duration;

use thiserror::Error;

use super::state::ConnectorState;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Connector is in AUTH_FAILED state and must be recreated")]
    AuthFailedTerminal,

    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// Local setup problem, such as a provider with no registered OAuth
    /// client. New credentials do not fix it.
    #[error("Connector misconfigured: {0}")]
    Configuration(String),

    #[error("Rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("Provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Folder '{0}' not found")]
    FolderNotFound(String),

    #[error("Failed to parse message: {0}")]
    Parse(String),

    #[error("Operation not supported by this provider: {0}")]
    Unsupported(&'static str),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid connector state transition {from} -> {to}")]
    InvalidTransition {
        from: ConnectorState,
        to: ConnectorState,
    },
}

/// Maximum length of provider error bodies kept in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub(crate) fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((idx, _)) => format!("{}... (truncated)", &body[..idx]),
        None => body.to_string(),
    }
}

impl ConnectorError {
    /// Maps a non-success HTTP status to the matching error class.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let body = truncate_body(body);
        match status {
            401 | 403 => ConnectorError::Auth(format!("HTTP {}: {}", status, body)),
            429 => ConnectorError::RateLimited { retry_after },
            500..=599 => ConnectorError::Server { status, body },
            _ => ConnectorError::Rejected { status, body },
        }
    }

    /// Errors that will not go away without new credentials.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ConnectorError::Auth(_)
                | ConnectorError::RefreshFailed(_)
                | ConnectorError::AuthFailedTerminal
                | ConnectorError::Credentials(_)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ConnectorError::RateLimited { .. })
    }

    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::Network(_)
                | ConnectorError::Tls(_)
                | ConnectorError::Timeout(_)
                | ConnectorError::RateLimited { .. }
                | ConnectorError::Server { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ConnectorError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConnectorError::Timeout(err.to_string())
        } else if err.is_decode() {
            ConnectorError::Protocol(err.to_string())
        } else if let Some(status) = err.status() {
            ConnectorError::from_status(status.as_u16(), &err.to_string(), None)
        } else {
            ConnectorError::Network(err.to_string())
        }
    }
}

impl From<async_native_tls::Error> for ConnectorError {
    fn from(err: async_native_tls::Error) -> Self {
        ConnectorError::Tls(err.to_string())
    }
}

impl From<async_imap::error::Error> for ConnectorError {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error as ImapError;
        match err {
            ImapError::Io(e) => ConnectorError::Network(e.to_string()),
            ImapError::ConnectionLost => ConnectorError::Network("connection lost".to_string()),
            ImapError::No(msg) | ImapError::Bad(msg) => ConnectorError::Protocol(msg),
            other => ConnectorError::Protocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

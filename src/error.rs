//! Error types for the Reversi client.
//!
//! The variants group into four families that callers handle differently:
//!
//! - **auth**: [`ReversiError::AuthRedirected`]. The gateway already saved the
//!   pending intent and navigated to the login surface. Treat as a silent abort.
//! - **network**: [`ReversiError::Http`], [`ReversiError::Network`]. Log and
//!   fall back to a safe default (render without highlights, generic retry).
//! - **snapshot**: [`ReversiError::MalformedSnapshot`]. Log, skip the render,
//!   leave the previous state on screen.
//! - **channel**: [`ReversiError::Channel`], [`ReversiError::Frame`] and the
//!   `Transport*` variants: matchmaking falls back to a status poll, the game
//!   channel is logged without reconnecting.

use thiserror::Error;

/// Errors that can occur when using the Reversi client.
#[derive(Debug, Error)]
pub enum ReversiError {
    /// The remote service required authentication; a login redirect is in flight.
    #[error("authentication required, redirected to login")]
    AuthRedirected,

    /// The remote service answered with a non-success status.
    #[error("{context} failed with HTTP status {status}")]
    Http {
        /// Numeric HTTP status code.
        status: u16,
        /// Short description of the call that failed.
        context: String,
    },

    /// The request could not be completed (DNS, connect, read, body decode).
    #[error("network error: {0}")]
    Network(String),

    /// A session snapshot failed validation.
    #[error("malformed session snapshot: {0}")]
    MalformedSnapshot(String),

    /// Failed to establish or use a push-channel subscription.
    #[error("push channel error: {0}")]
    Channel(String),

    /// A STOMP frame could not be parsed.
    #[error("invalid STOMP frame: {0}")]
    Frame(String),

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client's session loop is no longer running.
    #[error("client is not running")]
    NotRunning,

    /// The caller supplied an unusable argument (e.g. a blank session id).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReversiError {
    /// Returns `true` for the silent-abort error produced by a login redirect.
    pub fn is_auth_redirect(&self) -> bool {
        matches!(self, Self::AuthRedirected)
    }

    /// Returns `true` for errors that belong to the push-channel family.
    pub fn is_channel_failure(&self) -> bool {
        matches!(
            self,
            Self::Channel(_)
                | Self::Frame(_)
                | Self::TransportSend(_)
                | Self::TransportReceive(_)
                | Self::TransportClosed
        )
    }
}

/// A specialized [`Result`] type for Reversi client operations.
pub type Result<T> = std::result::Result<T, ReversiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_redirect_is_classified() {
        assert!(ReversiError::AuthRedirected.is_auth_redirect());
        assert!(!ReversiError::Timeout.is_auth_redirect());
    }

    #[test]
    fn channel_family_is_classified() {
        assert!(ReversiError::Channel("refused".into()).is_channel_failure());
        assert!(ReversiError::TransportClosed.is_channel_failure());
        assert!(!ReversiError::Network("reset".into()).is_channel_failure());
    }

    #[test]
    fn http_error_display_names_the_call() {
        let err = ReversiError::Http {
            status: 404,
            context: "join session".into(),
        };
        assert_eq!(err.to_string(), "join session failed with HTTP status 404");
    }
}

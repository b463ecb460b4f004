//! Error types surfaced by the client.

/// Errors returned by [`crate::Client`] operations and pending replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// An operation was attempted before [`crate::Client::configure`].
    Uninitialized,
    /// Endpoint options were missing or contradictory.
    Config(String),
    /// The server rejected credentials (`login-failed`).
    Authentication(String),
    /// The server answered a request with its failure message type.
    Correlation(String),
    /// The transport could not be opened or refused a frame.
    Transport(String),
    /// The client went away before a pending reply arrived.
    Closed,
}

impl ClientError {
    /// Build an [`ClientError::Authentication`] from a server message.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// Build a [`ClientError::Correlation`] from a server message.
    pub fn correlation(message: impl Into<String>) -> Self {
        Self::Correlation(message.into())
    }

    /// The server-supplied message, for errors that carry one.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Authentication(msg) | Self::Correlation(msg) => Some(msg),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Client not configured: call configure() first"),
            Self::Config(msg) => write!(f, "Invalid configuration: {msg}"),
            Self::Authentication(msg) => write!(f, "Authentication failed: {msg}"),
            Self::Correlation(msg) => write!(f, "Request failed: {msg}"),
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::Closed => write!(f, "Client closed before a reply arrived"),
        }
    }
}

impl std::error::Error for ClientError {}

use std::time::Duration;

/// Typed error hierarchy for the streaming query client.
/// Classifies errors as connection, protocol or parse failures.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    // Connection
    #[error("identity token unavailable: {0}")]
    TokenUnavailable(String),
    #[error("failed to open connection: {0}")]
    ConnectFailed(String),
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("not connected")]
    NotConnected,
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    // Protocol
    #[error("{0}")]
    Server(String),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    // Operational
    #[error("nothing to retry")]
    NothingToRetry,
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

/// Coarse error class used by the session to decide how to surface a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Token fetch, open failure, socket error. Surfaced with retry.
    Connection,
    /// Server-reported failure, surfaced verbatim.
    Protocol,
    /// Undecodable input. Logged, never shown.
    Parse,
    /// Caller misuse.
    Usage,
}

impl ClientError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TokenUnavailable(_)
            | Self::ConnectFailed(_)
            | Self::ConnectTimeout(_)
            | Self::NotConnected
            | Self::ConnectionLost(_) => ErrorClass::Connection,
            Self::Server(_) => ErrorClass::Protocol,
            Self::MalformedFrame(_) => ErrorClass::Parse,
            Self::NothingToRetry | Self::InvalidQuery(_) | Self::InvalidConfig(_) => ErrorClass::Usage,
        }
    }

    /// Whether resubmitting the same query can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Connection | ErrorClass::Protocol)
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::TokenUnavailable(_) => "token_unavailable",
            Self::ConnectFailed(_) => "connect_failed",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::NotConnected => "not_connected",
            Self::ConnectionLost(_) => "connection_lost",
            Self::Server(_) => "server_error",
            Self::MalformedFrame(_) => "malformed_frame",
            Self::NothingToRetry => "nothing_to_retry",
            Self::InvalidQuery(_) => "invalid_query",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedFrame(e.to_string())
    }
}

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Everything that can go wrong talking to the backend or driving an exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The connection could not be established or was interrupted.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A stream event payload could not be decoded.
    #[error("stream decode error: {0}")]
    StreamDecode(String),

    #[error("session not found: {0}")]
    NotFound(String),

    /// `send` was called while another exchange is still active.
    #[error("an exchange is already in progress")]
    Busy,

    /// A success response whose body is not what the endpoint promises.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A request could not be built before anything was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend reported a failure through an `error` stream event.
    #[error("stream failed: {0}")]
    StreamFailed(String),

    #[error("stream ended before the answer was complete")]
    IncompleteStream,

    #[error("question is empty")]
    EmptyQuestion,

    #[error("io error: {0}")]
    Io(String),
}

impl ClientError {
    /// Whether the error came from the transport layer rather than the backend's answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http { .. })
    }

    /// HTTP status code, if the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

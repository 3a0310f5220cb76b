//! # Error types
//!
//! Three failure families with different recovery rules: a failed read keeps
//! the stale view, a failed write hands the draft back to the caller and a
//! dropped push session reconnects on its own.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of one HTTP exchange with the ticket backend.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("{url} answered {status}: {message}")]
    Status {
        url: String,
        status: StatusCode,
        message: String,
    },

    /// The body did not match the expected shape.
    #[error("unexpected response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The configured base URL cannot address `path`.
    #[error("cannot build endpoint `{path}`: {source}")]
    Endpoint {
        path: String,
        #[source]
        source: url::ParseError,
    },
}

impl ApiError {
    /// HTTP status, when the backend answered.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the session is missing or expired.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

/// A snapshot read failed. The store keeps whatever it showed before.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The HTTP exchange failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The owning screen went away while the read was in flight.
    #[error("fetch abandoned because its screen was closed")]
    Cancelled,
}

/// A write failed. The draft stays with the caller for a manual retry.
#[derive(Error, Debug)]
pub enum SendError {
    /// The HTTP exchange failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The draft has no text and no attachments.
    #[error("nothing to send: the message is blank and has no attachments")]
    EmptyDraft,

    /// The owning screen went away while the write was in flight.
    #[error("send abandoned because its screen was closed")]
    Cancelled,
}

/// The push session lost its broker connection.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The WebSocket upgrade or broker handshake failed.
    #[error("could not reach broker at {url}: {message}")]
    Connect { url: String, message: String },

    /// The broker sent an ERROR frame.
    #[error("broker error: {message}")]
    Broker {
        message: String,
        details: Option<String>,
    },

    /// The broker sent bytes that are not a valid frame.
    #[error("malformed STOMP frame: {0}")]
    Frame(String),

    /// The WebSocket itself failed.
    #[error("websocket failure: {0}")]
    Socket(String),

    /// The broker hung up.
    #[error("broker closed the connection")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match error {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            other => Self::Socket(other.to_string()),
        }
    }
}

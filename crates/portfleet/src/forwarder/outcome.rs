//! Forwarding request and outcome types.

use bytes::Bytes;
use hyper::body::Incoming;
use hyper::{HeaderMap, Method, Response, Uri};
use std::fmt;

/// An inbound request with its body buffered, so it can be replayed
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ForwardRequest {
    /// Path plus query string, as the client sent it
    pub fn path_and_query(&self) -> &str {
        self.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    }
}

/// Transport-level failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardErrorKind {
    /// Deadline passed before the response header arrived
    Timeout,
    /// Connection could not be established
    Unreachable,
    /// Connection dropped before a response header was received
    Reset,
    /// The upstream request could not be built; never retried
    InvalidRequest,
}

impl ForwardErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ForwardErrorKind::InvalidRequest)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ForwardErrorKind::Timeout => "timeout",
            ForwardErrorKind::Unreachable => "unreachable",
            ForwardErrorKind::Reset => "reset",
            ForwardErrorKind::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for ForwardErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure after all attempts were spent
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ForwardError {
    pub kind: ForwardErrorKind,
    pub message: String,
    /// Number of attempts made, including the first
    pub attempts: u32,
}

impl ForwardError {
    pub fn new(kind: ForwardErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 0,
        }
    }
}

/// Result of one forward call: the upstream response (any status) or the
/// final transport failure
pub type Outcome = Result<Response<Incoming>, ForwardError>;

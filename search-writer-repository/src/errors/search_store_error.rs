//! Search store error type and response classification.
//!
//! Failed responses are classified from the HTTP status code and the parsed
//! `error.type` of the cluster's error body, so callers match on a typed
//! variant instead of grepping message text.

use serde_json::Value;
use thiserror::Error;

/// How much of an unparseable error body is kept in the error message.
const REASON_SNIPPET_LEN: usize = 200;

/// Errors from search store operations.
#[derive(Debug, Clone, Error)]
pub enum SearchStoreError {
    /// Failed to build a connection to the cluster.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request never produced a response (I/O failure, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// Failed to encode a request or decode a response body.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The cluster rejected the write with a version conflict (409).
    #[error("version conflict: {0}")]
    Conflict(String),

    /// Index creation hit an index that is already there.
    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    /// The targeted index does not exist.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// Any other 4xx rejection; resubmitting the same request will not help.
    #[error("request rejected ({status}): {reason}")]
    Request { status: u16, reason: String },

    /// A 5xx from the cluster; worth retrying.
    #[error("server error ({status}): {reason}")]
    Server { status: u16, reason: String },
}

impl SearchStoreError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Classify a non-success response from its status code and error body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let error_type = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|e| e.get("type"))
            .and_then(|t| t.as_str())
            .map(str::to_owned);
        let reason = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|e| e.get("reason"))
            .and_then(|r| r.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| snippet(body));

        match (status, error_type.as_deref()) {
            (_, Some("resource_already_exists_exception")) => Self::IndexAlreadyExists(reason),
            (_, Some("index_not_found_exception")) => Self::IndexNotFound(reason),
            (409, _) => Self::Conflict(reason),
            (s, _) if (400..500).contains(&s) => Self::Request { status: s, reason },
            (s, _) => Self::Server { status: s, reason },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_index_already_exists(&self) -> bool {
        matches!(self, Self::IndexAlreadyExists(_))
    }

    pub fn is_index_not_found(&self) -> bool {
        matches!(self, Self::IndexNotFound(_))
    }

    /// Whether resubmitting the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Connection(_) | Self::Server { .. } | Self::Conflict(_)
        )
    }
}

fn snippet(body: &str) -> String {
    if body.len() <= REASON_SNIPPET_LEN {
        body.to_string()
    } else {
        let mut end = REASON_SNIPPET_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}
